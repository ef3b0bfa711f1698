/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Ordered view of playable frames with a clock-aligned pop.
//!
//! Entries are ordered by producer capture timestamp. The first pushed frame
//! anchors a local playout offset; every frame's playout deadline is its
//! capture timestamp shifted by that offset. Skew correction nudges the
//! offset as the playout clock drifts.

use std::collections::BTreeMap;

/// One playable frame, keyed into local playout time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackEntry {
    pub frame_seq: u64,
    pub capture_timestamp_ms: u64,
    /// Local deadline: capture timestamp plus the playout offset.
    pub playout_timestamp_ms: u64,
}

/// Capture-timestamp-ordered queue of Ready frames.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    entries: BTreeMap<(u64, u64), ()>,
    /// Local-minus-producer clock offset, anchored by the first push.
    offset_ms: Option<f64>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a Ready frame. The first frame anchors the playout offset so
    /// that it plays `initial_delay_ms` from now.
    pub fn push(
        &mut self,
        frame_seq: u64,
        capture_timestamp_ms: u64,
        now_ms: u64,
        initial_delay_ms: u32,
    ) {
        if self.offset_ms.is_none() {
            self.offset_ms = Some(
                now_ms as f64 + initial_delay_ms as f64 - capture_timestamp_ms as f64,
            );
        }
        self.entries.insert((capture_timestamp_ms, frame_seq), ());
    }

    /// The head entry (earliest capture timestamp), if any.
    pub fn peek(&self) -> Option<PlaybackEntry> {
        let (&(capture, seq), _) = self.entries.iter().next()?;
        Some(self.entry(capture, seq))
    }

    /// Pop the head if its playout deadline has passed.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<PlaybackEntry> {
        let head = self.peek()?;
        if head.playout_timestamp_ms <= now_ms {
            self.entries
                .remove(&(head.capture_timestamp_ms, head.frame_seq));
            Some(head)
        } else {
            None
        }
    }

    /// Shift the playout offset (skew correction), milliseconds.
    pub fn adjust_offset(&mut self, delta_ms: f64) {
        if let Some(offset) = self.offset_ms.as_mut() {
            *offset += delta_ms;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.offset_ms = None;
    }

    fn entry(&self, capture_timestamp_ms: u64, frame_seq: u64) -> PlaybackEntry {
        let offset = self.offset_ms.unwrap_or(0.0);
        PlaybackEntry {
            frame_seq,
            capture_timestamp_ms,
            playout_timestamp_ms: (capture_timestamp_ms as f64 + offset).max(0.0) as u64,
        }
    }
}
