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

//! Producer-side counters. All counters are atomic so the face-thread side
//! channel and the capture path can both bump them without locking.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one producer stream.
#[derive(Debug, Default)]
pub struct ProducerStats {
    pub captured: AtomicU64,
    pub encoded: AtomicU64,
    pub dropped: AtomicU64,
    pub published_segments: AtomicU64,
    pub bytes_published: AtomicU64,
    pub sign_operations: AtomicU64,
    pub key_frames_published: AtomicU64,
    pub latest_requests: AtomicU64,
    pub live_requests: AtomicU64,
}

impl ProducerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, current_framerate: f64) -> ProducerStatsSnapshot {
        ProducerStatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            encoded: self.encoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            published_segments: self.published_segments.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            sign_operations: self.sign_operations.load(Ordering::Relaxed),
            key_frames_published: self.key_frames_published.load(Ordering::Relaxed),
            latest_requests: self.latest_requests.load(Ordering::Relaxed),
            live_requests: self.live_requests.load(Ordering::Relaxed),
            current_framerate,
        }
    }
}

/// Point-in-time view of [`ProducerStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerStatsSnapshot {
    pub captured: u64,
    pub encoded: u64,
    pub dropped: u64,
    pub published_segments: u64,
    pub bytes_published: u64,
    pub sign_operations: u64,
    pub key_frames_published: u64,
    pub latest_requests: u64,
    pub live_requests: u64,
    pub current_framerate: f64,
}
