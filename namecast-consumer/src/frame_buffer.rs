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

//! The jitter buffer: a map of per-frame slots keyed by frame sequence.
//!
//! Accepts two signals from the face — `new_data` and `interest_timeout` —
//! and exposes playable/estimated/target size metrics that drive the
//! pipeliner and playout.

use std::collections::BTreeMap;
use std::sync::Arc;

use namecast_types::data::Data;
use namecast_types::estimators::{FreqMeter, RttEstimator};
use namecast_types::name::{FrameAddress, SegmentKind};

use crate::buffer_estimator::BufferEstimator;
use crate::slot::{
    AssemblyOutcome, BufferSlot, SegmentArrival, SlotState, TimeoutOutcome,
};

/// Fallback producer rate before any live metadata or observation, fps.
const DEFAULT_PRODUCER_RATE: f64 = 30.0;
/// Window for the observed frame-completion rate, milliseconds.
const RATE_WINDOW_MS: u64 = 1000;

/// Frame buffer configuration.
#[derive(Debug, Clone, Copy)]
pub struct FrameBufferConfig {
    pub fec_enabled: bool,
    /// Minimal jitter buffer size, milliseconds.
    pub jitter_size_ms: u32,
    /// Retransmissions allowed per segment.
    pub max_rtx: u32,
}

/// What a buffer signal meant, for the pipeliner and playout to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    /// First object of this frame arrived.
    FirstArrival { frame_seq: u64 },
    /// The frame's exact segment totals became known.
    TotalsKnown {
        frame_seq: u64,
        total_data: usize,
        total_parity: usize,
    },
    /// The slot completed (directly or through FEC recovery).
    FrameReady {
        frame_seq: u64,
        is_key: bool,
        capture_timestamp_ms: u64,
    },
    /// Assembly failed for good; the slot was dropped.
    RecoveryFailed { frame_seq: u64, is_key: bool },
    /// A segment timed out and is worth retransmitting.
    SegmentTimeout {
        frame_seq: u64,
        kind: SegmentKind,
        rtx_count: u32,
    },
}

/// The consumer-side jitter buffer.
pub struct FrameBuffer {
    config: FrameBufferConfig,
    slots: BTreeMap<u64, BufferSlot>,
    /// Frames below this were handed to playout; slots behind it are reaped.
    playout_cursor: u64,
    estimator: BufferEstimator,
    rtt: Arc<RttEstimator>,
    completion_meter: FreqMeter,
    /// Producer rate advertised through `_live`.
    rate_hint: f64,
    dropped_slots: u64,
    protocol_violations: u64,
}

impl FrameBuffer {
    pub fn new(config: FrameBufferConfig, rtt: Arc<RttEstimator>) -> Self {
        let estimator = BufferEstimator::new(rtt.clone(), config.jitter_size_ms);
        FrameBuffer {
            config,
            slots: BTreeMap::new(),
            playout_cursor: 0,
            estimator,
            rtt,
            completion_meter: FreqMeter::new(RATE_WINDOW_MS),
            rate_hint: 0.0,
            dropped_slots: 0,
            protocol_violations: 0,
        }
    }

    /// Producer rate learned from `_live` metadata.
    pub fn set_rate_hint(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rate_hint = rate;
        }
    }

    /// Create the slot for `frame_seq` on interest expression.
    pub fn on_express(&mut self, frame_seq: u64, kind: SegmentKind, now_ms: u64) {
        let slot = self
            .slots
            .entry(frame_seq)
            .or_insert_with(|| BufferSlot::new(frame_seq));
        slot.mark_expressed(kind, now_ms);
    }

    /// Feed arriving frame-level data. Returns the state changes it caused.
    pub fn new_data(&mut self, addr: FrameAddress, data: &Data, now_ms: u64) -> Vec<BufferEvent> {
        let mut events = Vec::new();

        if addr.frame_seq < self.playout_cursor {
            log::trace!("ignoring data for played-out frame #{}", addr.frame_seq);
            return events;
        }

        let slot = self
            .slots
            .entry(addr.frame_seq)
            .or_insert_with(|| BufferSlot::new(addr.frame_seq));

        match slot.on_data(addr.kind, data, now_ms) {
            SegmentArrival::Accepted {
                first_arrival,
                totals_learned,
            } => {
                if first_arrival {
                    events.push(BufferEvent::FirstArrival {
                        frame_seq: addr.frame_seq,
                    });
                }
                if totals_learned {
                    if let (Some(total_data), total_parity) =
                        (slot.total_data(), slot.total_parity().unwrap_or(0))
                    {
                        events.push(BufferEvent::TotalsKnown {
                            frame_seq: addr.frame_seq,
                            total_data,
                            total_parity,
                        });
                    }
                }
            }
            SegmentArrival::Duplicate => {
                log::trace!("duplicate {:?} for frame #{}", addr.kind, addr.frame_seq);
                return events;
            }
            SegmentArrival::ProtocolViolation => {
                self.protocol_violations += 1;
                return events;
            }
        }

        self.run_assembly(addr.frame_seq, now_ms, &mut events);
        events
    }

    /// Mark a timed-out segment missing and flag it for retransmission.
    pub fn interest_timeout(&mut self, addr: FrameAddress, now_ms: u64) -> Vec<BufferEvent> {
        let mut events = Vec::new();
        let max_rtx = self.config.max_rtx;
        let Some(slot) = self.slots.get_mut(&addr.frame_seq) else {
            return events;
        };

        match slot.on_timeout(addr.kind, max_rtx) {
            TimeoutOutcome::Retransmit(rtx_count) => {
                events.push(BufferEvent::SegmentTimeout {
                    frame_seq: addr.frame_seq,
                    kind: addr.kind,
                    rtx_count,
                });
            }
            TimeoutOutcome::Exhausted => {
                log::debug!(
                    "frame #{} gave up on {:?} after {max_rtx} retransmissions",
                    addr.frame_seq,
                    addr.kind
                );
                self.run_assembly(addr.frame_seq, now_ms, &mut events);
            }
            TimeoutOutcome::Ignored => {}
        }
        events
    }

    fn run_assembly(&mut self, frame_seq: u64, now_ms: u64, events: &mut Vec<BufferEvent>) {
        let fec = self.config.fec_enabled;
        let max_rtx = self.config.max_rtx;
        let Some(slot) = self.slots.get_mut(&frame_seq) else {
            return;
        };

        match slot.try_assemble(fec, max_rtx) {
            AssemblyOutcome::Ready => {
                let is_key = slot.is_key();
                let capture_timestamp_ms = slot.capture_timestamp_ms().unwrap_or(0);
                self.completion_meter.tick(now_ms);
                events.push(BufferEvent::FrameReady {
                    frame_seq,
                    is_key,
                    capture_timestamp_ms,
                });
            }
            AssemblyOutcome::Unrecoverable => {
                let is_key = slot.is_key();
                slot.free();
                self.slots.remove(&frame_seq);
                self.dropped_slots += 1;
                events.push(BufferEvent::RecoveryFailed { frame_seq, is_key });
            }
            AssemblyOutcome::Incomplete => {}
        }
    }

    // ── Playout interface ─────────────────────────────────────────────────────

    /// Lock a Ready slot and hand out its assembled frame.
    pub fn acquire(&mut self, frame_seq: u64) -> Option<(namecast_types::meta::FrameMeta, Vec<u8>)> {
        let slot = self.slots.get_mut(&frame_seq)?;
        if !slot.lock() {
            return None;
        }
        let meta = slot.meta()?.clone();
        let frame = slot.assembled_frame()?.to_vec();
        Some((meta, frame))
    }

    /// Mark a Locked slot played and reclaim it.
    pub fn mark_played(&mut self, frame_seq: u64) {
        if let Some(slot) = self.slots.get_mut(&frame_seq) {
            slot.mark_played();
            slot.free();
        }
        self.slots.remove(&frame_seq);
        self.advance_cursor(frame_seq + 1);
    }

    /// Advance the playout pointer; older non-Locked slots are reaped.
    pub fn advance_cursor(&mut self, cursor: u64) {
        if cursor <= self.playout_cursor {
            return;
        }
        self.playout_cursor = cursor;
        let stale: Vec<u64> = self
            .slots
            .range(..cursor)
            .filter(|(_, s)| s.state() != SlotState::Locked)
            .map(|(&seq, _)| seq)
            .collect();
        for seq in stale {
            log::trace!("reaping stale slot #{seq}");
            self.slots.remove(&seq);
            self.dropped_slots += 1;
        }
    }

    /// Drop every slot not currently Locked. Used by stop and rebuffering.
    pub fn discard_unlocked(&mut self) {
        self.slots.retain(|_, s| s.state() == SlotState::Locked);
    }

    // ── Metrics ───────────────────────────────────────────────────────────────

    /// Milliseconds of contiguous Ready frames awaiting playout.
    pub fn playable_size_ms(&self) -> u32 {
        let sample = self.sample_ms();
        let ready = self
            .slots
            .values()
            .filter(|s| matches!(s.state(), SlotState::Ready))
            .count();
        (ready as f64 * sample) as u32
    }

    /// Playable size plus unassembled slots weighted by completion progress.
    pub fn estimated_size_ms(&self) -> u32 {
        let sample = self.sample_ms();
        let assembling: f64 = self
            .slots
            .values()
            .filter(|s| matches!(s.state(), SlotState::Assembling | SlotState::New))
            .map(|s| s.completion_ratio().max(0.5))
            .sum();
        self.playable_size_ms() + (assembling * sample) as u32
    }

    /// Target jitter buffer size from RTT and configuration.
    pub fn target_size_ms(&self) -> u32 {
        self.estimator.target_ms()
    }

    /// Producer rate: observed frame completions, else the `_live` hint.
    pub fn current_rate(&self) -> f64 {
        let observed = self.completion_meter.value();
        if observed >= 1.0 {
            observed
        } else if self.rate_hint > 0.0 {
            self.rate_hint
        } else {
            DEFAULT_PRODUCER_RATE
        }
    }

    pub fn rtt_ms(&self) -> f64 {
        self.rtt.estimate()
    }

    pub fn slot(&self, frame_seq: u64) -> Option<&BufferSlot> {
        self.slots.get(&frame_seq)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn dropped_slots(&self) -> u64 {
        self.dropped_slots
    }

    pub fn protocol_violations(&self) -> u64 {
        self.protocol_violations
    }

    pub fn playout_cursor(&self) -> u64 {
        self.playout_cursor
    }

    fn sample_ms(&self) -> f64 {
        1000.0 / self.current_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use namecast_types::frame::FrameType;
    use namecast_types::meta::{ContentMetaEnvelope, FrameMeta, Timestamp};
    use namecast_types::name::{self, Component, Name};

    fn test_config(fec: bool) -> FrameBufferConfig {
        FrameBufferConfig {
            fec_enabled: fec,
            jitter_size_ms: 150,
            max_rtx: 3,
        }
    }

    fn create_test_buffer(fec: bool) -> FrameBuffer {
        FrameBuffer::new(test_config(fec), Arc::new(RttEstimator::new()))
    }

    fn stream() -> Name {
        Name::from_uri("/test/stream")
    }

    fn segment(seq: u64, i: u64, total: usize, payload: &[u8]) -> (FrameAddress, Data) {
        let mut d = Data::new(name::data_segment(&name::frame(&stream(), seq), i));
        d.meta_info.final_block_id = Some(Component::segment(total as u64 - 1));
        d.set_content(payload.to_vec());
        d.sign_with_digest();
        (
            FrameAddress {
                frame_seq: seq,
                kind: SegmentKind::Data(i),
            },
            d,
        )
    }

    fn frame_meta(seq: u64, frame_type: FrameType, capture_ms: u64) -> (FrameAddress, Data) {
        let meta = FrameMeta {
            capture_timestamp: Timestamp::from_nanos(capture_ms * 1_000_000),
            parity_size: 0,
            gop_number: 0,
            gop_position: seq,
            frame_type,
            generation_delay_ms: 0,
        };
        let mut d = Data::new(name::frame_meta(&name::frame(&stream(), seq)));
        d.set_content(
            ContentMetaEnvelope::wrap(&meta, capture_ms)
                .unwrap()
                .encode()
                .unwrap(),
        );
        d.sign_with_digest();
        (
            FrameAddress {
                frame_seq: seq,
                kind: SegmentKind::FrameMeta,
            },
            d,
        )
    }

    fn complete_frame(buffer: &mut FrameBuffer, seq: u64, now: u64) -> Vec<BufferEvent> {
        let mut events = Vec::new();
        let (addr, d) = frame_meta(seq, FrameType::Key, now);
        events.extend(buffer.new_data(addr, &d, now));
        let (addr, d) = segment(seq, 0, 1, b"frame-bytes");
        events.extend(buffer.new_data(addr, &d, now));
        events
    }

    #[test]
    fn single_frame_becomes_ready() {
        let mut buffer = create_test_buffer(false);
        let events = complete_frame(&mut buffer, 0, 1000);

        assert!(events.contains(&BufferEvent::FirstArrival { frame_seq: 0 }));
        assert!(events.iter().any(|e| matches!(
            e,
            BufferEvent::FrameReady {
                frame_seq: 0,
                is_key: true,
                ..
            }
        )));
        assert_eq!(buffer.slot(0).unwrap().state(), SlotState::Ready);
        assert!(buffer.playable_size_ms() > 0);
    }

    #[test]
    fn totals_surface_once() {
        let mut buffer = create_test_buffer(false);
        let (addr, d) = segment(3, 1, 4, b"xxxx");
        let events = buffer.new_data(addr, &d, 0);
        assert!(events.contains(&BufferEvent::TotalsKnown {
            frame_seq: 3,
            total_data: 4,
            total_parity: 0
        }));

        let (addr, d) = segment(3, 2, 4, b"yyyy");
        let events = buffer.new_data(addr, &d, 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, BufferEvent::TotalsKnown { .. })));
    }

    #[test]
    fn timeout_flags_retransmission_until_exhausted() {
        let mut buffer = create_test_buffer(false);
        buffer.on_express(5, SegmentKind::Data(0), 0);
        let addr = FrameAddress {
            frame_seq: 5,
            kind: SegmentKind::Data(0),
        };

        for rtx in 1..=3 {
            let events = buffer.interest_timeout(addr, rtx as u64 * 100);
            assert_eq!(
                events,
                vec![BufferEvent::SegmentTimeout {
                    frame_seq: 5,
                    kind: SegmentKind::Data(0),
                    rtx_count: rtx
                }]
            );
        }
        // Budget exhausted: no more retransmission events.
        let events = buffer.interest_timeout(addr, 400);
        assert!(!events
            .iter()
            .any(|e| matches!(e, BufferEvent::SegmentTimeout { .. })));
    }

    #[test]
    fn exhausted_frame_is_dropped_and_reported() {
        let mut buffer = create_test_buffer(false);
        // Meta + segment 0 of 2 arrive; segment 1 never does.
        let (addr, d) = frame_meta(2, FrameType::Key, 0);
        buffer.new_data(addr, &d, 0);
        let (addr, d) = segment(2, 0, 2, b"xx");
        buffer.new_data(addr, &d, 0);

        let addr = FrameAddress {
            frame_seq: 2,
            kind: SegmentKind::Data(1),
        };
        buffer.on_express(2, SegmentKind::Data(1), 0);
        for _ in 0..3 {
            buffer.interest_timeout(addr, 100);
        }
        let events = buffer.interest_timeout(addr, 400);
        assert!(events.contains(&BufferEvent::RecoveryFailed {
            frame_seq: 2,
            is_key: true
        }));
        assert!(buffer.slot(2).is_none());
        assert_eq!(buffer.dropped_slots(), 1);
    }

    #[test]
    fn played_frames_are_reaped_and_late_data_ignored() {
        let mut buffer = create_test_buffer(false);
        complete_frame(&mut buffer, 0, 1000);

        let (meta, frame) = buffer.acquire(0).unwrap();
        assert_eq!(meta.frame_type, FrameType::Key);
        assert_eq!(frame, b"frame-bytes");
        buffer.mark_played(0);

        assert!(buffer.slot(0).is_none());
        // Late arrival for the played frame creates nothing.
        let (addr, d) = segment(0, 0, 1, b"frame-bytes");
        assert!(buffer.new_data(addr, &d, 2000).is_empty());
        assert_eq!(buffer.slot_count(), 0);
    }

    #[test]
    fn locked_slots_survive_cursor_advance() {
        let mut buffer = create_test_buffer(false);
        complete_frame(&mut buffer, 0, 1000);
        complete_frame(&mut buffer, 1, 1033);

        assert!(buffer.acquire(0).is_some()); // frame 0 is Locked
        buffer.advance_cursor(2);

        assert!(buffer.slot(0).is_some(), "locked slot must not be reaped");
        assert!(buffer.slot(1).is_none(), "ready slot behind cursor is reaped");
    }

    #[test]
    fn rate_hint_backs_observed_rate() {
        let mut buffer = create_test_buffer(false);
        assert_eq!(buffer.current_rate(), DEFAULT_PRODUCER_RATE);
        buffer.set_rate_hint(25.0);
        assert_eq!(buffer.current_rate(), 25.0);
    }

    #[test]
    fn discard_unlocked_keeps_locked() {
        let mut buffer = create_test_buffer(false);
        complete_frame(&mut buffer, 0, 1000);
        complete_frame(&mut buffer, 1, 1033);
        buffer.acquire(0);

        buffer.discard_unlocked();
        assert_eq!(buffer.slot_count(), 1);
        assert_eq!(buffer.slot(0).unwrap().state(), SlotState::Locked);
    }
}
