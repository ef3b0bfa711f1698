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

//! Per-frame buffer slots.
//!
//! A slot is created on the first evidence of a frame (interest expressed or
//! data arrived) and walks `New → Assembling → Ready → Locked → Played`.
//! `Free` is the terminal state right before the buffer reclaims the memory.

use std::collections::BTreeMap;

use namecast_fec::Rs28Decoder;
use namecast_types::data::Data;
use namecast_types::frame::FrameType;
use namecast_types::meta::{ContentMetaEnvelope, FrameMeta};
use namecast_types::name::SegmentKind;
use namecast_types::SegmentsManifest;

/// Slot lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    New,
    Assembling,
    Ready,
    Locked,
    Played,
}

/// Per-segment consumer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentState {
    #[default]
    Pending,
    Missing,
    Received,
    Recovered,
}

/// Bookkeeping for one expected segment (or metadata object).
#[derive(Debug, Default)]
pub struct SegmentSlot {
    pub state: SegmentState,
    pub payload: Option<Vec<u8>>,
    pub arrival_ms: Option<u64>,
    pub rtx_count: u32,
}

impl SegmentSlot {
    fn is_settled(&self) -> bool {
        matches!(self.state, SegmentState::Received | SegmentState::Recovered)
    }

    fn is_exhausted(&self, max_rtx: u32) -> bool {
        self.state == SegmentState::Missing && self.rtx_count > max_rtx
    }
}

/// Outcome of feeding one data packet to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentArrival {
    Accepted {
        /// First object of this frame to arrive.
        first_arrival: bool,
        /// This packet revealed the frame's segment totals.
        totals_learned: bool,
    },
    Duplicate,
    /// Missing FinalBlockId or digest not covered by the manifest.
    ProtocolViolation,
}

/// Outcome of an assembly attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyOutcome {
    Incomplete,
    Ready,
    /// The frame can no longer be completed or recovered.
    Unrecoverable,
}

/// Outcome of an interest timeout against this slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Worth retransmitting; carries the retransmission count so far.
    Retransmit(u32),
    /// Retransmission budget exhausted.
    Exhausted,
    /// Data already arrived; nothing to do.
    Ignored,
}

/// Assembly state for one frame.
#[derive(Debug)]
pub struct BufferSlot {
    frame_seq: u64,
    state: SlotState,
    total_data: Option<usize>,
    total_parity: Option<usize>,
    data: BTreeMap<u64, SegmentSlot>,
    parity: BTreeMap<u64, SegmentSlot>,
    meta_slot: SegmentSlot,
    manifest_slot: SegmentSlot,
    manifest: Option<Data>,
    meta: Option<FrameMeta>,
    /// Largest full segment observed; the FEC shard size.
    seg_size: usize,
    assembled: Option<Vec<u8>>,
    recovered: bool,
    had_arrival: bool,
    pub first_express_ms: Option<u64>,
    pub first_arrival_ms: Option<u64>,
}

impl BufferSlot {
    pub fn new(frame_seq: u64) -> Self {
        BufferSlot {
            frame_seq,
            state: SlotState::New,
            total_data: None,
            total_parity: None,
            data: BTreeMap::new(),
            parity: BTreeMap::new(),
            meta_slot: SegmentSlot::default(),
            manifest_slot: SegmentSlot::default(),
            manifest: None,
            meta: None,
            seg_size: 0,
            assembled: None,
            recovered: false,
            had_arrival: false,
            first_express_ms: None,
            first_arrival_ms: None,
        }
    }

    pub fn frame_seq(&self) -> u64 {
        self.frame_seq
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn meta(&self) -> Option<&FrameMeta> {
        self.meta.as_ref()
    }

    pub fn is_key(&self) -> bool {
        self.meta
            .as_ref()
            .is_some_and(|m| m.frame_type == FrameType::Key)
    }

    /// Producer capture timestamp in milliseconds, once the meta is here.
    pub fn capture_timestamp_ms(&self) -> Option<u64> {
        self.meta.as_ref().map(|m| m.capture_timestamp.as_millis())
    }

    /// Generation delay reported by the producer, once the meta is here.
    pub fn generation_delay_ms(&self) -> Option<u64> {
        self.meta.as_ref().map(|m| m.generation_delay_ms)
    }

    pub fn total_data(&self) -> Option<usize> {
        self.total_data
    }

    pub fn total_parity(&self) -> Option<usize> {
        self.total_parity
    }

    pub fn fetched_data(&self) -> usize {
        self.data.values().filter(|s| s.is_settled()).count()
    }

    pub fn fetched_parity(&self) -> usize {
        self.parity.values().filter(|s| s.is_settled()).count()
    }

    /// Rough assembly progress, for the estimated-buffer-size metric.
    pub fn completion_ratio(&self) -> f64 {
        match self.total_data {
            Some(total) if total > 0 => (self.fetched_data() as f64 / total as f64).min(1.0),
            _ => 0.0,
        }
    }

    /// The assembled frame, once Ready.
    pub fn assembled_frame(&self) -> Option<&[u8]> {
        self.assembled.as_deref()
    }

    pub fn was_recovered(&self) -> bool {
        self.recovered
    }

    /// Record that an interest for `kind` went out.
    pub fn mark_expressed(&mut self, kind: SegmentKind, now_ms: u64) {
        self.first_express_ms.get_or_insert(now_ms);
        match kind {
            SegmentKind::Data(i) => {
                self.data.entry(i).or_default();
            }
            SegmentKind::Parity(i) => {
                self.parity.entry(i).or_default();
            }
            SegmentKind::Manifest | SegmentKind::FrameMeta => {}
        }
    }

    /// Feed one arriving packet.
    pub fn on_data(&mut self, kind: SegmentKind, data: &Data, now_ms: u64) -> SegmentArrival {
        let first_arrival = !self.had_arrival;
        let mut totals_learned = false;

        let accepted = match kind {
            SegmentKind::Manifest => {
                if self.manifest.is_some() {
                    return SegmentArrival::Duplicate;
                }
                self.manifest = Some(data.clone());
                self.manifest_slot.state = SegmentState::Received;
                self.manifest_slot.arrival_ms = Some(now_ms);
                true
            }
            SegmentKind::FrameMeta => {
                if self.meta.is_some() {
                    return SegmentArrival::Duplicate;
                }
                let meta = match ContentMetaEnvelope::decode(data.content())
                    .and_then(|e| e.frame_meta())
                {
                    Ok(meta) => meta,
                    Err(e) => {
                        log::warn!("frame #{} meta undecodable: {e}", self.frame_seq);
                        return SegmentArrival::ProtocolViolation;
                    }
                };
                if self.total_parity.is_none() {
                    self.total_parity = Some(meta.parity_size as usize);
                    totals_learned = true;
                }
                self.meta = Some(meta);
                self.meta_slot.state = SegmentState::Received;
                self.meta_slot.arrival_ms = Some(now_ms);
                true
            }
            SegmentKind::Data(i) => {
                match self.accept_segment(true, i, data, now_ms) {
                    Ok(learned) => {
                        totals_learned = learned;
                        true
                    }
                    Err(outcome) => return outcome,
                }
            }
            SegmentKind::Parity(i) => {
                match self.accept_segment(false, i, data, now_ms) {
                    Ok(learned) => {
                        totals_learned = learned;
                        true
                    }
                    Err(outcome) => return outcome,
                }
            }
        };

        if accepted {
            self.had_arrival = true;
            self.first_arrival_ms.get_or_insert(now_ms);
            if self.state == SlotState::New {
                self.state = SlotState::Assembling;
            }
        }

        SegmentArrival::Accepted {
            first_arrival,
            totals_learned,
        }
    }

    fn accept_segment(
        &mut self,
        is_data: bool,
        index: u64,
        data: &Data,
        now_ms: u64,
    ) -> Result<bool, SegmentArrival> {
        // Segment count must be discoverable from any arriving segment.
        let final_block = data
            .meta_info
            .final_block_id
            .as_ref()
            .and_then(|c| c.as_segment());
        let Some(last_index) = final_block else {
            log::warn!("frame #{} segment without FinalBlockId", self.frame_seq);
            return Err(SegmentArrival::ProtocolViolation);
        };

        if let Some(manifest) = &self.manifest {
            if !SegmentsManifest::has_data(manifest, data) {
                log::warn!(
                    "frame #{} segment {index} not covered by manifest",
                    self.frame_seq
                );
                return Err(SegmentArrival::ProtocolViolation);
            }
        }

        let total = last_index as usize + 1;
        let totals = if is_data {
            &mut self.total_data
        } else {
            &mut self.total_parity
        };
        let learned = totals.is_none();
        *totals = Some(total);

        let map = if is_data { &mut self.data } else { &mut self.parity };
        let entry = map.entry(index).or_default();
        if entry.is_settled() {
            return Err(SegmentArrival::Duplicate);
        }
        entry.state = SegmentState::Received;
        entry.payload = Some(data.content().to_vec());
        entry.arrival_ms = Some(now_ms);

        // Parity segments and non-final data segments are full sized.
        let is_final_data = is_data && index as usize == total - 1;
        if !is_final_data {
            self.seg_size = self.seg_size.max(data.content().len());
        }

        Ok(learned)
    }

    /// Record an interest timeout for `kind`.
    pub fn on_timeout(&mut self, kind: SegmentKind, max_rtx: u32) -> TimeoutOutcome {
        let slot = match kind {
            SegmentKind::Data(i) => self.data.entry(i).or_default(),
            SegmentKind::Parity(i) => self.parity.entry(i).or_default(),
            SegmentKind::Manifest => &mut self.manifest_slot,
            SegmentKind::FrameMeta => &mut self.meta_slot,
        };

        if slot.is_settled() {
            return TimeoutOutcome::Ignored;
        }
        slot.state = SegmentState::Missing;
        slot.rtx_count += 1;
        if slot.rtx_count <= max_rtx {
            TimeoutOutcome::Retransmit(slot.rtx_count)
        } else {
            TimeoutOutcome::Exhausted
        }
    }

    /// Try to complete the frame: direct assembly when every data segment is
    /// here, FEC recovery once data + parity reach the data count.
    pub fn try_assemble(&mut self, fec_enabled: bool, max_rtx: u32) -> AssemblyOutcome {
        if !matches!(self.state, SlotState::New | SlotState::Assembling) {
            return AssemblyOutcome::Incomplete;
        }
        let Some(total_data) = self.total_data else {
            if self.is_hopeless(fec_enabled, max_rtx) {
                return AssemblyOutcome::Unrecoverable;
            }
            return AssemblyOutcome::Incomplete;
        };

        // Playout cannot schedule a frame without its metadata.
        let meta_ready = self.meta.is_some();
        let fetched_data = self.fetched_data();

        if meta_ready && fetched_data == total_data {
            self.assemble_direct(total_data);
            self.state = SlotState::Ready;
            return AssemblyOutcome::Ready;
        }

        if meta_ready && fec_enabled {
            let total_parity = self.total_parity.unwrap_or(0);
            let fetched_parity = self.fetched_parity();
            if total_parity > 0
                && fetched_data + fetched_parity >= total_data
                && self.seg_size > 0
            {
                return match self.recover(total_data, total_parity) {
                    Ok(()) => {
                        self.state = SlotState::Ready;
                        AssemblyOutcome::Ready
                    }
                    Err(e) => {
                        log::warn!("frame #{} FEC recovery failed: {e}", self.frame_seq);
                        AssemblyOutcome::Unrecoverable
                    }
                };
            }
        }

        if self.is_hopeless(fec_enabled, max_rtx) {
            AssemblyOutcome::Unrecoverable
        } else {
            AssemblyOutcome::Incomplete
        }
    }

    /// True when the remaining unsettled segments can no longer bring the
    /// settled count up to `total_data`, or required metadata is gone.
    fn is_hopeless(&self, fec_enabled: bool, max_rtx: u32) -> bool {
        if self.meta_slot.is_exhausted(max_rtx) {
            return true;
        }

        let Some(total_data) = self.total_data else {
            // Nothing revealed the totals yet; give up once every expressed
            // data segment has burned its retransmission budget.
            return !self.data.is_empty()
                && self.data.values().all(|s| s.is_exhausted(max_rtx));
        };

        let dead_data = self
            .data
            .values()
            .filter(|s| s.is_exhausted(max_rtx))
            .count();
        let dead_parity = self
            .parity
            .values()
            .filter(|s| s.is_exhausted(max_rtx))
            .count();

        let max_data = total_data.saturating_sub(dead_data);
        let max_parity = if fec_enabled {
            self.total_parity.unwrap_or(0).saturating_sub(dead_parity)
        } else {
            0
        };
        max_data + max_parity < total_data
    }

    fn assemble_direct(&mut self, total_data: usize) {
        let mut frame = Vec::new();
        for i in 0..total_data as u64 {
            if let Some(payload) = self.data.get(&i).and_then(|s| s.payload.as_ref()) {
                frame.extend_from_slice(payload);
            }
        }
        self.assembled = Some(frame);
    }

    fn recover(&mut self, total_data: usize, total_parity: usize) -> namecast_fec::Result<()> {
        let seg_size = self.seg_size;
        let decoder = Rs28Decoder::new(total_data, total_parity, seg_size)?;

        let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(total_data + total_parity);
        for i in 0..total_data as u64 {
            let shard = self.data.get(&i).and_then(|s| s.payload.clone()).map(|mut p| {
                p.resize(seg_size, 0);
                p
            });
            shards.push(shard);
        }
        for i in 0..total_parity as u64 {
            shards.push(self.parity.get(&i).and_then(|s| s.payload.clone()));
        }

        let recovered = decoder.decode(shards)?;

        // The true length of a recovered final segment is unknown; keep the
        // zero padding there. Everywhere else the exact bytes are restored.
        let last_len = self
            .data
            .get(&(total_data as u64 - 1))
            .and_then(|s| s.payload.as_ref())
            .map(|p| p.len())
            .unwrap_or(seg_size);
        let frame_len = (total_data - 1) * seg_size + last_len;

        for i in 0..total_data as u64 {
            let entry = self.data.entry(i).or_default();
            if !entry.is_settled() {
                let start = i as usize * seg_size;
                entry.payload = Some(recovered[start..start + seg_size].to_vec());
                entry.state = SegmentState::Recovered;
            }
        }

        let mut frame = recovered;
        frame.truncate(frame_len);
        // Re-append the exact final segment if we had it (it may be shorter
        // than a shard).
        if let Some(last) = self
            .data
            .get(&(total_data as u64 - 1))
            .and_then(|s| s.payload.as_ref())
        {
            frame.truncate((total_data - 1) * seg_size);
            frame.extend_from_slice(last);
        }

        self.assembled = Some(frame);
        self.recovered = true;
        Ok(())
    }

    /// Hand the slot to playout. Only Ready slots can be locked.
    pub fn lock(&mut self) -> bool {
        if self.state == SlotState::Ready {
            self.state = SlotState::Locked;
            true
        } else {
            false
        }
    }

    /// The renderer consumed (or skipped) this slot.
    pub fn mark_played(&mut self) {
        if matches!(self.state, SlotState::Locked | SlotState::Ready) {
            self.state = SlotState::Played;
        }
    }

    /// Release memory eagerly; the buffer drops the slot right after.
    pub fn free(&mut self) {
        self.state = SlotState::Free;
        self.data.clear();
        self.parity.clear();
        self.assembled = None;
        self.manifest = None;
    }
}
