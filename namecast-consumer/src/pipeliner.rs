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

//! The pipeliner: decides which interests to express and when.
//!
//! State machine: `Inactive → Buffering → Chasing → Fetching`, with any
//! state falling back to `Buffering` on rebuffering. Buffering bootstraps
//! from `_latest` to the newest GOP start; Chasing runs the fetch window
//! while the chase estimator locks onto the producer's pace; Fetching is
//! steady state with retransmissions and a low-water rebuffer guard.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use namecast_types::data::{Data, Interest};
use namecast_types::estimators::{Average, FreqMeter, RttEstimator, Window};
use namecast_types::meta::{DelegationSet, LiveMeta, StreamMeta};
use namecast_types::name::{self, Name, SegmentKind, StreamAddress};

use crate::chase_estimator::ChaseEstimator;
use crate::frame_buffer::{BufferEvent, FrameBuffer};
use crate::interest_queue::{InterestQueue, BOOTSTRAP_PRIORITY, FETCH_PRIORITY, RTX_PRIORITY};

/// Time in Fetching before the low-water guard may trigger, milliseconds.
const REBUFFER_GRACE_MS: u64 = 500;
/// Rebuffer when the playable buffer falls below this fraction of target.
const LOW_WATER_FRACTION: f64 = 0.25;
/// Window for the retransmission frequency meter, milliseconds.
const RTX_RATE_WINDOW_MS: u64 = 1000;
/// Window for the observed per-frame segment-count averages.
const SEG_AVG_WINDOW: usize = 30;

/// Pipeliner states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinerState {
    Inactive,
    Buffering,
    Chasing,
    Fetching,
}

/// Callbacks surfaced to the consumer owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinerEvent {
    /// First transition into Fetching.
    BufferingEnded,
    /// Transition back to Buffering after Fetching.
    RebufferingOccurred,
}

/// Pipeliner tunables.
#[derive(Debug, Clone, Copy)]
pub struct PipelinerConfig {
    pub fec_enabled: bool,
    pub max_rtx: u32,
    /// Interest lifetime bounds; the working lifetime is `2 · RTT` clamped
    /// into this range.
    pub lifetime_floor_ms: u32,
    pub lifetime_ceiling_ms: u32,
}

impl Default for PipelinerConfig {
    fn default() -> Self {
        PipelinerConfig {
            fec_enabled: true,
            max_rtx: 3,
            lifetime_floor_ms: 50,
            lifetime_ceiling_ms: 2000,
        }
    }
}

/// Segment-count estimates learned from `_live` metadata.
#[derive(Debug, Clone, Copy, Default)]
struct SegEstimates {
    delta_data: f64,
    delta_parity: f64,
    key_data: f64,
    key_parity: f64,
}

/// What has been expressed for one in-flight frame.
#[derive(Debug, Default)]
struct FramePlan {
    expressed_data: u64,
    expressed_parity: u64,
}

/// The consumer's fetch engine.
pub struct Pipeliner {
    config: PipelinerConfig,
    stream_prefix: Name,
    state: PipelinerState,
    rtt: Arc<RttEstimator>,
    chase: ChaseEstimator,
    /// Next frame sequence to plan, once bootstrapped.
    next_frame_seq: Option<u64>,
    /// The Key frame the bootstrap anchored on.
    anchor_frame: Option<u64>,
    in_flight: BTreeMap<u64, FramePlan>,
    known_keys: BTreeSet<u64>,
    estimates: SegEstimates,
    stream_meta: Option<StreamMeta>,
    entered_fetching_ms: Option<u64>,
    rtx_num: u64,
    rtx_meter: FreqMeter,
    rebuffering_events: u64,
    seg_num_delta: Average,
    seg_num_key: Average,
}

impl Pipeliner {
    pub fn new(stream_prefix: Name, config: PipelinerConfig, rtt: Arc<RttEstimator>) -> Self {
        Pipeliner {
            config,
            stream_prefix,
            state: PipelinerState::Inactive,
            rtt,
            chase: ChaseEstimator::new(),
            next_frame_seq: None,
            anchor_frame: None,
            in_flight: BTreeMap::new(),
            known_keys: BTreeSet::new(),
            estimates: SegEstimates::default(),
            stream_meta: None,
            entered_fetching_ms: None,
            rtx_num: 0,
            rtx_meter: FreqMeter::new(RTX_RATE_WINDOW_MS),
            rebuffering_events: 0,
            seg_num_delta: Average::new(Window::Samples(SEG_AVG_WINDOW)),
            seg_num_key: Average::new(Window::Samples(SEG_AVG_WINDOW)),
        }
    }

    pub fn state(&self) -> PipelinerState {
        self.state
    }

    pub fn rtx_num(&self) -> u64 {
        self.rtx_num
    }

    /// Retransmissions per second over the last second.
    pub fn rtx_freq(&self) -> f64 {
        self.rtx_meter.value()
    }

    pub fn rebuffering_events(&self) -> u64 {
        self.rebuffering_events
    }

    /// Observed average segment count per frame of the given type.
    pub fn avg_seg_num(&self, is_key: bool) -> f64 {
        if is_key {
            self.seg_num_key.value()
        } else {
            self.seg_num_delta.value()
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Begin consuming: bootstrap from the `_latest` pointer.
    pub fn start(&mut self, queue: &mut InterestQueue) {
        if self.state != PipelinerState::Inactive {
            return;
        }
        self.state = PipelinerState::Buffering;
        self.express_latest(queue);
        log::debug!("pipeliner: Inactive -> Buffering");
    }

    /// Tear down all expression state. Outstanding interests die with the
    /// cleared queue.
    pub fn stop(&mut self, buffer: &mut FrameBuffer, queue: &mut InterestQueue) {
        self.state = PipelinerState::Inactive;
        self.in_flight.clear();
        self.next_frame_seq = None;
        self.anchor_frame = None;
        queue.clear();
        buffer.discard_unlocked();
        log::debug!("pipeliner stopped");
    }

    /// Caller-initiated rebuffering. Idempotent.
    pub fn trigger_rebuffering(
        &mut self,
        buffer: &mut FrameBuffer,
        queue: &mut InterestQueue,
    ) -> Vec<PipelinerEvent> {
        match self.state {
            PipelinerState::Inactive | PipelinerState::Buffering => Vec::new(),
            PipelinerState::Chasing | PipelinerState::Fetching => self.rebuffer(buffer, queue),
        }
    }

    /// A non-frame object arrived (bootstrap path).
    pub fn on_bootstrap_data(
        &mut self,
        addr: &StreamAddress,
        data: &Data,
        queue: &mut InterestQueue,
        buffer: &mut FrameBuffer,
        now_ms: u64,
    ) {
        match addr {
            StreamAddress::Latest => {
                if self.state != PipelinerState::Buffering || self.anchor_frame.is_some() {
                    return;
                }
                let Ok(set) = DelegationSet::decode(data.content()) else {
                    log::warn!("undecodable _latest pointer");
                    return;
                };
                // Entry 1 names the newest GOP; chase its start pointer to
                // land on a Key frame.
                if let Some(gop_seq) = set.get(1).and_then(|n| Self::trailing_sequence(n)) {
                    self.express_bootstrap(name::gop_start(&self.stream_prefix, gop_seq), queue);
                    self.express_bootstrap(
                        self.stream_prefix.clone().append_str(name::LIVE),
                        queue,
                    );
                    if self.stream_meta.is_none() {
                        self.express_bootstrap(name::stream_meta(&self.stream_prefix), queue);
                    }
                    log::debug!("bootstrap: chasing GOP {gop_seq} start");
                } else if let Some(frame_seq) =
                    set.get(0).and_then(|n| Self::trailing_sequence(n))
                {
                    // Degenerate pointer: anchor directly on the newest frame.
                    self.anchor(frame_seq, now_ms, buffer, queue);
                }
            }
            StreamAddress::Live => {
                if let Ok(live) = LiveMeta::decode(data.content()) {
                    self.estimates = SegEstimates {
                        delta_data: live.segnum_delta,
                        delta_parity: live.segnum_delta_parity,
                        key_data: live.segnum_key,
                        key_parity: live.segnum_key_parity,
                    };
                    buffer.set_rate_hint(live.framerate);
                    log::debug!(
                        "live meta: rate {:.1} fps, delta {:.1}+{:.1}, key {:.1}+{:.1}",
                        live.framerate,
                        live.segnum_delta,
                        live.segnum_delta_parity,
                        live.segnum_key,
                        live.segnum_key_parity
                    );
                }
            }
            StreamAddress::Gop { gop_seq, start } => {
                if !start
                    || self.state != PipelinerState::Buffering
                    || self.anchor_frame.is_some()
                {
                    return;
                }
                let Ok(set) = DelegationSet::decode(data.content()) else {
                    log::warn!("undecodable GOP {gop_seq} pointer");
                    return;
                };
                if let Some(frame_seq) = set.get(0).and_then(|n| Self::trailing_sequence(n)) {
                    self.known_keys.insert(frame_seq);
                    self.anchor(frame_seq, now_ms, buffer, queue);
                }
            }
            StreamAddress::StreamMeta => {
                if self.stream_meta.is_none() {
                    match StreamMeta::decode(data.content()) {
                        Ok(meta) => {
                            log::debug!(
                                "stream meta: {}x{} \"{}\"",
                                meta.width,
                                meta.height,
                                meta.description
                            );
                            self.stream_meta = Some(meta);
                        }
                        Err(e) => log::warn!("undecodable stream meta: {e}"),
                    }
                }
            }
            StreamAddress::Frame(_) => {}
        }
    }

    /// Stream description, once the `_meta` object has been fetched.
    pub fn stream_meta(&self) -> Option<&StreamMeta> {
        self.stream_meta.as_ref()
    }

    /// A bootstrap interest timed out; keep knocking while Buffering.
    pub fn on_bootstrap_timeout(&mut self, addr: &StreamAddress, queue: &mut InterestQueue) {
        if self.state != PipelinerState::Buffering {
            return;
        }
        match addr {
            StreamAddress::Latest => self.express_latest(queue),
            StreamAddress::Live => {
                self.express_bootstrap(self.stream_prefix.clone().append_str(name::LIVE), queue)
            }
            StreamAddress::Gop { gop_seq, start } if *start => {
                self.express_bootstrap(name::gop_start(&self.stream_prefix, *gop_seq), queue)
            }
            StreamAddress::StreamMeta if self.stream_meta.is_none() => {
                self.express_bootstrap(name::stream_meta(&self.stream_prefix), queue)
            }
            _ => {}
        }
    }

    /// Every frame-level arrival feeds the chase estimator.
    pub fn on_segment_arrival(&mut self, now_ms: u64) {
        self.chase.new_sample(now_ms);
    }

    /// React to one frame-buffer state change.
    pub fn on_buffer_event(
        &mut self,
        event: &BufferEvent,
        now_ms: u64,
        buffer: &mut FrameBuffer,
        queue: &mut InterestQueue,
    ) {
        match *event {
            BufferEvent::FirstArrival { frame_seq } => {
                if self.state == PipelinerState::Buffering && self.anchor_frame == Some(frame_seq) {
                    self.state = PipelinerState::Chasing;
                    log::debug!("pipeliner: Buffering -> Chasing (key #{frame_seq} assembling)");
                }
            }
            BufferEvent::TotalsKnown {
                frame_seq,
                total_data,
                total_parity,
            } => {
                self.top_up(frame_seq, total_data, total_parity, now_ms, buffer, queue);
            }
            BufferEvent::FrameReady { frame_seq, is_key, .. } => {
                if let Some(slot) = buffer.slot(frame_seq) {
                    let segs = slot.fetched_data() + slot.fetched_parity();
                    if is_key {
                        self.seg_num_key.new_value(now_ms, segs as f64);
                    } else {
                        self.seg_num_delta.new_value(now_ms, segs as f64);
                    }
                }
                self.in_flight.remove(&frame_seq);
            }
            BufferEvent::RecoveryFailed { frame_seq, .. } => {
                self.in_flight.remove(&frame_seq);
            }
            BufferEvent::SegmentTimeout {
                frame_seq,
                kind,
                rtx_count,
            } => {
                if self.state == PipelinerState::Inactive {
                    return;
                }
                self.rtx_num += 1;
                self.rtx_meter.tick(now_ms);
                log::trace!(
                    "rtx #{rtx_count} for frame #{frame_seq} {:?}",
                    kind
                );
                buffer.on_express(frame_seq, kind, now_ms);
                queue.enqueue(
                    Interest::new(self.segment_name(frame_seq, kind))
                        .with_lifetime(self.interest_lifetime()),
                    RTX_PRIORITY,
                );
            }
        }
    }

    /// Window upkeep and state transitions. Call after feeding arrivals.
    pub fn drive(
        &mut self,
        now_ms: u64,
        buffer: &mut FrameBuffer,
        queue: &mut InterestQueue,
    ) -> Vec<PipelinerEvent> {
        match self.state {
            PipelinerState::Inactive | PipelinerState::Buffering => Vec::new(),
            PipelinerState::Chasing => {
                self.fill_window(now_ms, buffer, queue);
                let buffered_enough =
                    buffer.playable_size_ms() >= buffer.target_size_ms();
                if self.chase.converged() || buffered_enough {
                    self.state = PipelinerState::Fetching;
                    self.entered_fetching_ms = Some(now_ms);
                    log::debug!(
                        "pipeliner: Chasing -> Fetching (converged: {}, buffered: {})",
                        self.chase.converged(),
                        buffered_enough
                    );
                    vec![PipelinerEvent::BufferingEnded]
                } else {
                    Vec::new()
                }
            }
            PipelinerState::Fetching => {
                self.fill_window(now_ms, buffer, queue);
                let past_grace = self
                    .entered_fetching_ms
                    .is_some_and(|t| now_ms.saturating_sub(t) > REBUFFER_GRACE_MS);
                let low_water =
                    (buffer.playable_size_ms() as f64) < LOW_WATER_FRACTION * buffer.target_size_ms() as f64;
                if past_grace && low_water {
                    log::warn!("buffer drained below low-water mark, rebuffering");
                    self.rebuffer(buffer, queue)
                } else {
                    Vec::new()
                }
            }
        }
    }

    // ── internals ─────────────────────────────────────────────────────────────

    fn anchor(&mut self, frame_seq: u64, now_ms: u64, buffer: &mut FrameBuffer, queue: &mut InterestQueue) {
        self.anchor_frame = Some(frame_seq);
        self.next_frame_seq = Some(frame_seq);
        self.plan_next_frame(now_ms, buffer, queue);
        log::debug!("bootstrap anchored at frame #{frame_seq}");
    }

    /// Sliding window size: enough in-flight frames to cover the target
    /// buffer at the producer's rate. Never below 1.
    fn window(&self, buffer: &FrameBuffer) -> usize {
        let frames =
            (buffer.target_size_ms() as f64 / 1000.0 * buffer.current_rate()).ceil() as usize;
        frames.max(1)
    }

    fn fill_window(&mut self, now_ms: u64, buffer: &mut FrameBuffer, queue: &mut InterestQueue) {
        let w = self.window(buffer);
        while self.in_flight.len() < w && self.next_frame_seq.is_some() {
            self.plan_next_frame(now_ms, buffer, queue);
        }
    }

    /// Express the whole estimated batch for the next frame: frame meta and
    /// manifest alongside the first data segment, then the estimated data
    /// and parity segments.
    fn plan_next_frame(
        &mut self,
        now_ms: u64,
        buffer: &mut FrameBuffer,
        queue: &mut InterestQueue,
    ) {
        let Some(frame_seq) = self.next_frame_seq else {
            return;
        };
        self.next_frame_seq = Some(frame_seq + 1);

        let is_key = self.known_keys.contains(&frame_seq);
        let est_data = if is_key {
            self.estimates.key_data
        } else {
            self.estimates.delta_data
        };
        let est_parity = if is_key {
            self.estimates.key_parity
        } else {
            self.estimates.delta_parity
        };
        // Without live metadata, open with a single data segment; the
        // FinalBlockId of whatever comes back reveals the rest.
        let n_data = (est_data.ceil() as u64).max(1);
        let n_parity = if self.config.fec_enabled {
            est_parity.ceil() as u64
        } else {
            0
        };

        let lifetime = self.interest_lifetime();
        let mut express = |kind: SegmentKind, this: &Self| {
            buffer.on_express(frame_seq, kind, now_ms);
            queue.enqueue(
                Interest::new(this.segment_name(frame_seq, kind)).with_lifetime(lifetime),
                FETCH_PRIORITY,
            );
        };

        express(SegmentKind::FrameMeta, self);
        express(SegmentKind::Manifest, self);
        for seg in 0..n_data {
            express(SegmentKind::Data(seg), self);
        }
        for seg in 0..n_parity {
            express(SegmentKind::Parity(seg), self);
        }

        self.in_flight.insert(
            frame_seq,
            FramePlan {
                expressed_data: n_data,
                expressed_parity: n_parity,
            },
        );
        log::trace!(
            "planned frame #{frame_seq}: {n_data} data + {n_parity} parity interests"
        );
    }

    /// The frame's exact totals became known; express what the estimate
    /// missed.
    fn top_up(
        &mut self,
        frame_seq: u64,
        total_data: usize,
        total_parity: usize,
        now_ms: u64,
        buffer: &mut FrameBuffer,
        queue: &mut InterestQueue,
    ) {
        let (expressed_data, expressed_parity) = match self.in_flight.get(&frame_seq) {
            Some(plan) => (plan.expressed_data, plan.expressed_parity),
            None => return,
        };

        let lifetime = self.interest_lifetime();
        let frame = name::frame(&self.stream_prefix, frame_seq);

        for seg in expressed_data..total_data as u64 {
            buffer.on_express(frame_seq, SegmentKind::Data(seg), now_ms);
            queue.enqueue(
                Interest::new(name::data_segment(&frame, seg)).with_lifetime(lifetime),
                FETCH_PRIORITY,
            );
        }

        let mut new_parity = expressed_parity;
        if self.config.fec_enabled {
            for seg in expressed_parity..total_parity as u64 {
                buffer.on_express(frame_seq, SegmentKind::Parity(seg), now_ms);
                queue.enqueue(
                    Interest::new(name::parity_segment(&frame, seg)).with_lifetime(lifetime),
                    FETCH_PRIORITY,
                );
            }
            new_parity = expressed_parity.max(total_parity as u64);
        }

        if let Some(plan) = self.in_flight.get_mut(&frame_seq) {
            plan.expressed_data = expressed_data.max(total_data as u64);
            plan.expressed_parity = new_parity;
        }
    }

    fn rebuffer(
        &mut self,
        buffer: &mut FrameBuffer,
        queue: &mut InterestQueue,
    ) -> Vec<PipelinerEvent> {
        let was_fetching = self.state == PipelinerState::Fetching;

        // In-flight drops to zero before anything is re-expressed.
        self.in_flight.clear();
        queue.clear();
        buffer.discard_unlocked();
        self.chase.reset();
        self.anchor_frame = None;
        self.next_frame_seq = None;
        self.entered_fetching_ms = None;
        self.state = PipelinerState::Buffering;
        self.express_latest(queue);

        if was_fetching {
            self.rebuffering_events += 1;
            log::debug!("pipeliner: Fetching -> Buffering (rebuffer #{})", self.rebuffering_events);
            vec![PipelinerEvent::RebufferingOccurred]
        } else {
            log::debug!("pipeliner: Chasing -> Buffering");
            Vec::new()
        }
    }

    fn express_latest(&mut self, queue: &mut InterestQueue) {
        let latest = self.stream_prefix.clone().append_str(name::LATEST);
        queue.enqueue(
            Interest::new(latest)
                .with_lifetime(self.interest_lifetime())
                .fresh(),
            BOOTSTRAP_PRIORITY,
        );
    }

    fn express_bootstrap(&self, interest_name: Name, queue: &mut InterestQueue) {
        queue.enqueue(
            Interest::new(interest_name).with_lifetime(self.interest_lifetime()),
            BOOTSTRAP_PRIORITY,
        );
    }

    /// Working interest lifetime: two round trips, clamped.
    fn interest_lifetime(&self) -> u32 {
        let rtt_based = (2.0 * self.rtt.estimate()) as u32;
        rtt_based.clamp(self.config.lifetime_floor_ms, self.config.lifetime_ceiling_ms)
    }

    fn segment_name(&self, frame_seq: u64, kind: SegmentKind) -> Name {
        let frame = name::frame(&self.stream_prefix, frame_seq);
        match kind {
            SegmentKind::Data(seg) => name::data_segment(&frame, seg),
            SegmentKind::Parity(seg) => name::parity_segment(&frame, seg),
            SegmentKind::Manifest => name::frame_manifest(&frame),
            SegmentKind::FrameMeta => name::frame_meta(&frame),
        }
    }

    /// Frame or GOP sequence from the tail of a delegation target name.
    fn trailing_sequence(n: &Name) -> Option<u64> {
        n.get(n.len().checked_sub(1)?).and_then(|c| c.as_sequence())
    }
}
