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

//! The consumer facade: wires the interest queue, frame buffer, pipeliner
//! and playout together behind the two face signals (`on_data`,
//! `on_timeout`) and a pair of cooperative timers (`poll`, `playout_tick`).
//!
//! Every entry point returns the interests that became due, for the face
//! glue to express; the core stays synchronous and clock-injected.

use std::sync::Arc;

use namecast_types::data::Data;
use namecast_types::estimators::RttEstimator;
use namecast_types::name::{Name, SegmentKind, StreamAddress};
use namecast_types::traits::{EncodedFrameConsumer, Renderer};
use namecast_types::Callback;

use crate::error::{ConsumerError, Result};
use crate::frame_buffer::{BufferEvent, FrameBuffer, FrameBufferConfig};
use crate::interest_queue::InterestQueue;
use crate::pipeliner::{Pipeliner, PipelinerConfig, PipelinerEvent, PipelinerState};
use crate::playout::{VideoPlayout, VideoPlayoutObserver};
use crate::stats::{ConsumerStatsSnapshot, ReceiveMeters};

/// Consumer-visible pipeline states; Buffering and Chasing both read as
/// "chasing" to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Inactive,
    Chasing,
    Fetching,
}

/// Events surfaced through the consumer's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerEvent {
    BufferingEnded,
    RebufferingOccurred,
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub stream_prefix: Name,
    /// Minimal jitter buffer size, milliseconds.
    pub jitter_size_ms: u32,
    pub max_rtx: u32,
    /// Interest pacing, interests per second; 0 disables pacing.
    pub interest_pacing_rate: f64,
    pub fec_enabled: bool,
}

impl ConsumerSettings {
    pub fn new(stream_prefix: Name) -> Self {
        ConsumerSettings {
            stream_prefix,
            jitter_size_ms: 150,
            max_rtx: 3,
            interest_pacing_rate: 0.0,
            fec_enabled: true,
        }
    }
}

/// A pull-based stream consumer.
pub struct Consumer {
    settings: ConsumerSettings,
    queue: InterestQueue,
    buffer: FrameBuffer,
    pipeliner: Pipeliner,
    playout: VideoPlayout,
    rtt: Arc<RttEstimator>,
    meters: ReceiveMeters,
    renderer: Option<Box<dyn Renderer>>,
    on_event: Callback<ConsumerEvent>,
    running: bool,
}

impl Consumer {
    /// Build the pipeline. Fails before any network activity if the
    /// configuration is unusable.
    pub fn new(
        settings: ConsumerSettings,
        rtt: Arc<RttEstimator>,
        frame_consumer: Box<dyn EncodedFrameConsumer>,
        renderer: Option<Box<dyn Renderer>>,
    ) -> Result<Self> {
        if settings.stream_prefix.is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "stream prefix must not be empty".to_string(),
            ));
        }
        if settings.jitter_size_ms == 0 {
            return Err(ConsumerError::InvalidConfig(
                "jitter buffer size must be positive".to_string(),
            ));
        }

        let buffer = FrameBuffer::new(
            FrameBufferConfig {
                fec_enabled: settings.fec_enabled,
                jitter_size_ms: settings.jitter_size_ms,
                max_rtx: settings.max_rtx,
            },
            rtt.clone(),
        );
        let pipeliner = Pipeliner::new(
            settings.stream_prefix.clone(),
            PipelinerConfig {
                fec_enabled: settings.fec_enabled,
                max_rtx: settings.max_rtx,
                ..PipelinerConfig::default()
            },
            rtt.clone(),
        );

        let mut queue = InterestQueue::new();
        queue.set_pacing_rate(settings.interest_pacing_rate);

        let mut playout = VideoPlayout::new(1000.0 / 30.0);
        playout.register_frame_consumer(frame_consumer);

        Ok(Consumer {
            settings,
            queue,
            buffer,
            pipeliner,
            playout,
            rtt,
            meters: ReceiveMeters::default(),
            renderer,
            on_event: Callback::noop(),
            running: false,
        })
    }

    /// Install the application's event callback.
    pub fn set_event_callback(&mut self, callback: Callback<ConsumerEvent>) {
        self.on_event = callback;
    }

    /// Attach a playout observer (frame processed / skipped / recovery).
    pub fn attach_playout_observer(&mut self, observer: Box<dyn VideoPlayoutObserver>) {
        self.playout.attach(observer);
    }

    pub fn state(&self) -> ConsumerState {
        match self.pipeliner.state() {
            PipelinerState::Inactive => ConsumerState::Inactive,
            PipelinerState::Buffering | PipelinerState::Chasing => ConsumerState::Chasing,
            PipelinerState::Fetching => ConsumerState::Fetching,
        }
    }

    /// Begin consuming. Returns the first interests to express.
    pub fn start(&mut self, now_ms: u64) -> Vec<namecast_types::data::Interest> {
        self.running = true;
        self.pipeliner.start(&mut self.queue);
        self.queue.drain_due(now_ms)
    }

    /// Stop consuming: cancel outstanding interests, discard non-Locked
    /// slots, let locked slots drain through the renderer.
    pub fn stop(&mut self) {
        self.running = false;
        self.pipeliner.stop(&mut self.buffer, &mut self.queue);
        self.playout.stop();
        if let Some(renderer) = &mut self.renderer {
            renderer.stop_rendering();
        }
    }

    /// Application-initiated rebuffering. Idempotent.
    pub fn trigger_rebuffering(&mut self, now_ms: u64) -> Vec<namecast_types::data::Interest> {
        let events = self
            .pipeliner
            .trigger_rebuffering(&mut self.buffer, &mut self.queue);
        self.dispatch(events);
        self.queue.drain_due(now_ms)
    }

    /// Face signal: data arrived. Returns follow-up interests now due.
    pub fn on_data(&mut self, data: &Data, now_ms: u64) -> Vec<namecast_types::data::Interest> {
        if !self.running {
            return Vec::new();
        }

        self.meters.on_data(now_ms, data.content().len());
        self.sample_rtt(data, now_ms);

        match StreamAddress::parse(&self.settings.stream_prefix, data.name()) {
            Ok(StreamAddress::Frame(addr)) => {
                self.pipeliner.on_segment_arrival(now_ms);
                let events = self.buffer.new_data(addr, data, now_ms);
                self.process_buffer_events(events, now_ms);
            }
            Ok(addr) => {
                self.pipeliner.on_bootstrap_data(
                    &addr,
                    data,
                    &mut self.queue,
                    &mut self.buffer,
                    now_ms,
                );
            }
            Err(e) => {
                log::warn!("unparsable data name {}: {e}", data.name());
                return Vec::new();
            }
        }

        let events = self.pipeliner.drive(now_ms, &mut self.buffer, &mut self.queue);
        self.dispatch(events);
        self.queue.drain_due(now_ms)
    }

    /// Face signal: an interest timed out unanswered.
    pub fn on_timeout(&mut self, name: &Name, now_ms: u64) -> Vec<namecast_types::data::Interest> {
        if !self.running {
            return Vec::new();
        }
        self.queue.take_express_time(name);

        match StreamAddress::parse(&self.settings.stream_prefix, name) {
            Ok(StreamAddress::Frame(addr)) => {
                let events = self.buffer.interest_timeout(addr, now_ms);
                self.process_buffer_events(events, now_ms);
            }
            Ok(addr) => {
                self.pipeliner.on_bootstrap_timeout(&addr, &mut self.queue);
            }
            Err(_) => {}
        }

        let events = self.pipeliner.drive(now_ms, &mut self.buffer, &mut self.queue);
        self.dispatch(events);
        self.queue.drain_due(now_ms)
    }

    /// Periodic upkeep: window refill, rebuffer checks, pacing releases.
    pub fn poll(&mut self, now_ms: u64) -> Vec<namecast_types::data::Interest> {
        if !self.running {
            return Vec::new();
        }
        let events = self.pipeliner.drive(now_ms, &mut self.buffer, &mut self.queue);
        self.dispatch(events);
        self.queue.drain_due(now_ms)
    }

    /// One playout timer tick; returns the next tick delay in milliseconds.
    pub fn playout_tick(&mut self, now_ms: u64) -> u64 {
        self.playout
            .set_sample_ms(1000.0 / self.buffer.current_rate());
        self.playout.tick(now_ms, &mut self.buffer)
    }

    /// Stream description, once the producer's `_meta` has been fetched.
    pub fn stream_meta(&self) -> Option<&namecast_types::meta::StreamMeta> {
        self.pipeliner.stream_meta()
    }

    pub fn statistics(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            seg_num_delta: self.pipeliner.avg_seg_num(false),
            seg_num_key: self.pipeliner.avg_seg_num(true),
            rtx_num: self.pipeliner.rtx_num(),
            rtx_freq: self.pipeliner.rtx_freq(),
            rebuffering_events: self.pipeliner.rebuffering_events(),
            rtt_estimate_ms: self.rtt.estimate(),
            jitter_playable_ms: self.buffer.playable_size_ms(),
            jitter_estimation_ms: self.buffer.estimated_size_ms(),
            jitter_target_ms: self.buffer.target_size_ms(),
            segments_frequency: self.meters.segment_freq.value(),
            bytes_per_sec: self.meters.data_rate.value(),
            actual_producer_rate: self.buffer.current_rate(),
            frames_played: self.playout.frames_processed(),
            frames_skipped: self.playout.frames_skipped(),
            dropped_slots: self.buffer.dropped_slots(),
            protocol_violations: self.buffer.protocol_violations(),
        }
    }

    // ── internals ─────────────────────────────────────────────────────────────

    fn process_buffer_events(&mut self, events: Vec<BufferEvent>, now_ms: u64) {
        for event in &events {
            match *event {
                BufferEvent::FrameReady {
                    frame_seq,
                    capture_timestamp_ms,
                    ..
                } => {
                    self.playout.on_frame_ready(
                        frame_seq,
                        capture_timestamp_ms,
                        now_ms,
                        self.buffer.target_size_ms(),
                    );
                }
                BufferEvent::RecoveryFailed { frame_seq, is_key } => {
                    log::warn!(
                        "frame #{frame_seq} unrecoverable ({})",
                        if is_key { "key" } else { "delta" }
                    );
                    self.playout.on_recovery_failure(frame_seq, is_key);
                }
                _ => {}
            }
            self.pipeliner
                .on_buffer_event(event, now_ms, &mut self.buffer, &mut self.queue);
        }
    }

    fn dispatch(&mut self, events: Vec<PipelinerEvent>) {
        for event in events {
            match event {
                PipelinerEvent::BufferingEnded => {
                    if !self.playout.is_running() {
                        self.playout.start();
                    }
                    if let Some(renderer) = &mut self.renderer {
                        renderer.start_rendering(&self.settings.stream_prefix.to_uri());
                    }
                    self.on_event.emit(ConsumerEvent::BufferingEnded);
                }
                PipelinerEvent::RebufferingOccurred => {
                    self.playout.stop();
                    if let Some(renderer) = &mut self.renderer {
                        renderer.stop_rendering();
                    }
                    self.on_event.emit(ConsumerEvent::RebufferingOccurred);
                }
            }
        }
    }

    fn sample_rtt(&mut self, data: &Data, now_ms: u64) {
        let Some(express_ms) = self.queue.take_express_time(data.name()) else {
            return;
        };
        // Frame metadata carries the producer's generation delay; everything
        // else is assumed to have been generated ahead of the interest.
        let generation_delay = match StreamAddress::parse(&self.settings.stream_prefix, data.name())
        {
            Ok(StreamAddress::Frame(addr)) if addr.kind == SegmentKind::FrameMeta => {
                namecast_types::meta::ContentMetaEnvelope::decode(data.content())
                    .ok()
                    .and_then(|e| e.frame_meta().ok())
                    .map(|m| m.generation_delay_ms)
                    .unwrap_or(0)
            }
            _ => 0,
        };
        self.rtt.update(express_ms, now_ms, generation_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use namecast_types::frame::EncodedFrame;

    struct NullSink;

    impl EncodedFrameConsumer for NullSink {
        fn process_frame(&mut self, _frame_seq: u64, _frame: &EncodedFrame) {}
    }

    fn create_test_consumer() -> Consumer {
        Consumer::new(
            ConsumerSettings::new(Name::from_uri("/test/stream")),
            Arc::new(RttEstimator::new()),
            Box::new(NullSink),
            None,
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_prefix() {
        let result = Consumer::new(
            ConsumerSettings::new(Name::new()),
            Arc::new(RttEstimator::new()),
            Box::new(NullSink),
            None,
        );
        assert!(matches!(result, Err(ConsumerError::InvalidConfig(_))));
    }

    #[test]
    fn start_expresses_bootstrap_and_sets_state() {
        let mut consumer = create_test_consumer();
        assert_eq!(consumer.state(), ConsumerState::Inactive);

        let interests = consumer.start(0);
        assert_eq!(interests.len(), 1);
        assert!(interests[0].name.to_uri().ends_with("_latest"));
        assert_eq!(consumer.state(), ConsumerState::Chasing);
    }

    #[test]
    fn stop_clears_everything() {
        let mut consumer = create_test_consumer();
        consumer.start(0);
        consumer.stop();
        assert_eq!(consumer.state(), ConsumerState::Inactive);
        assert!(consumer.poll(100).is_empty());
    }

    #[test]
    fn foreign_data_is_ignored() {
        let mut consumer = create_test_consumer();
        consumer.start(0);

        let mut foreign = Data::new(Name::from_uri("/other/stream/thing"));
        foreign.sign_with_digest();
        let interests = consumer.on_data(&foreign, 10);
        assert!(interests.is_empty());
        assert_eq!(consumer.statistics().frames_played, 0);
    }
}
