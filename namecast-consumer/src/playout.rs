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

//! Clock-driven playout.
//!
//! The owner runs a cooperative timer: each call to `tick` either hands the
//! due head frame to the sink or reports how long to sleep until the next
//! deadline. Skew against the producer clock is corrected by smoothing the
//! observed drift into the tick interval, bounded to ±25% of the sample
//! period.

use namecast_types::frame::{EncodedFrame, FrameType};
use namecast_types::meta::AudioBundle;
use namecast_types::traits::{AudioSink, EncodedFrameConsumer};

use crate::frame_buffer::FrameBuffer;
use crate::playback_queue::PlaybackQueue;

/// Samples over which playout drift is smoothed.
const DRIFT_SMOOTHING_SAMPLES: f64 = 10.0;
/// Catch-up bound: the tick interval stays within ±25% of the sample period.
const CATCHUP_BOUND: f64 = 0.25;

/// Observer of per-frame playout outcomes.
pub trait VideoPlayoutObserver {
    fn frame_processed(&mut self, p_no: u64, is_key: bool);
    fn frame_skipped(&mut self, p_no: u64, is_key: bool);
    fn recovery_failure(&mut self, p_no: u64, is_key: bool);
}

/// Video playout: dequeues Ready slots on a drift-corrected cadence and
/// feeds the decoder, skipping Deltas of broken GOPs.
pub struct VideoPlayout {
    queue: PlaybackQueue,
    running: bool,
    gop_is_valid: bool,
    /// GOP whose Key was last handed to the decoder.
    current_gop: Option<u64>,
    sample_ms: f64,
    drift_avg_ms: f64,
    frame_consumer: Option<Box<dyn EncodedFrameConsumer>>,
    observers: Vec<Box<dyn VideoPlayoutObserver>>,
    frames_processed: u64,
    frames_skipped: u64,
}

impl VideoPlayout {
    pub fn new(sample_ms: f64) -> Self {
        VideoPlayout {
            queue: PlaybackQueue::new(),
            running: false,
            gop_is_valid: true,
            current_gop: None,
            sample_ms: sample_ms.max(1.0),
            drift_avg_ms: 0.0,
            frame_consumer: None,
            observers: Vec::new(),
            frames_processed: 0,
            frames_skipped: 0,
        }
    }

    pub fn register_frame_consumer(&mut self, consumer: Box<dyn EncodedFrameConsumer>) {
        self.frame_consumer = Some(consumer);
    }

    pub fn deregister_frame_consumer(&mut self) {
        self.frame_consumer = None;
    }

    pub fn attach(&mut self, observer: Box<dyn VideoPlayoutObserver>) {
        self.observers.push(observer);
    }

    pub fn start(&mut self) {
        self.running = true;
        self.drift_avg_ms = 0.0;
        log::debug!("video playout started");
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.queue.clear();
        log::debug!("video playout stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Track the producer's sample period (1000 / rate).
    pub fn set_sample_ms(&mut self, sample_ms: f64) {
        if sample_ms.is_finite() && sample_ms > 0.0 {
            self.sample_ms = sample_ms;
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// A slot became Ready; schedule it.
    pub fn on_frame_ready(
        &mut self,
        frame_seq: u64,
        capture_timestamp_ms: u64,
        now_ms: u64,
        target_buffer_ms: u32,
    ) {
        self.queue
            .push(frame_seq, capture_timestamp_ms, now_ms, target_buffer_ms);
    }

    /// FEC recovery failed upstream; a Key loss invalidates the GOP.
    pub fn on_recovery_failure(&mut self, frame_seq: u64, is_key: bool) {
        if is_key {
            self.gop_is_valid = false;
        }
        for observer in &mut self.observers {
            observer.recovery_failure(frame_seq, is_key);
        }
    }

    /// One cooperative timer tick. Returns the next tick delay, ms.
    pub fn tick(&mut self, now_ms: u64, buffer: &mut FrameBuffer) -> u64 {
        if !self.running {
            return self.sample_ms as u64;
        }

        let mut delivered_drift: Option<f64> = None;

        loop {
            let Some(head) = self.queue.peek() else {
                break;
            };
            if head.playout_timestamp_ms > now_ms {
                // Not due yet: sleep until its deadline.
                return (head.playout_timestamp_ms - now_ms).max(1);
            }

            let entry = match self.queue.pop_due(now_ms) {
                Some(entry) => entry,
                None => break,
            };

            let Some((meta, payload)) = buffer.acquire(entry.frame_seq) else {
                // The slot is gone (reaped or dropped); move on.
                continue;
            };
            let is_key = meta.frame_type == FrameType::Key;

            // A Delta is only decodable when its GOP's Key went to the
            // decoder and nothing in the GOP failed since.
            let gop_intact = self.gop_is_valid && self.current_gop == Some(meta.gop_number);
            if !is_key && !gop_intact {
                log::debug!("skipping delta #{} of broken GOP", entry.frame_seq);
                self.frames_skipped += 1;
                for observer in &mut self.observers {
                    observer.frame_skipped(entry.frame_seq, false);
                }
                buffer.mark_played(entry.frame_seq);
                continue;
            }

            if is_key {
                self.gop_is_valid = true;
                self.current_gop = Some(meta.gop_number);
            }
            if let Some(consumer) = &mut self.frame_consumer {
                consumer.process_frame(
                    entry.frame_seq,
                    &EncodedFrame {
                        frame_type: meta.frame_type,
                        data: payload,
                    },
                );
            }
            self.frames_processed += 1;
            for observer in &mut self.observers {
                observer.frame_processed(entry.frame_seq, is_key);
            }
            buffer.mark_played(entry.frame_seq);
            delivered_drift = Some(entry.playout_timestamp_ms as f64 - now_ms as f64);
            break;
        }

        if let Some(drift) = delivered_drift {
            self.drift_avg_ms += (drift - self.drift_avg_ms) / DRIFT_SMOOTHING_SAMPLES;
        }

        let interval = self.sample_ms + self.drift_avg_ms / DRIFT_SMOOTHING_SAMPLES;
        let interval = interval.clamp(
            self.sample_ms * (1.0 - CATCHUP_BOUND),
            self.sample_ms * (1.0 + CATCHUP_BOUND),
        );
        (interval as u64).max(1)
    }
}

/// Audio playout: one slot per tick, unpacked into the audio device's ring.
pub struct AudioPlayout {
    queue: PlaybackQueue,
    running: bool,
    sample_ms: f64,
    sink: Box<dyn AudioSink>,
    bundles_played: u64,
}

impl AudioPlayout {
    pub fn new(sample_ms: f64, sink: Box<dyn AudioSink>) -> Self {
        AudioPlayout {
            queue: PlaybackQueue::new(),
            running: false,
            sample_ms: sample_ms.max(1.0),
            sink,
            bundles_played: 0,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.queue.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn bundles_played(&self) -> u64 {
        self.bundles_played
    }

    pub fn on_bundle_ready(
        &mut self,
        frame_seq: u64,
        capture_timestamp_ms: u64,
        now_ms: u64,
        target_buffer_ms: u32,
    ) {
        self.queue
            .push(frame_seq, capture_timestamp_ms, now_ms, target_buffer_ms);
    }

    /// One cooperative timer tick. Returns the next tick delay, ms.
    pub fn tick(&mut self, now_ms: u64, buffer: &mut FrameBuffer) -> u64 {
        if !self.running {
            return self.sample_ms as u64;
        }

        if let Some(head) = self.queue.peek() {
            if head.playout_timestamp_ms > now_ms {
                return (head.playout_timestamp_ms - now_ms).max(1);
            }
            if let Some(entry) = self.queue.pop_due(now_ms) {
                if let Some((_meta, payload)) = buffer.acquire(entry.frame_seq) {
                    match AudioBundle::decode(&payload) {
                        Ok(bundle) => {
                            for block in &bundle.blocks {
                                self.sink.deliver_samples(bundle.codec, block);
                            }
                            self.bundles_played += 1;
                        }
                        Err(e) => {
                            log::warn!("audio bundle #{} undecodable: {e}", entry.frame_seq);
                        }
                    }
                    buffer.mark_played(entry.frame_seq);
                }
            }
        }

        (self.sample_ms as u64).max(1)
    }
}
