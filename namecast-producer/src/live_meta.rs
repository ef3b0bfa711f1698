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

//! Rolling live metadata: producer rate plus per-(frame type, segment class)
//! segment-count averages, advertised to consumers through `_live`.

use namecast_types::estimators::{Average, FreqMeter, Window};
use namecast_types::frame::{FrameType, SegmentClass};
use namecast_types::meta::{LiveMeta, Timestamp};

/// Rate window, milliseconds.
const RATE_WINDOW_MS: u64 = 1000;
/// Delta-frame segment averages use a short time window.
const DELTA_WINDOW_MS: u64 = 100;
/// Key frames are rare; average over the last few of them.
const KEY_WINDOW_SAMPLES: usize = 2;

/// Live stream statistics backing the `_live` pointer object.
#[derive(Debug)]
pub struct LiveMetadata {
    rate_meter: FreqMeter,
    delta_data: Average,
    delta_parity: Average,
    key_data: Average,
    key_parity: Average,
}

impl Default for LiveMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveMetadata {
    pub fn new() -> Self {
        LiveMetadata {
            rate_meter: FreqMeter::new(RATE_WINDOW_MS),
            delta_data: Average::new(Window::Time(DELTA_WINDOW_MS)),
            delta_parity: Average::new(Window::Time(DELTA_WINDOW_MS)),
            key_data: Average::new(Window::Samples(KEY_WINDOW_SAMPLES)),
            key_parity: Average::new(Window::Samples(KEY_WINDOW_SAMPLES)),
        }
    }

    /// Record one published frame.
    pub fn update(&self, now_ms: u64, is_key: bool, n_data: usize, n_parity: usize) {
        let (data_avg, parity_avg) = if is_key {
            (&self.key_data, &self.key_parity)
        } else {
            (&self.delta_data, &self.delta_parity)
        };

        self.rate_meter.tick(now_ms);
        data_avg.new_value(now_ms, n_data as f64);
        parity_avg.new_value(now_ms, n_parity as f64);
    }

    /// Current publish rate, frames per second.
    pub fn rate(&self) -> f64 {
        self.rate_meter.value()
    }

    /// Average segment count for the given frame type and segment class.
    pub fn segments_estimate(&self, ft: FrameType, cls: SegmentClass) -> f64 {
        match (ft, cls) {
            (FrameType::Key, SegmentClass::Data) => self.key_data.value(),
            (FrameType::Key, SegmentClass::Parity) => self.key_parity.value(),
            (FrameType::Delta, SegmentClass::Data) => self.delta_data.value(),
            (FrameType::Delta, SegmentClass::Parity) => self.delta_parity.value(),
        }
    }

    /// Snapshot for the wire, stamped with the last encode-cycle time.
    pub fn to_wire(&self, last_cycle_monotonic_ns: u64) -> LiveMeta {
        LiveMeta {
            timestamp: Timestamp::from_nanos(last_cycle_monotonic_ns),
            framerate: self.rate(),
            segnum_delta: self.segments_estimate(FrameType::Delta, SegmentClass::Data),
            segnum_delta_parity: self.segments_estimate(FrameType::Delta, SegmentClass::Parity),
            segnum_key: self.segments_estimate(FrameType::Key, SegmentClass::Data),
            segnum_key_parity: self.segments_estimate(FrameType::Key, SegmentClass::Parity),
        }
    }
}
