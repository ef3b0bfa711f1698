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

//! Consumer-side receive statistics.

use serde::{Deserialize, Serialize};

use namecast_types::estimators::FreqMeter;

/// Window for the segment and byte rate meters, milliseconds.
const RATE_WINDOW_MS: u64 = 1000;

/// Live meters fed on every data arrival.
#[derive(Debug)]
pub struct ReceiveMeters {
    pub segment_freq: FreqMeter,
    pub data_rate: FreqMeter,
}

impl Default for ReceiveMeters {
    fn default() -> Self {
        ReceiveMeters {
            segment_freq: FreqMeter::new(RATE_WINDOW_MS),
            data_rate: FreqMeter::new(RATE_WINDOW_MS),
        }
    }
}

impl ReceiveMeters {
    pub fn on_data(&self, now_ms: u64, payload_bytes: usize) {
        self.segment_freq.tick(now_ms);
        self.data_rate.add(now_ms, payload_bytes as f64);
    }
}

/// Point-in-time view of the consumer pipeline, in the shape the original
/// receiver channel reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerStatsSnapshot {
    /// Average data+parity segments per Delta frame.
    pub seg_num_delta: f64,
    /// Average data+parity segments per Key frame.
    pub seg_num_key: f64,
    pub rtx_num: u64,
    /// Retransmissions per second.
    pub rtx_freq: f64,
    pub rebuffering_events: u64,
    pub rtt_estimate_ms: f64,
    pub jitter_playable_ms: u32,
    pub jitter_estimation_ms: u32,
    pub jitter_target_ms: u32,
    /// Segments per second.
    pub segments_frequency: f64,
    /// Payload bytes per second.
    pub bytes_per_sec: f64,
    /// Producer rate as observed by the frame buffer.
    pub actual_producer_rate: f64,
    pub frames_played: u64,
    pub frames_skipped: u64,
    pub dropped_slots: u64,
    pub protocol_violations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meters_track_arrivals() {
        let meters = ReceiveMeters::default();
        for i in 0..10 {
            meters.on_data(i * 100, 500);
        }
        assert!((meters.segment_freq.value() - 10.0).abs() < 1.0);
        assert!((meters.data_rate.value() - 5000.0).abs() < 500.0);
    }
}
