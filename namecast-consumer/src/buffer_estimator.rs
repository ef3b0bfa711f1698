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

//! Jitter-buffer target sizing from the RTT estimate and the configured
//! minimal buffer.

use std::sync::Arc;

use namecast_types::estimators::RttEstimator;

/// Round trips of headroom the buffer should hold.
const RTT_MULTIPLIER: f64 = 2.0;

/// Computes the jitter buffer's target size.
#[derive(Debug)]
pub struct BufferEstimator {
    rtt: Arc<RttEstimator>,
    minimal_buffer_ms: u32,
}

impl BufferEstimator {
    pub fn new(rtt: Arc<RttEstimator>, minimal_buffer_ms: u32) -> Self {
        BufferEstimator {
            rtt,
            minimal_buffer_ms,
        }
    }

    /// Target buffer size in milliseconds: the configured floor or enough to
    /// ride out retransmissions, whichever is larger.
    pub fn target_ms(&self) -> u32 {
        let rtt_based = RTT_MULTIPLIER * self.rtt.estimate();
        (self.minimal_buffer_ms as f64).max(rtt_based) as u32
    }

    pub fn minimal_buffer_ms(&self) -> u32 {
        self.minimal_buffer_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_wins_over_small_rtt() {
        let rtt = Arc::new(RttEstimator::new()); // 30 ms start
        let estimator = BufferEstimator::new(rtt, 150);
        assert_eq!(estimator.target_ms(), 150);
    }

    #[test]
    fn large_rtt_raises_target() {
        let rtt = Arc::new(RttEstimator::new());
        rtt.update_raw(200.0);
        let estimator = BufferEstimator::new(rtt, 100);
        assert_eq!(estimator.target_ms(), 400);
    }
}
