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

//! The chase estimator: watches segment arrival inter-times and declares
//! convergence once the producer's pace has been locked on.

use std::collections::VecDeque;

/// Observations required before convergence can be declared.
const CONVERGENCE_WINDOW: usize = 30;
/// Sample variance threshold, ms². Inter-arrival spread within ±10 ms of the
/// mean counts as locked on.
const VARIANCE_THRESHOLD_MS2: f64 = 100.0;

/// Smoothed segment-arrival rate tracker with a convergence test.
#[derive(Debug, Default)]
pub struct ChaseEstimator {
    last_arrival_ms: Option<u64>,
    inter_times: VecDeque<f64>,
}

impl ChaseEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one segment arrival.
    pub fn new_sample(&mut self, now_ms: u64) {
        if let Some(last) = self.last_arrival_ms {
            let dt = now_ms.saturating_sub(last) as f64;
            self.inter_times.push_back(dt);
            while self.inter_times.len() > CONVERGENCE_WINDOW {
                self.inter_times.pop_front();
            }
        }
        self.last_arrival_ms = Some(now_ms);
    }

    /// Smoothed arrival rate, segments per second.
    pub fn rate(&self) -> f64 {
        let mean = self.mean();
        if mean <= 0.0 {
            0.0
        } else {
            1000.0 / mean
        }
    }

    /// True once the window is full and the inter-arrival variance has
    /// settled below the threshold.
    pub fn converged(&self) -> bool {
        self.inter_times.len() >= CONVERGENCE_WINDOW && self.variance() < VARIANCE_THRESHOLD_MS2
    }

    pub fn reset(&mut self) {
        self.last_arrival_ms = None;
        self.inter_times.clear();
    }

    fn mean(&self) -> f64 {
        if self.inter_times.is_empty() {
            return 0.0;
        }
        self.inter_times.iter().sum::<f64>() / self.inter_times.len() as f64
    }

    fn variance(&self) -> f64 {
        if self.inter_times.len() < 2 {
            return f64::INFINITY;
        }
        let mean = self.mean();
        self.inter_times
            .iter()
            .map(|dt| (dt - mean) * (dt - mean))
            .sum::<f64>()
            / self.inter_times.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_steady_arrivals() {
        let mut chase = ChaseEstimator::new();
        let mut now = 1000;
        for _ in 0..=CONVERGENCE_WINDOW {
            chase.new_sample(now);
            now += 33;
        }
        assert!(chase.converged());
        assert!((chase.rate() - 30.3).abs() < 0.5);
    }

    #[test]
    fn does_not_converge_before_window_fills() {
        let mut chase = ChaseEstimator::new();
        for i in 0..CONVERGENCE_WINDOW / 2 {
            chase.new_sample(1000 + i as u64 * 33);
        }
        assert!(!chase.converged());
    }

    #[test]
    fn wild_jitter_prevents_convergence() {
        let mut chase = ChaseEstimator::new();
        let mut now = 1000u64;
        for i in 0..=CONVERGENCE_WINDOW {
            now += if i % 2 == 0 { 5 } else { 90 };
            chase.new_sample(now);
        }
        assert!(!chase.converged());
    }

    #[test]
    fn reset_discards_history() {
        let mut chase = ChaseEstimator::new();
        for i in 0..=CONVERGENCE_WINDOW {
            chase.new_sample(1000 + i as u64 * 20);
        }
        assert!(chase.converged());
        chase.reset();
        assert!(!chase.converged());
        assert_eq!(chase.rate(), 0.0);
    }
}
