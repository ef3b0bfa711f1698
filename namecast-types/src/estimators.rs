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

//! Sliding-window statistics: frequency meters, windowed averages and the
//! mean RTT estimator.
//!
//! Each estimator is internally synchronized; reads are lock-free snapshots
//! of the last computed value. Time never comes from the wall clock here —
//! callers stamp updates with their injected clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Initial RTT estimate before any sample has been observed, in milliseconds.
pub const RTT_START_ESTIMATE_MS: f64 = 30.0;

/// Observation window for a windowed estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Keep samples no older than this many milliseconds.
    Time(u64),
    /// Keep at most this many samples.
    Samples(usize),
}

fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::Release);
}

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Acquire))
}

/// Events-per-second meter over a time window. Each event may carry a weight,
/// so the same meter serves both "segments per second" (weight 1) and "bytes
/// per second" (weight = payload size).
#[derive(Debug)]
pub struct FreqMeter {
    window_ms: u64,
    samples: Mutex<VecDeque<(u64, f64)>>,
    snapshot: AtomicU64,
}

impl FreqMeter {
    pub fn new(window_ms: u64) -> Self {
        FreqMeter {
            window_ms: window_ms.max(1),
            samples: Mutex::new(VecDeque::new()),
            snapshot: AtomicU64::new(0),
        }
    }

    /// Record one event of weight 1 at `now_ms`.
    pub fn tick(&self, now_ms: u64) {
        self.add(now_ms, 1.0);
    }

    /// Record an event of the given weight at `now_ms`.
    pub fn add(&self, now_ms: u64, weight: f64) {
        let mut samples = self.samples.lock().unwrap();
        samples.push_back((now_ms, weight));
        let horizon = now_ms.saturating_sub(self.window_ms);
        while samples.front().is_some_and(|&(t, _)| t < horizon) {
            samples.pop_front();
        }
        let sum: f64 = samples.iter().map(|&(_, w)| w).sum();
        store_f64(&self.snapshot, sum * 1000.0 / self.window_ms as f64);
    }

    /// Weighted events per second over the window, as of the last update.
    pub fn value(&self) -> f64 {
        load_f64(&self.snapshot)
    }
}

/// Arithmetic mean over a time- or count-bounded window of samples.
#[derive(Debug)]
pub struct Average {
    window: Window,
    samples: Mutex<VecDeque<(u64, f64)>>,
    snapshot: AtomicU64,
}

impl Average {
    pub fn new(window: Window) -> Self {
        Average {
            window,
            samples: Mutex::new(VecDeque::new()),
            snapshot: AtomicU64::new(0),
        }
    }

    pub fn new_value(&self, now_ms: u64, value: f64) {
        let mut samples = self.samples.lock().unwrap();
        samples.push_back((now_ms, value));
        match self.window {
            Window::Time(ms) => {
                let horizon = now_ms.saturating_sub(ms);
                while samples.front().is_some_and(|&(t, _)| t < horizon) {
                    samples.pop_front();
                }
            }
            Window::Samples(n) => {
                while samples.len() > n.max(1) {
                    samples.pop_front();
                }
            }
        }
        let mean = samples.iter().map(|&(_, v)| v).sum::<f64>() / samples.len() as f64;
        store_f64(&self.snapshot, mean);
    }

    /// Mean over the window as of the last update; 0 before any sample.
    pub fn value(&self) -> f64 {
        load_f64(&self.snapshot)
    }
}

/// Mean round-trip-time estimator.
///
/// Starts at [`RTT_START_ESTIMATE_MS`]; non-positive samples are rejected,
/// every accepted sample feeds a running arithmetic mean. Instances are passed
/// explicitly to whoever needs RTT — there is no process-wide default.
#[derive(Debug)]
pub struct RttEstimator {
    state: Mutex<(u64, f64)>, // (count, sum)
    snapshot: AtomicU64,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        RttEstimator {
            state: Mutex::new((0, 0.0)),
            snapshot: AtomicU64::new(RTT_START_ESTIMATE_MS.to_bits()),
        }
    }

    /// Feed one raw RTT sample in milliseconds. Non-positive and non-finite
    /// samples are rejected. Returns the current estimate.
    pub fn update_raw(&self, raw_ms: f64) -> f64 {
        if raw_ms > 0.0 && raw_ms.is_finite() {
            let mut state = self.state.lock().unwrap();
            state.0 += 1;
            state.1 += raw_ms;
            store_f64(&self.snapshot, state.1 / state.0 as f64);
        } else {
            log::warn!("rejecting RTT sample {raw_ms} ms");
        }
        self.estimate()
    }

    /// Derive a sample from interest express/consume timestamps and the
    /// producer's generation delay, then feed it.
    pub fn update(&self, express_ms: u64, consume_ms: u64, generation_delay_ms: u64) -> f64 {
        let raw = consume_ms as f64 - express_ms as f64 - generation_delay_ms as f64;
        self.update_raw(raw)
    }

    /// Current estimate in milliseconds; always positive and finite.
    pub fn estimate(&self) -> f64 {
        load_f64(&self.snapshot)
    }
}
