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

//! Time sources. The core never reads the wall clock directly; a [`Clock`]
//! is injected so tests can step time deterministically.

use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond epoch and monotonic nanosecond sources.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn epoch_ms(&self) -> u64;

    /// Monotonic nanoseconds from an arbitrary origin.
    fn monotonic_ns(&self) -> u64;
}

/// Wall-clock implementation backed by `std::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn monotonic_ns(&self) -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_backwards() {
        let clock = SystemClock;
        let a = clock.monotonic_ns();
        let b = clock.monotonic_ns();
        assert!(b >= a);
    }

    #[test]
    fn epoch_is_after_2020() {
        let clock = SystemClock;
        assert!(clock.epoch_ms() > 1_577_836_800_000);
    }
}
