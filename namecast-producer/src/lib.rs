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

//! The producer pipeline: feed raw frames in, get an ordered list of named,
//! signed content objects out — data segments, Reed–Solomon parity, a segment
//! manifest, frame metadata, GOP delimiters and live/latest pointers.

pub mod cache;
pub mod error;
pub mod live_meta;
pub mod stats;
pub mod stream;

pub use cache::MemoryContentCache;
pub use error::{ProducerError, Result};
pub use stats::{ProducerStats, ProducerStatsSnapshot};
pub use stream::{CodecSettings, StreamSettings, VideoStream};
