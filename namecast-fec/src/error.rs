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

use thiserror::Error;

/// Result type for FEC operations.
pub type Result<T> = std::result::Result<T, FecError>;

/// Errors that can occur while encoding or decoding parity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FecError {
    #[error("invalid FEC parameters: n_data={n_data}, n_parity={n_parity}, seg_size={seg_size}")]
    InvalidParams {
        n_data: usize,
        n_parity: usize,
        seg_size: usize,
    },

    #[error("{0} total shards exceed the GF(2^8) limit of 255")]
    TooManyShards(usize),

    #[error("input length {got} does not match expected {expected}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("only {got} of {needed} shards present, cannot recover")]
    TooFewShards { needed: usize, got: usize },

    #[error("reed-solomon failure: {0}")]
    Codec(String),
}
