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

use namecast_types::traits::CodecError;

/// Result type for producer operations.
pub type Result<T> = std::result::Result<T, ProducerError>;

/// Errors that can occur in the producer pipeline.
///
/// `InvalidConfig` is fatal at construction, before any network activity.
/// `Codec` surfaces a local-resource failure; the owner is expected to halt
/// the pipeline.
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("metadata encoding failed: {0}")]
    Meta(#[from] namecast_types::meta::MetaError),
}
