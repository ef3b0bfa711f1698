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

/// Result type for consumer operations.
pub type Result<T> = std::result::Result<T, ConsumerError>;

/// Errors that surface to the consumer's owner.
///
/// Transient network trouble (interest timeouts) never appears here: the
/// pipeliner retries and reports to statistics only. Assembly failures and
/// protocol violations are likewise absorbed per frame — the affected slot
/// is dropped and observers are notified.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("local resource failure: {0}")]
    LocalResource(String),
}
