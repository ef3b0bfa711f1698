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

//! Parity generation for one frame's segment group.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{FecError, Result};
use crate::FecParams;

/// Systematic RS(2^8) encoder for a fixed `(n_data, n_parity, seg_size)`.
pub struct Rs28Encoder {
    params: FecParams,
    rs: ReedSolomon,
}

impl Rs28Encoder {
    pub fn new(n_data: usize, n_parity: usize, seg_size: usize) -> Result<Self> {
        let params = FecParams::new(n_data, n_parity, seg_size)?;
        let rs = ReedSolomon::new(n_data, n_parity)
            .map_err(|e| FecError::Codec(format!("{e:?}")))?;
        Ok(Rs28Encoder { params, rs })
    }

    pub fn params(&self) -> FecParams {
        self.params
    }

    /// Encode parity for `padded_data`, the zero-padded concatenation of the
    /// frame's data segments (`n_data · seg_size` bytes). Returns
    /// `n_parity · seg_size` parity bytes in segment order.
    pub fn encode(&self, padded_data: &[u8]) -> Result<Vec<u8>> {
        let expected = self.params.data_len();
        if padded_data.len() != expected {
            return Err(FecError::LengthMismatch {
                expected,
                got: padded_data.len(),
            });
        }

        let seg = self.params.seg_size;
        let mut shards: Vec<Vec<u8>> = padded_data
            .chunks_exact(seg)
            .map(|chunk| chunk.to_vec())
            .collect();
        shards.resize(self.params.n_data + self.params.n_parity, vec![0u8; seg]);

        self.rs
            .encode(&mut shards)
            .map_err(|e| FecError::Codec(format!("{e:?}")))?;

        let mut parity = Vec::with_capacity(self.params.parity_len());
        for shard in &shards[self.params.n_data..] {
            parity.extend_from_slice(shard);
        }
        Ok(parity)
    }
}
