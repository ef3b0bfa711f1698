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

//! Recovery of missing data segments from a partially received group.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{FecError, Result};
use crate::FecParams;

/// Systematic RS(2^8) decoder for a fixed `(n_data, n_parity, seg_size)`.
pub struct Rs28Decoder {
    params: FecParams,
    rs: ReedSolomon,
}

impl Rs28Decoder {
    pub fn new(n_data: usize, n_parity: usize, seg_size: usize) -> Result<Self> {
        let params = FecParams::new(n_data, n_parity, seg_size)?;
        let rs = ReedSolomon::new(n_data, n_parity)
            .map_err(|e| FecError::Codec(format!("{e:?}")))?;
        Ok(Rs28Decoder { params, rs })
    }

    pub fn params(&self) -> FecParams {
        self.params
    }

    /// Recover the frame's data bytes from the received shards.
    ///
    /// `shards` holds `n_data + n_parity` entries indexed data-first then
    /// parity; missing segments are `None`, received segments must be
    /// `seg_size` bytes (a short final data segment is zero-padded by the
    /// caller). At least `n_data` shards must be present. Returns the
    /// recovered `n_data · seg_size` data bytes.
    pub fn decode(&self, mut shards: Vec<Option<Vec<u8>>>) -> Result<Vec<u8>> {
        let total = self.params.n_data + self.params.n_parity;
        if shards.len() != total {
            return Err(FecError::LengthMismatch {
                expected: total,
                got: shards.len(),
            });
        }

        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.params.n_data {
            return Err(FecError::TooFewShards {
                needed: self.params.n_data,
                got: present,
            });
        }

        for shard in shards.iter().flatten() {
            if shard.len() != self.params.seg_size {
                return Err(FecError::LengthMismatch {
                    expected: self.params.seg_size,
                    got: shard.len(),
                });
            }
        }

        self.rs
            .reconstruct_data(&mut shards)
            .map_err(|e| FecError::Codec(format!("{e:?}")))?;

        let mut data = Vec::with_capacity(self.params.data_len());
        for shard in shards.iter().take(self.params.n_data) {
            match shard {
                Some(bytes) => data.extend_from_slice(bytes),
                None => {
                    return Err(FecError::Codec("reconstruction left a hole".to_string()));
                }
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Rs28Encoder;

    fn shards_from(data: &[u8], parity: &[u8], seg_size: usize) -> Vec<Option<Vec<u8>>> {
        data.chunks_exact(seg_size)
            .chain(parity.chunks_exact(seg_size))
            .map(|c| Some(c.to_vec()))
            .collect()
    }

    #[test]
    fn recovers_one_lost_data_segment() {
        let seg_size = 100;
        let enc = Rs28Encoder::new(5, 1, seg_size).unwrap();
        let original: Vec<u8> = (0..450u32).map(|i| (i % 251) as u8).collect();
        let mut padded = original.clone();
        padded.resize(500, 0);
        let parity = enc.encode(&padded).unwrap();

        let mut shards = shards_from(&padded, &parity, seg_size);
        shards[2] = None; // drop data segment 2

        let dec = Rs28Decoder::new(5, 1, seg_size).unwrap();
        let recovered = dec.decode(shards).unwrap();
        assert_eq!(&recovered[200..300], &padded[200..300]);
        assert_eq!(&recovered[..450], &original[..]);
    }

    #[test]
    fn recovers_up_to_parity_count_losses() {
        let seg_size = 32;
        let enc = Rs28Encoder::new(6, 2, seg_size).unwrap();
        let padded: Vec<u8> = (0..(6 * seg_size) as u32).map(|i| (i * 7 % 256) as u8).collect();
        let parity = enc.encode(&padded).unwrap();

        let mut shards = shards_from(&padded, &parity, seg_size);
        shards[0] = None;
        shards[4] = None;

        let dec = Rs28Decoder::new(6, 2, seg_size).unwrap();
        assert_eq!(dec.decode(shards).unwrap(), padded);
    }

    #[test]
    fn reports_unrecoverable_groups() {
        let seg_size = 16;
        let enc = Rs28Encoder::new(4, 1, seg_size).unwrap();
        let padded = vec![9u8; 4 * seg_size];
        let parity = enc.encode(&padded).unwrap();

        let mut shards = shards_from(&padded, &parity, seg_size);
        shards[1] = None;
        shards[3] = None; // two losses, one parity

        let dec = Rs28Decoder::new(4, 1, seg_size).unwrap();
        assert!(matches!(
            dec.decode(shards),
            Err(FecError::TooFewShards { needed: 4, got: 3 })
        ));
    }

    #[test]
    fn parity_can_substitute_for_any_data_segment() {
        let seg_size = 10;
        let n_data = 5;
        let enc = Rs28Encoder::new(n_data, 1, seg_size).unwrap();
        let padded: Vec<u8> = (0..50).collect();
        let parity = enc.encode(&padded).unwrap();

        for lost in 0..n_data {
            let mut shards = shards_from(&padded, &parity, seg_size);
            shards[lost] = None;
            let dec = Rs28Decoder::new(n_data, 1, seg_size).unwrap();
            assert_eq!(dec.decode(shards).unwrap(), padded, "lost segment {lost}");
        }
    }

    #[test]
    fn rejects_wrong_shard_count_and_size() {
        let dec = Rs28Decoder::new(4, 1, 8).unwrap();
        assert!(matches!(
            dec.decode(vec![None; 4]),
            Err(FecError::LengthMismatch {
                expected: 5,
                got: 4
            })
        ));

        let mut shards: Vec<Option<Vec<u8>>> = vec![Some(vec![0; 8]); 5];
        shards[1] = Some(vec![0; 7]);
        assert!(matches!(
            dec.decode(shards),
            Err(FecError::LengthMismatch {
                expected: 8,
                got: 7
            })
        ));
    }
}
