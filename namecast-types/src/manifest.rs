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

//! Segment manifests: a signed listing of the full-name digests of a frame's
//! data and parity segments, in segment index order. The manifest carries the
//! signer's signature; the segments themselves carry only a digest, so the
//! manifest authenticates them transitively.

use crate::data::Data;
use crate::name::{self, Name};

/// Size of one full-name digest entry.
pub const DIGEST_SIZE: usize = 32;

/// Builder and reader for `<framePrefix>/_manifest` objects.
pub struct SegmentsManifest;

impl SegmentsManifest {
    /// Build the manifest content object for `segments`, which must be the
    /// frame's data and parity segments in publish order.
    ///
    /// The returned object is unsigned; the stream engine signs it with the
    /// real key chain.
    pub fn build(frame_prefix: &Name, segments: &[Data]) -> Data {
        let mut payload = Vec::with_capacity(DIGEST_SIZE * segments.len());
        for segment in segments {
            payload.extend_from_slice(&segment.full_name_digest());
        }

        let mut manifest = Data::new(name::frame_manifest(frame_prefix));
        manifest.set_content(payload);
        manifest
    }

    /// True if `data`'s full-name digest appears in `manifest`.
    pub fn has_data(manifest: &Data, data: &Data) -> bool {
        let digest = data.full_name_digest();
        manifest
            .content()
            .chunks_exact(DIGEST_SIZE)
            .any(|entry| entry == &digest[..])
    }

    /// Number of digest entries in `manifest`.
    pub fn digest_count(manifest: &Data) -> usize {
        manifest.content().len() / DIGEST_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_segment(frame_prefix: &Name, seg: u64, content: &[u8]) -> Data {
        let mut d = Data::new(name::data_segment(frame_prefix, seg));
        d.set_content(content.to_vec());
        d.sign_with_digest();
        d
    }

    #[test]
    fn manifest_lists_all_segments_in_order() {
        let frame_prefix = name::frame(&Name::from_uri("/test/stream"), 0);
        let segments: Vec<Data> = (0..4)
            .map(|i| create_test_segment(&frame_prefix, i, &[i as u8; 10]))
            .collect();

        let manifest = SegmentsManifest::build(&frame_prefix, &segments);
        assert_eq!(SegmentsManifest::digest_count(&manifest), 4);
        assert_eq!(manifest.content().len(), 4 * DIGEST_SIZE);

        for (i, segment) in segments.iter().enumerate() {
            assert!(SegmentsManifest::has_data(&manifest, segment));
            // Entries appear in index order.
            let entry = &manifest.content()[i * DIGEST_SIZE..(i + 1) * DIGEST_SIZE];
            assert_eq!(entry, &segment.full_name_digest()[..]);
        }
    }

    #[test]
    fn manifest_rejects_foreign_data() {
        let frame_prefix = name::frame(&Name::from_uri("/test/stream"), 0);
        let segments = vec![create_test_segment(&frame_prefix, 0, b"abc")];
        let manifest = SegmentsManifest::build(&frame_prefix, &segments);

        let other = create_test_segment(&frame_prefix, 0, b"abd");
        assert!(!SegmentsManifest::has_data(&manifest, &other));
    }

    #[test]
    fn manifest_name_is_under_frame_prefix() {
        let frame_prefix = name::frame(&Name::from_uri("/test/stream"), 5);
        let manifest = SegmentsManifest::build(&frame_prefix, &[]);
        assert_eq!(manifest.name(), &name::frame_manifest(&frame_prefix));
    }
}
