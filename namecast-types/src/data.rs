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

//! Signed content objects and pull requests (Data / Interest).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::name::{Component, Name};

/// Payload class of a content object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentType {
    /// Opaque payload bytes (media segments, metadata records).
    #[default]
    Blob,
    /// A delegation set pointing at other names.
    Link,
}

/// Metadata attached to a content object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaInfo {
    pub content_type: ContentType,
    /// How long a cache may serve this object, in milliseconds.
    pub freshness_ms: u32,
    /// Name component of the last segment in the object's group.
    pub final_block_id: Option<Component>,
}

/// Signature carried by a content object.
///
/// Media segments carry a degenerate digest-only signature; the frame
/// manifest authenticates them transitively. Metadata objects are signed
/// through the key chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Signature {
    /// SHA-256 over the object's canonical bytes.
    DigestSha256([u8; 32]),
    /// Asymmetric signature produced by a key chain.
    KeyChain { key_name: Name, bytes: Vec<u8> },
}

impl Signature {
    pub fn is_digest_only(&self) -> bool {
        matches!(self, Signature::DigestSha256(_))
    }
}

/// A named, signed content object.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    name: Name,
    pub meta_info: MetaInfo,
    content: Vec<u8>,
    signature: Option<Signature>,
}

impl Data {
    pub fn new(name: Name) -> Self {
        Data {
            name,
            meta_info: MetaInfo::default(),
            content: Vec::new(),
            signature: None,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn set_content(&mut self, content: Vec<u8>) {
        self.content = content;
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn set_signature(&mut self, signature: Signature) {
        self.signature = Some(signature);
    }

    /// Attach a digest-only signature over the canonical bytes.
    pub fn sign_with_digest(&mut self) {
        let digest = self.canonical_digest();
        self.signature = Some(Signature::DigestSha256(digest));
    }

    /// Canonical bytes covered by signatures and the implicit digest:
    /// name wire encoding, meta info and content.
    fn signed_portion(&self) -> Vec<u8> {
        let mut bytes = self.name.wire_bytes();
        bytes.push(match self.meta_info.content_type {
            ContentType::Blob => 0,
            ContentType::Link => 1,
        });
        bytes.extend_from_slice(&self.meta_info.freshness_ms.to_be_bytes());
        if let Some(fbi) = &self.meta_info.final_block_id {
            bytes.extend_from_slice(fbi.bytes());
        }
        bytes.extend_from_slice(&self.content);
        bytes
    }

    fn canonical_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.signed_portion());
        hasher.finalize().into()
    }

    /// The implicit-digest component that completes the full name:
    /// SHA-256 over the signed portion plus the signature bytes.
    pub fn full_name_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.signed_portion());
        match &self.signature {
            Some(Signature::DigestSha256(d)) => hasher.update(d),
            Some(Signature::KeyChain { bytes, .. }) => hasher.update(bytes),
            None => {}
        }
        hasher.finalize().into()
    }

    /// The full name: the data name plus the implicit digest component.
    pub fn full_name(&self) -> Name {
        self.name
            .clone()
            .append(Component::digest(self.full_name_digest()))
    }
}

/// A pull request for a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Interest {
    pub name: Name,
    /// How long the request stays pending before timing out, in milliseconds.
    pub lifetime_ms: u32,
    pub must_be_fresh: bool,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Interest {
            name,
            lifetime_ms: 4000,
            must_be_fresh: false,
        }
    }

    pub fn with_lifetime(mut self, lifetime_ms: u32) -> Self {
        self.lifetime_ms = lifetime_ms;
        self
    }

    pub fn fresh(mut self) -> Self {
        self.must_be_fresh = true;
        self
    }

    /// True if this interest's name is a prefix of (or equal to) `data`'s name.
    pub fn matches(&self, data: &Data) -> bool {
        self.name.is_prefix_of(data.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name;

    fn create_test_data(content: &[u8]) -> Data {
        let mut d = Data::new(Name::from_uri("/test/stream").append_segment(0));
        d.set_content(content.to_vec());
        d
    }

    #[test]
    fn digest_signature_covers_content() {
        let mut d = create_test_data(b"hello");
        d.sign_with_digest();
        let sig = d.signature().unwrap().clone();

        let mut d2 = create_test_data(b"hellp");
        d2.sign_with_digest();
        assert_ne!(Some(&sig), d2.signature());
    }

    #[test]
    fn full_name_appends_digest_component() {
        let mut d = create_test_data(b"payload");
        d.sign_with_digest();

        let full = d.full_name();
        assert_eq!(full.len(), d.name().len() + 1);
        assert_eq!(
            full.get(full.len() - 1).unwrap().bytes(),
            &d.full_name_digest()[..]
        );
    }

    #[test]
    fn full_name_digest_changes_with_name() {
        let mut a = Data::new(Name::from_uri("/s").append_segment(0));
        a.set_content(b"x".to_vec());
        a.sign_with_digest();

        let mut b = Data::new(Name::from_uri("/s").append_segment(1));
        b.set_content(b"x".to_vec());
        b.sign_with_digest();

        assert_ne!(a.full_name_digest(), b.full_name_digest());
    }

    #[test]
    fn interest_prefix_matching() {
        let stream = Name::from_uri("/test/stream");
        let mut d = Data::new(name::data_segment(&name::frame(&stream, 3), 1));
        d.sign_with_digest();

        assert!(Interest::new(name::frame(&stream, 3)).matches(&d));
        assert!(Interest::new(d.name().clone()).matches(&d));
        assert!(!Interest::new(name::frame(&stream, 4)).matches(&d));
    }
}
