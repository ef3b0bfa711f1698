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

//! Hierarchical content names and the naming scheme used by live streams.
//!
//! A stream publishes under `<base-prefix>/<timestamp>/<stream-name>`; below
//! that prefix live the stream metadata (`_meta`), the live/latest pointers
//! (`_live`, `_latest`), per-frame trees (`<frameSeq>/<seg>`,
//! `<frameSeq>/_parity/<seg>`, `<frameSeq>/_manifest`, `<frameSeq>/_meta`)
//! and GOP delimiters (`_gop/<gopSeq>/_start`, `_gop/<gopSeq>/_end`).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Marker octet for segment-number components.
const SEGMENT_MARKER: u8 = 0x00;
/// Marker octet for timestamp components.
const TIMESTAMP_MARKER: u8 = 0xFC;
/// Marker octet for sequence-number components.
const SEQUENCE_MARKER: u8 = 0xFE;

/// Literal name components recognized by the stream naming scheme.
pub const META: &str = "_meta";
pub const LIVE: &str = "_live";
pub const LATEST: &str = "_latest";
pub const MANIFEST: &str = "_manifest";
pub const PARITY: &str = "_parity";
pub const GOP: &str = "_gop";
pub const GOP_START: &str = "_start";
pub const GOP_END: &str = "_end";

/// Result type for name parsing.
pub type Result<T> = std::result::Result<T, NameError>;

/// Errors raised while parsing names against the stream naming scheme.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("name does not start with the stream prefix")]
    NotUnderPrefix,

    #[error("name is truncated: {0}")]
    Truncated(&'static str),

    #[error("unrecognized component {0:?}")]
    Unrecognized(String),

    #[error("component is not a {0} component")]
    WrongComponentType(&'static str),
}

/// A single name component: raw bytes, optionally carrying a typed marker.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Component(Vec<u8>);

impl Component {
    /// A generic (untyped) component from UTF-8 text.
    pub fn generic(s: &str) -> Self {
        Component(s.as_bytes().to_vec())
    }

    /// A segment-number component (`%00`-marked).
    pub fn segment(seg: u64) -> Self {
        Self::marked(SEGMENT_MARKER, seg)
    }

    /// A sequence-number component (`%FE`-marked).
    pub fn sequence(seq: u64) -> Self {
        Self::marked(SEQUENCE_MARKER, seq)
    }

    /// A timestamp component (`%FC`-marked), value in milliseconds.
    pub fn timestamp(ms: u64) -> Self {
        Self::marked(TIMESTAMP_MARKER, ms)
    }

    /// An implicit-digest component (raw 32 bytes).
    pub fn digest(digest: [u8; 32]) -> Self {
        Component(digest.to_vec())
    }

    fn marked(marker: u8, value: u64) -> Self {
        let mut bytes = vec![marker];
        // Shortest big-endian encoding, at least one octet.
        let mut started = false;
        for shift in (0..8).rev() {
            let octet = (value >> (shift * 8)) as u8;
            if octet != 0 || started || shift == 0 {
                bytes.push(octet);
                started = true;
            }
        }
        Component(bytes)
    }

    fn marked_value(&self, marker: u8) -> Option<u64> {
        if self.0.len() < 2 || self.0.len() > 9 || self.0[0] != marker {
            return None;
        }
        let mut value = 0u64;
        for &octet in &self.0[1..] {
            value = (value << 8) | octet as u64;
        }
        Some(value)
    }

    /// Decode a segment number, if this is a segment component.
    pub fn as_segment(&self) -> Option<u64> {
        self.marked_value(SEGMENT_MARKER)
    }

    /// Decode a sequence number, if this is a sequence component.
    pub fn as_sequence(&self) -> Option<u64> {
        self.marked_value(SEQUENCE_MARKER)
    }

    /// Decode a timestamp in milliseconds, if this is a timestamp component.
    pub fn as_timestamp(&self) -> Option<u64> {
        self.marked_value(TIMESTAMP_MARKER)
    }

    /// True if this component is the given literal string.
    pub fn is(&self, literal: &str) -> bool {
        self.0 == literal.as_bytes()
    }

    /// Raw component bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() && b != b'%' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "%{b:02X}")?;
            }
        }
        Ok(())
    }
}

/// A hierarchical content name: an ordered sequence of components.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Name(Vec<Component>);

impl Name {
    pub fn new() -> Self {
        Name(Vec::new())
    }

    /// Build a name from `/`-separated UTF-8 components.
    pub fn from_uri(uri: &str) -> Self {
        Name(
            uri.split('/')
                .filter(|c| !c.is_empty())
                .map(Component::generic)
                .collect(),
        )
    }

    /// Append a component, builder style.
    pub fn append(mut self, component: Component) -> Self {
        self.0.push(component);
        self
    }

    pub fn append_str(self, literal: &str) -> Self {
        self.append(Component::generic(literal))
    }

    pub fn append_sequence(self, seq: u64) -> Self {
        self.append(Component::sequence(seq))
    }

    pub fn append_segment(self, seg: u64) -> Self {
        self.append(Component::segment(seg))
    }

    pub fn append_timestamp(self, ms: u64) -> Self {
        self.append(Component::timestamp(ms))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Component> {
        self.0.get(index)
    }

    /// The first `n` components as a new name.
    pub fn prefix(&self, n: usize) -> Name {
        Name(self.0[..n.min(self.0.len())].to_vec())
    }

    /// True if `self` is a prefix of `other`.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    pub fn components(&self) -> &[Component] {
        &self.0
    }

    /// Canonical wire bytes of this name: length-prefixed components.
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for c in &self.0 {
            out.extend_from_slice(&(c.0.len() as u32).to_be_bytes());
            out.extend_from_slice(&c.0);
        }
        out
    }

    /// Canonical URI rendering for logs.
    pub fn to_uri(&self) -> String {
        if self.0.is_empty() {
            return "/".to_string();
        }
        let mut s = String::new();
        for c in &self.0 {
            s.push('/');
            s.push_str(&format!("{c:?}"));
        }
        s
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

// ── Naming scheme builders ────────────────────────────────────────────────────

/// Compose the stream prefix `<base>/<timestamp>/<stream-name>`.
pub fn stream_prefix(base_prefix: &Name, timestamp_ms: u64, stream_name: &str) -> Name {
    base_prefix
        .clone()
        .append_timestamp(timestamp_ms)
        .append_str(stream_name)
}

/// `<stream>/_meta`
pub fn stream_meta(stream: &Name) -> Name {
    stream.clone().append_str(META)
}

/// `<stream>/_live/<timestamp>`
pub fn live(stream: &Name, timestamp_ms: u64) -> Name {
    stream.clone().append_str(LIVE).append_timestamp(timestamp_ms)
}

/// `<stream>/_latest/<timestamp>`
pub fn latest(stream: &Name, timestamp_ms: u64) -> Name {
    stream
        .clone()
        .append_str(LATEST)
        .append_timestamp(timestamp_ms)
}

/// `<stream>/<frameSeq>`
pub fn frame(stream: &Name, frame_seq: u64) -> Name {
    stream.clone().append_sequence(frame_seq)
}

/// `<framePrefix>/<segIdx>`
pub fn data_segment(frame_prefix: &Name, seg: u64) -> Name {
    frame_prefix.clone().append_segment(seg)
}

/// `<framePrefix>/_parity/<segIdx>`
pub fn parity_segment(frame_prefix: &Name, seg: u64) -> Name {
    frame_prefix.clone().append_str(PARITY).append_segment(seg)
}

/// `<framePrefix>/_manifest`
pub fn frame_manifest(frame_prefix: &Name) -> Name {
    frame_prefix.clone().append_str(MANIFEST)
}

/// `<framePrefix>/_meta`
pub fn frame_meta(frame_prefix: &Name) -> Name {
    frame_prefix.clone().append_str(META)
}

/// `<stream>/_gop/<gopSeq>`
pub fn gop(stream: &Name, gop_seq: u64) -> Name {
    stream.clone().append_str(GOP).append_sequence(gop_seq)
}

/// `<stream>/_gop/<gopSeq>/_start`
pub fn gop_start(stream: &Name, gop_seq: u64) -> Name {
    gop(stream, gop_seq).append_str(GOP_START)
}

/// `<stream>/_gop/<gopSeq>/_end`
pub fn gop_end(stream: &Name, gop_seq: u64) -> Name {
    gop(stream, gop_seq).append_str(GOP_END)
}

// ── Naming scheme parser ──────────────────────────────────────────────────────

/// Which object of a frame a name addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Data(u64),
    Parity(u64),
    Manifest,
    FrameMeta,
}

/// A parsed frame-level address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAddress {
    pub frame_seq: u64,
    pub kind: SegmentKind,
}

/// A name classified against a stream prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAddress {
    StreamMeta,
    Live,
    Latest,
    Gop { gop_seq: u64, start: bool },
    Frame(FrameAddress),
}

impl StreamAddress {
    /// Classify `name` relative to `stream` according to the naming scheme.
    pub fn parse(stream: &Name, name: &Name) -> Result<StreamAddress> {
        if !stream.is_prefix_of(name) {
            return Err(NameError::NotUnderPrefix);
        }
        let rest = &name.components()[stream.len()..];
        let head = rest.first().ok_or(NameError::Truncated("empty suffix"))?;

        if head.is(META) {
            return Ok(StreamAddress::StreamMeta);
        }
        if head.is(LIVE) {
            return Ok(StreamAddress::Live);
        }
        if head.is(LATEST) {
            return Ok(StreamAddress::Latest);
        }
        if head.is(GOP) {
            let seq = rest
                .get(1)
                .ok_or(NameError::Truncated("gop sequence"))?
                .as_sequence()
                .ok_or(NameError::WrongComponentType("sequence"))?;
            let delim = rest.get(2).ok_or(NameError::Truncated("gop delimiter"))?;
            if delim.is(GOP_START) {
                return Ok(StreamAddress::Gop {
                    gop_seq: seq,
                    start: true,
                });
            }
            if delim.is(GOP_END) {
                return Ok(StreamAddress::Gop {
                    gop_seq: seq,
                    start: false,
                });
            }
            return Err(NameError::Unrecognized(format!("{delim:?}")));
        }

        let frame_seq = head
            .as_sequence()
            .ok_or_else(|| NameError::Unrecognized(format!("{head:?}")))?;
        let second = rest
            .get(1)
            .ok_or(NameError::Truncated("frame object component"))?;

        let kind = if let Some(seg) = second.as_segment() {
            SegmentKind::Data(seg)
        } else if second.is(PARITY) {
            let seg = rest
                .get(2)
                .ok_or(NameError::Truncated("parity segment"))?
                .as_segment()
                .ok_or(NameError::WrongComponentType("segment"))?;
            SegmentKind::Parity(seg)
        } else if second.is(MANIFEST) {
            SegmentKind::Manifest
        } else if second.is(META) {
            SegmentKind::FrameMeta
        } else {
            return Err(NameError::Unrecognized(format!("{second:?}")));
        };

        Ok(StreamAddress::Frame(FrameAddress { frame_seq, kind }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stream() -> Name {
        stream_prefix(&Name::from_uri("/icear/user"), 1_560_000_000_000, "camera")
    }

    #[test]
    fn marked_components_round_trip() {
        assert_eq!(Component::segment(0).as_segment(), Some(0));
        assert_eq!(Component::segment(12).as_segment(), Some(12));
        assert_eq!(Component::sequence(73_000).as_sequence(), Some(73_000));
        assert_eq!(
            Component::timestamp(1_560_000_000_000).as_timestamp(),
            Some(1_560_000_000_000)
        );
        // Markers are not interchangeable.
        assert_eq!(Component::segment(5).as_sequence(), None);
        assert_eq!(Component::generic("_meta").as_segment(), None);
    }

    #[test]
    fn prefix_relation() {
        let stream = test_stream();
        let seg = data_segment(&frame(&stream, 7), 2);
        assert!(stream.is_prefix_of(&seg));
        assert!(!seg.is_prefix_of(&stream));
        assert_eq!(seg.prefix(stream.len()), stream);
    }

    #[test]
    fn parses_data_and_parity_segments() {
        let stream = test_stream();
        let f = frame(&stream, 42);

        let addr = StreamAddress::parse(&stream, &data_segment(&f, 3)).unwrap();
        assert_eq!(
            addr,
            StreamAddress::Frame(FrameAddress {
                frame_seq: 42,
                kind: SegmentKind::Data(3)
            })
        );

        let addr = StreamAddress::parse(&stream, &parity_segment(&f, 0)).unwrap();
        assert_eq!(
            addr,
            StreamAddress::Frame(FrameAddress {
                frame_seq: 42,
                kind: SegmentKind::Parity(0)
            })
        );
    }

    #[test]
    fn parses_frame_metadata_names() {
        let stream = test_stream();
        let f = frame(&stream, 9);

        assert_eq!(
            StreamAddress::parse(&stream, &frame_manifest(&f)).unwrap(),
            StreamAddress::Frame(FrameAddress {
                frame_seq: 9,
                kind: SegmentKind::Manifest
            })
        );
        assert_eq!(
            StreamAddress::parse(&stream, &frame_meta(&f)).unwrap(),
            StreamAddress::Frame(FrameAddress {
                frame_seq: 9,
                kind: SegmentKind::FrameMeta
            })
        );
    }

    #[test]
    fn parses_stream_level_names() {
        let stream = test_stream();
        assert_eq!(
            StreamAddress::parse(&stream, &stream_meta(&stream)).unwrap(),
            StreamAddress::StreamMeta
        );
        assert_eq!(
            StreamAddress::parse(&stream, &live(&stream, 123)).unwrap(),
            StreamAddress::Live
        );
        assert_eq!(
            StreamAddress::parse(&stream, &latest(&stream, 123)).unwrap(),
            StreamAddress::Latest
        );
        assert_eq!(
            StreamAddress::parse(&stream, &gop_start(&stream, 4)).unwrap(),
            StreamAddress::Gop {
                gop_seq: 4,
                start: true
            }
        );
        assert_eq!(
            StreamAddress::parse(&stream, &gop_end(&stream, 3)).unwrap(),
            StreamAddress::Gop {
                gop_seq: 3,
                start: false
            }
        );
    }

    #[test]
    fn rejects_foreign_and_malformed_names() {
        let stream = test_stream();
        let other = Name::from_uri("/someone/else");
        assert_eq!(
            StreamAddress::parse(&stream, &stream_meta(&other)),
            Err(NameError::NotUnderPrefix)
        );

        let bare_frame = frame(&stream, 1);
        assert!(matches!(
            StreamAddress::parse(&stream, &bare_frame),
            Err(NameError::Truncated(_))
        ));

        let junk = stream.clone().append_str("_bogus");
        assert!(matches!(
            StreamAddress::parse(&stream, &junk),
            Err(NameError::Unrecognized(_))
        ));
    }

    #[test]
    fn uri_rendering_is_readable() {
        let stream = test_stream();
        let uri = data_segment(&frame(&stream, 1), 0).to_uri();
        assert!(uri.starts_with("/icear/user/"));
        assert!(uri.contains("/camera/"));
    }
}
