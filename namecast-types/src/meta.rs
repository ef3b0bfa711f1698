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

//! Wire metadata payloads: frame meta, live/latest pointers and stream meta.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::FrameType;
use crate::name::Name;

/// Content-type tag carried inside frame-meta envelopes.
pub const FRAME_CONTENT_TYPE: &str = "ndnrtcv4";

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("malformed metadata payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MetaError>;

/// A split timestamp, seconds plus nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    /// Split a monotonic nanosecond reading.
    pub fn from_nanos(ns: u64) -> Self {
        Timestamp {
            seconds: (ns / 1_000_000_000) as i64,
            nanos: (ns % 1_000_000_000) as i32,
        }
    }

    pub fn as_nanos(&self) -> u64 {
        self.seconds as u64 * 1_000_000_000 + self.nanos as u64
    }

    pub fn as_millis(&self) -> u64 {
        self.as_nanos() / 1_000_000
    }
}

/// Per-frame metadata published alongside a frame's segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub capture_timestamp: Timestamp,
    /// Number of parity segments published for this frame.
    pub parity_size: u32,
    pub gop_number: u64,
    pub gop_position: u64,
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Wait time in the pending-interest table at publish moment, if any.
    pub generation_delay_ms: u64,
}

/// Envelope wrapping frame metadata on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetaEnvelope {
    pub content_type: String,
    pub timestamp_ms: u64,
    pub has_segments: bool,
    /// Serialized inner record (e.g. [`FrameMeta`]).
    pub other: Vec<u8>,
}

impl ContentMetaEnvelope {
    pub fn wrap(frame_meta: &FrameMeta, timestamp_ms: u64) -> Result<Self> {
        Ok(ContentMetaEnvelope {
            content_type: FRAME_CONTENT_TYPE.to_string(),
            timestamp_ms,
            has_segments: true,
            other: serde_json::to_vec(frame_meta)?,
        })
    }

    pub fn frame_meta(&self) -> Result<FrameMeta> {
        Ok(serde_json::from_slice(&self.other)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Live metadata advertised under `<stream>/_live`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMeta {
    pub timestamp: Timestamp,
    /// Current producer framerate, frames per second.
    pub framerate: f64,
    /// Average data segments per Delta frame.
    pub segnum_delta: f64,
    /// Average parity segments per Delta frame.
    pub segnum_delta_parity: f64,
    /// Average data segments per Key frame.
    pub segnum_key: f64,
    /// Average parity segments per Key frame.
    pub segnum_key_parity: f64,
}

impl LiveMeta {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Static stream description published once under `<stream>/_meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    pub width: u32,
    pub height: u32,
    pub description: String,
}

impl StreamMeta {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// An ordered set of name delegations, used by GOP and latest pointers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DelegationSet {
    delegations: Vec<Delegation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub preference: u32,
    pub name: Name,
}

impl DelegationSet {
    pub fn new() -> Self {
        DelegationSet::default()
    }

    pub fn add(&mut self, preference: u32, name: Name) {
        self.delegations.push(Delegation { preference, name });
        self.delegations.sort_by_key(|d| d.preference);
    }

    pub fn get(&self, index: usize) -> Option<&Name> {
        self.delegations.get(index).map(|d| &d.name)
    }

    pub fn len(&self) -> usize {
        self.delegations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Audio sample bundle carried by one audio slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBundle {
    pub codec: AudioCodec,
    /// Encoded sample blocks in capture order.
    pub blocks: Vec<Vec<u8>>,
}

/// Audio codecs this system knows how to hand to the audio channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    G722,
    Opus,
}

impl AudioBundle {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_split_round_trip() {
        let ts = Timestamp::from_nanos(1_234_567_890_123);
        assert_eq!(ts.seconds, 1_234);
        assert_eq!(ts.nanos, 567_890_123);
        assert_eq!(ts.as_nanos(), 1_234_567_890_123);
        assert_eq!(ts.as_millis(), 1_234_567);
    }

    #[test]
    fn frame_meta_envelope_round_trip() {
        let meta = FrameMeta {
            capture_timestamp: Timestamp::from_nanos(5_000_000_000),
            parity_size: 2,
            gop_number: 3,
            gop_position: 7,
            frame_type: FrameType::Delta,
            generation_delay_ms: 12,
        };
        let envelope = ContentMetaEnvelope::wrap(&meta, 99).unwrap();
        assert_eq!(envelope.content_type, FRAME_CONTENT_TYPE);
        assert!(envelope.has_segments);

        let decoded = ContentMetaEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded.timestamp_ms, 99);
        assert_eq!(decoded.frame_meta().unwrap(), meta);
    }

    #[test]
    fn delegation_set_orders_by_preference() {
        let mut set = DelegationSet::new();
        set.add(1, Name::from_uri("/gop"));
        set.add(0, Name::from_uri("/frame"));

        assert_eq!(set.get(0), Some(&Name::from_uri("/frame")));
        assert_eq!(set.get(1), Some(&Name::from_uri("/gop")));

        let decoded = DelegationSet::decode(&set.encode().unwrap()).unwrap();
        assert_eq!(decoded, set);
    }

    #[test]
    fn stream_meta_sets_both_dimensions() {
        let meta = StreamMeta {
            width: 1280,
            height: 720,
            description: "front camera".to_string(),
        };
        let decoded = StreamMeta::decode(&meta.encode().unwrap()).unwrap();
        assert_eq!(decoded.width, 1280);
        assert_eq!(decoded.height, 720);
    }
}
