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

//! Fundamental frame-level data structures.

use serde::{Deserialize, Serialize};

/// The type of an encoded frame, indicating its dependency on other frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    /// A Key frame (I-frame) can be decoded independently of any other frame.
    Key,
    /// A Delta frame (P-frame) requires the preceding frames of its GOP.
    Delta,
}

/// The class of a published segment within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentClass {
    Data,
    Parity,
}

/// A compressed frame as produced by the video codec.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub frame_type: FrameType,
    pub data: Vec<u8>,
}

impl EncodedFrame {
    pub fn is_key(&self) -> bool {
        self.frame_type == FrameType::Key
    }
}

/// Raw pixel formats accepted by the producer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    I420,
    Bgra,
}

/// A raw captured image handed to the codec.
#[derive(Debug)]
pub struct VideoImage<'a> {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub pixels: &'a [u8],
}
