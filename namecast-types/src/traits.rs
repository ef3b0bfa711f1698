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

//! Collaborator contracts. The raw network face, the key chain, the video
//! codec and the renderers live outside this workspace; the traits here are
//! the seams they plug into.

use thiserror::Error;

use crate::data::{Data, Interest};
use crate::frame::{EncodedFrame, VideoImage};
use crate::meta::AudioCodec;
use crate::name::Name;

/// Callback invoked when data answers an interest.
pub type OnData = Box<dyn FnMut(&Interest, &Data)>;
/// Callback invoked when an interest times out unanswered.
pub type OnTimeout = Box<dyn FnMut(&Interest)>;
/// Callback invoked for each interest arriving under a registered prefix.
pub type OnInterest = Box<dyn FnMut(&Name, &Interest)>;
/// Callback invoked when prefix registration fails.
pub type OnRegisterFailed = Box<dyn FnMut(&Name)>;

/// The network face: expresses interests and publishes data.
///
/// All face I/O happens on a single reactor thread; implementations multiplex
/// network and timer events cooperatively.
pub trait Face {
    fn express_interest(&mut self, interest: Interest, on_data: OnData, on_timeout: OnTimeout);
    fn put_data(&mut self, data: &Data);
    fn register_prefix(
        &mut self,
        prefix: &Name,
        on_interest: OnInterest,
        on_register_failed: OnRegisterFailed,
    );
}

/// Signing capability.
pub trait KeyChain: Send + Sync {
    /// Attach an asymmetric signature to `data`.
    fn sign(&self, data: &mut Data);
}

#[derive(Error, Debug)]
#[error("codec failure: {0}")]
pub struct CodecError(pub String);

/// The video codec seam. `encode` invokes exactly one of the two callbacks:
/// `on_encoded` with the compressed frame, or `on_dropped` when the encoder
/// skipped this input.
pub trait VideoCodec {
    fn encode(
        &mut self,
        image: &VideoImage<'_>,
        force_key: bool,
        on_encoded: &mut dyn FnMut(EncodedFrame),
        on_dropped: &mut dyn FnMut(),
    ) -> Result<(), CodecError>;
}

/// Consumer of assembled video frames, downstream of playout (the decoder).
pub trait EncodedFrameConsumer {
    fn process_frame(&mut self, frame_seq: u64, frame: &EncodedFrame);
}

/// Rendering surface lifecycle.
pub trait Renderer {
    fn start_rendering(&mut self, stream_id: &str);
    fn stop_rendering(&mut self);
}

/// Output ring of the audio device.
pub trait AudioSink {
    /// Deliver one encoded sample block for decode into the output ring.
    fn deliver_samples(&mut self, codec: AudioCodec, block: &[u8]);
}
