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

//! The producer stream engine.
//!
//! `process_image` feeds one raw frame into the codec and returns every
//! content object to publish for it: data segments, parity segments, the
//! segment manifest, frame metadata and (on Key frames) GOP delimiters.
//! Objects generated out-of-cycle by the `_live`/`_latest` interest filters
//! are drained onto the end of the returned list.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use namecast_fec::Rs28Encoder;
use namecast_types::data::{ContentType, Data};
use namecast_types::frame::{EncodedFrame, FrameType, ImageFormat, VideoImage};
use namecast_types::meta::{
    ContentMetaEnvelope, DelegationSet, FrameMeta, StreamMeta, Timestamp,
};
use namecast_types::name::{self, Component, Name};
use namecast_types::traits::{KeyChain, VideoCodec};
use namecast_types::Clock;

use crate::cache::MemoryContentCache;
use crate::error::{ProducerError, Result};
use crate::live_meta::LiveMetadata;
use crate::stats::{ProducerStats, ProducerStatsSnapshot};

/// Ratio of parity to data segments when FEC is enabled.
const PARITY_RATIO: f64 = 0.2;
/// Default freshness for the one-off stream metadata object, milliseconds.
const META_FRESHNESS_MS: u32 = 4000;

/// Encoder parameters the stream engine needs to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames per GOP.
    pub gop_length: u32,
}

/// Stream publishing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Payload bytes per segment.
    pub segment_size: usize,
    pub use_fec: bool,
    /// Mirror every returned packet into the memory content cache.
    pub store_in_mem_cache: bool,
    pub codec: CodecSettings,
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            segment_size: 8000,
            use_fec: true,
            store_in_mem_cache: false,
            codec: CodecSettings {
                width: 1280,
                height: 720,
                fps: 30,
                gop_length: 30,
            },
        }
    }
}

/// Freshness periods, milliseconds, derived from the codec settings.
#[derive(Debug, Clone, Copy)]
struct Freshness {
    sample: u32,
    key_sample: u32,
    gop: u32,
    latest: u32,
    live: u32,
    meta: u32,
}

impl Freshness {
    fn from_codec(codec: &CodecSettings) -> Self {
        let sample = 1000 / codec.fps;
        let gop = codec.gop_length * sample;
        Freshness {
            sample,
            key_sample: gop,
            gop,
            latest: sample,
            live: gop,
            meta: META_FRESHNESS_MS,
        }
    }
}

/// State mutated only from the encode cycle.
struct EngineState {
    frame_seq: u64,
    gop_pos: u64,
    gop_seq: u64,
    gop_started: bool,
}

/// State shared with the interest-filter side channel. One mutex guards the
/// queued packet list and the latest-pointer reads alike.
struct SharedState {
    queued: Vec<Data>,
    last_frame_prefix: Name,
    last_gop_prefix: Name,
    last_publish_epoch_ms: u64,
    last_cycle_monotonic_ns: u64,
}

/// Everything the `_live`/`_latest` filters need, shared with the engine.
struct SideChannel {
    stream_prefix: Name,
    freshness: Freshness,
    key_chain: Arc<dyn KeyChain>,
    live: LiveMetadata,
    stats: ProducerStats,
    shared: Mutex<SharedState>,
}

impl SideChannel {
    /// Sign `data` with the key chain, or attach a digest-only signature for
    /// media segments, and account for the publication either way.
    fn sign(&self, data: &mut Data, digest_only: bool) {
        if digest_only {
            data.sign_with_digest();
        } else {
            self.key_chain.sign(data);
            self.stats.sign_operations.fetch_add(1, Ordering::Relaxed);
        }
        self.stats
            .bytes_published
            .fetch_add(data.content().len() as u64, Ordering::Relaxed);
        self.stats
            .published_segments
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Generate the `_latest` pointer object and queue it for the next cycle.
    fn generate_latest(&self) -> Option<Data> {
        let mut shared = self.shared.lock().unwrap();

        let mut set = DelegationSet::new();
        set.add(0, shared.last_frame_prefix.clone());
        set.add(1, shared.last_gop_prefix.clone());
        let content = match set.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("latest pointer encoding failed: {e}");
                return None;
            }
        };

        let mut d = Data::new(name::latest(
            &self.stream_prefix,
            shared.last_publish_epoch_ms,
        ));
        d.meta_info.content_type = ContentType::Link;
        d.meta_info.freshness_ms = self.freshness.latest;
        d.set_content(content);
        self.sign(&mut d, false);

        shared.queued.push(d.clone());
        self.stats
            .latest_requests
            .fetch_add(1, Ordering::Relaxed);
        log::debug!("_latest request satisfied: {}", d.name());
        Some(d)
    }

    /// Generate the `_live` metadata object and queue it for the next cycle.
    fn generate_live(&self) -> Option<Data> {
        let mut shared = self.shared.lock().unwrap();

        let wire = self.live.to_wire(shared.last_cycle_monotonic_ns);
        let content = match wire.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("live metadata encoding failed: {e}");
                return None;
            }
        };

        let mut d = Data::new(name::live(
            &self.stream_prefix,
            shared.last_publish_epoch_ms,
        ));
        d.meta_info.freshness_ms = self.freshness.live;
        d.set_content(content);
        self.sign(&mut d, false);

        shared.queued.push(d.clone());
        self.stats
            .live_requests
            .fetch_add(1, Ordering::Relaxed);
        log::debug!("_live request satisfied: {}", d.name());
        Some(d)
    }
}

/// A live video stream publishing under `<base>/<timestamp>/<name>`.
pub struct VideoStream {
    base_prefix: Name,
    stream_name: String,
    stream_prefix: Name,
    settings: StreamSettings,
    freshness: Freshness,
    codec: Box<dyn VideoCodec>,
    clock: Arc<dyn Clock>,
    cache: Option<Arc<MemoryContentCache>>,
    side: Arc<SideChannel>,
    state: EngineState,
}

impl VideoStream {
    /// Create a stream and queue its one-off `_meta` object.
    ///
    /// Fails with `InvalidConfig` before any packet is generated if the
    /// settings are unusable.
    pub fn new(
        base_prefix: Name,
        stream_name: &str,
        settings: StreamSettings,
        key_chain: Arc<dyn KeyChain>,
        codec: Box<dyn VideoCodec>,
        clock: Arc<dyn Clock>,
        cache: Option<Arc<MemoryContentCache>>,
    ) -> Result<Self> {
        Self::validate(&settings)?;

        let timestamp_ms = clock.epoch_ms();
        let stream_prefix = name::stream_prefix(&base_prefix, timestamp_ms, stream_name);
        let freshness = Freshness::from_codec(&settings.codec);

        let side = Arc::new(SideChannel {
            stream_prefix: stream_prefix.clone(),
            freshness,
            key_chain,
            live: LiveMetadata::new(),
            stats: ProducerStats::new(),
            shared: Mutex::new(SharedState {
                queued: Vec::new(),
                last_frame_prefix: name::frame(&stream_prefix, u64::MAX),
                last_gop_prefix: name::gop(&stream_prefix, 0),
                last_publish_epoch_ms: timestamp_ms,
                last_cycle_monotonic_ns: 0,
            }),
        });

        if let Some(cache) = &cache {
            let live_side = side.clone();
            cache.set_interest_filter(
                stream_prefix.clone().append_str(name::LIVE),
                Box::new(move |_prefix, _interest| live_side.generate_live()),
            );
            let latest_side = side.clone();
            cache.set_interest_filter(
                stream_prefix.clone().append_str(name::LATEST),
                Box::new(move |_prefix, _interest| latest_side.generate_latest()),
            );
        }

        let mut stream = VideoStream {
            base_prefix,
            stream_name: stream_name.to_string(),
            stream_prefix,
            settings,
            freshness,
            codec,
            clock,
            cache,
            side,
            state: EngineState {
                frame_seq: 0,
                gop_pos: 0,
                gop_seq: 0,
                gop_started: false,
            },
        };
        stream.queue_stream_meta()?;
        Ok(stream)
    }

    fn validate(settings: &StreamSettings) -> Result<()> {
        if settings.segment_size == 0 {
            return Err(ProducerError::InvalidConfig(
                "segment size must be positive".to_string(),
            ));
        }
        if settings.codec.fps == 0 || settings.codec.fps > 1000 {
            return Err(ProducerError::InvalidConfig(format!(
                "unusable framerate {}",
                settings.codec.fps
            )));
        }
        if settings.codec.gop_length == 0 {
            return Err(ProducerError::InvalidConfig(
                "GOP length must be positive".to_string(),
            ));
        }
        if settings.codec.width == 0 || settings.codec.height == 0 {
            return Err(ProducerError::InvalidConfig(format!(
                "unusable resolution {}x{}",
                settings.codec.width, settings.codec.height
            )));
        }
        Ok(())
    }

    pub fn base_prefix(&self) -> &Name {
        &self.base_prefix
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// The full stream prefix `<base>/<timestamp>/<name>`.
    pub fn prefix(&self) -> &Name {
        &self.stream_prefix
    }

    pub fn statistics(&self) -> ProducerStatsSnapshot {
        self.side.stats.snapshot(self.side.live.rate())
    }

    /// Feed one raw frame through the codec and return the content objects
    /// to publish, in publish order.
    pub fn process_image(&mut self, format: ImageFormat, pixels: &[u8]) -> Result<Vec<Data>> {
        let this_cycle_ns = self.clock.monotonic_ns();
        let now_epoch_ms = self.clock.epoch_ms();

        self.side
            .stats
            .captured
            .fetch_add(1, Ordering::Relaxed);
        log::debug!("incoming frame #{}", self.state.frame_seq);

        let mut packets: Vec<Data> = Vec::new();
        let image = VideoImage {
            width: self.settings.codec.width,
            height: self.settings.codec.height,
            format,
            pixels,
        };

        let VideoStream {
            codec,
            state,
            settings,
            freshness,
            side,
            stream_prefix,
            cache,
            ..
        } = self;
        let cache_ref = cache.as_deref();

        {
            let mut on_encoded = |frame: EncodedFrame| {
                publish_frame(
                    state,
                    settings,
                    freshness,
                    side,
                    stream_prefix,
                    cache_ref,
                    &frame,
                    this_cycle_ns,
                    now_epoch_ms,
                    &mut packets,
                );
            };
            let mut on_dropped = || {
                side.stats
                    .dropped
                    .fetch_add(1, Ordering::Relaxed);
                log::warn!("frame dropped by encoder");
            };
            codec.encode(&image, false, &mut on_encoded, &mut on_dropped)?;
        }

        {
            let mut shared = self.side.shared.lock().unwrap();
            packets.append(&mut shared.queued);
            shared.last_cycle_monotonic_ns = this_cycle_ns;
        }

        if self.settings.store_in_mem_cache {
            if let Some(cache) = &self.cache {
                for d in &packets {
                    cache.add(d.clone(), now_epoch_ms);
                }
            }
        }

        Ok(packets)
    }

    /// Build the one-off stream `_meta` object and queue it.
    fn queue_stream_meta(&mut self) -> Result<()> {
        let meta = StreamMeta {
            width: self.settings.codec.width,
            height: self.settings.codec.height,
            description: format!("{} live stream", self.stream_name),
        };

        let mut d = Data::new(name::stream_meta(&self.stream_prefix));
        d.meta_info.freshness_ms = self.freshness.meta;
        d.set_content(meta.encode()?);
        self.side.sign(&mut d, false);
        log::trace!("{}", d.name());

        self.side.shared.lock().unwrap().queued.push(d);
        Ok(())
    }
}

/// Publish one encoded frame: segments, parity, manifest, frame meta and GOP
/// delimiters, appended to `packets` in publish order.
#[allow(clippy::too_many_arguments)]
fn publish_frame(
    state: &mut EngineState,
    settings: &StreamSettings,
    freshness: &Freshness,
    side: &SideChannel,
    stream_prefix: &Name,
    cache: Option<&MemoryContentCache>,
    frame: &EncodedFrame,
    this_cycle_ns: u64,
    now_epoch_ms: u64,
    packets: &mut Vec<Data>,
) {
    if frame.data.is_empty() {
        log::warn!("encoder produced an empty frame, skipping");
        return;
    }

    side.stats
        .encoded
        .fetch_add(1, Ordering::Relaxed);
    log::debug!(
        "encoded #{} {}: {} bytes",
        state.frame_seq,
        if frame.is_key() { "key" } else { "delta" },
        frame.data.len()
    );

    let is_key = frame.is_key();
    if is_key {
        // A new GOP begins.
        if state.gop_started {
            state.gop_seq += 1;
        }
        state.gop_pos = 0;
    }

    let frame_name = name::frame(stream_prefix, state.frame_seq);
    let seg_size = settings.segment_size;
    let n_data = frame.data.len().div_ceil(seg_size);
    let mut n_parity = if settings.use_fec {
        ((PARITY_RATIO * n_data as f64).ceil() as usize).max(1)
    } else {
        0
    };
    let sample_freshness = if is_key {
        freshness.key_sample
    } else {
        freshness.sample
    };

    let parity_bytes = if n_parity > 0 {
        let mut padded = frame.data.clone();
        padded.resize(n_data * seg_size, 0);
        match Rs28Encoder::new(n_data, n_parity, seg_size).and_then(|enc| enc.encode(&padded)) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("error generating FEC data: {e}");
                n_parity = 0;
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let mut segments: Vec<Data> = Vec::with_capacity(n_data + n_parity);
    let data_final_block = Component::segment(n_data as u64 - 1);
    for (seg, chunk) in frame.data.chunks(seg_size).enumerate() {
        let mut d = Data::new(name::data_segment(&frame_name, seg as u64));
        d.meta_info.freshness_ms = sample_freshness;
        d.meta_info.final_block_id = Some(data_final_block.clone());
        d.set_content(chunk.to_vec());
        side.sign(&mut d, true);
        segments.push(d);
    }

    if n_parity > 0 {
        let parity_final_block = Component::segment(n_parity as u64 - 1);
        for (seg, chunk) in parity_bytes.chunks(seg_size).enumerate() {
            let mut d = Data::new(name::parity_segment(&frame_name, seg as u64));
            d.meta_info.freshness_ms = sample_freshness;
            d.meta_info.final_block_id = Some(parity_final_block.clone());
            d.set_content(chunk.to_vec());
            side.sign(&mut d, true);
            segments.push(d);
        }
    }

    log::trace!(
        "generated {} segments ({n_data} data {n_parity} parity)",
        segments.len()
    );

    let mut manifest = namecast_types::SegmentsManifest::build(&frame_name, &segments);
    manifest.meta_info.freshness_ms = sample_freshness;
    side.sign(&mut manifest, false);

    let frame_meta = generate_frame_meta(
        state,
        side,
        cache,
        &frame_name,
        frame.frame_type,
        n_parity,
        this_cycle_ns,
        now_epoch_ms,
        sample_freshness,
    );

    packets.append(&mut segments);
    packets.push(manifest);
    if let Some(meta) = frame_meta {
        packets.push(meta);
    }

    if is_key {
        // Close the previous GOP at its last frame, then open this one.
        let prev_frame_prefix = side.shared.lock().unwrap().last_frame_prefix.clone();
        if state.gop_started {
            if let Some(end) = build_gop_pointer(
                side,
                name::gop_end(stream_prefix, state.gop_seq - 1),
                prev_frame_prefix,
                freshness.gop,
            ) {
                packets.push(end);
            }
        }
        if let Some(start) = build_gop_pointer(
            side,
            name::gop_start(stream_prefix, state.gop_seq),
            frame_name.clone(),
            freshness.gop,
        ) {
            packets.push(start);
        }
        state.gop_started = true;
        side.stats
            .key_frames_published
            .fetch_add(1, Ordering::Relaxed);
    }

    {
        let mut shared = side.shared.lock().unwrap();
        shared.last_frame_prefix = frame_name.clone();
        shared.last_publish_epoch_ms = now_epoch_ms;
        if is_key {
            shared.last_gop_prefix = name::gop(stream_prefix, state.gop_seq);
        }
    }

    side.live
        .update(now_epoch_ms, is_key, n_data, n_parity);
    log::debug!("published GObj-Frame {frame_name}");

    state.gop_pos += 1;
    state.frame_seq += 1;
}

/// Build one GOP pointer object.
fn build_gop_pointer(
    side: &SideChannel,
    pointer_name: Name,
    target: Name,
    freshness_ms: u32,
) -> Option<Data> {
    let mut set = DelegationSet::new();
    set.add(0, target);
    let content = match set.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("GOP pointer encoding failed: {e}");
            return None;
        }
    };

    let mut d = Data::new(pointer_name);
    d.meta_info.content_type = ContentType::Link;
    d.meta_info.freshness_ms = freshness_ms;
    d.set_content(content);
    side.sign(&mut d, false);
    if let Some(target) = set.get(0) {
        log::debug!("gop pointer {} -> {target}", d.name());
    }
    Some(d)
}

/// Build the frame metadata object, measuring generation delay against the
/// pending-interest table when a cache is attached.
#[allow(clippy::too_many_arguments)]
fn generate_frame_meta(
    state: &EngineState,
    side: &SideChannel,
    cache: Option<&MemoryContentCache>,
    frame_name: &Name,
    frame_type: FrameType,
    n_parity: usize,
    this_cycle_ns: u64,
    now_epoch_ms: u64,
    sample_freshness: u32,
) -> Option<Data> {
    let meta_name = name::frame_meta(frame_name);

    let mut generation_delay_ms = 0;
    if let Some(cache) = cache {
        let pending = cache.pending_interests_for(&meta_name, now_epoch_ms);
        if let Some((interest, arrival_ms)) = pending.first() {
            generation_delay_ms = now_epoch_ms.saturating_sub(*arrival_ms);
            log::trace!("PIT hit {}", interest.name);
        }
    }

    let meta = FrameMeta {
        capture_timestamp: Timestamp::from_nanos(this_cycle_ns),
        parity_size: n_parity as u32,
        gop_number: state.gop_seq,
        gop_position: state.gop_pos,
        frame_type,
        generation_delay_ms,
    };

    let envelope = match ContentMetaEnvelope::wrap(&meta, now_epoch_ms).and_then(|e| e.encode()) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("frame meta encoding failed: {e}");
            return None;
        }
    };

    let mut d = Data::new(meta_name);
    d.meta_info.freshness_ms = sample_freshness;
    d.set_content(envelope);
    side.sign(&mut d, false);
    Some(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use namecast_types::data::{Interest, Signature};
    use namecast_types::meta::LiveMeta;
    use namecast_types::name::{SegmentKind, StreamAddress};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct TestKeyChain;

    impl KeyChain for TestKeyChain {
        fn sign(&self, data: &mut Data) {
            data.set_signature(Signature::KeyChain {
                key_name: Name::from_uri("/test/identity/KEY/1"),
                bytes: vec![0xAB; 32],
            });
        }
    }

    struct TestClock {
        ms: AtomicU64,
    }

    impl TestClock {
        fn new(start_ms: u64) -> Arc<Self> {
            Arc::new(TestClock {
                ms: AtomicU64::new(start_ms),
            })
        }

        fn advance(&self, delta_ms: u64) {
            self.ms.fetch_add(delta_ms, Ordering::Relaxed);
        }
    }

    impl Clock for TestClock {
        fn epoch_ms(&self) -> u64 {
            self.ms.load(Ordering::Relaxed)
        }

        fn monotonic_ns(&self) -> u64 {
            self.ms.load(Ordering::Relaxed) * 1_000_000
        }
    }

    /// Scripted codec: each call pops the next frame, or drops when `None`.
    struct StubCodec {
        script: VecDeque<Option<EncodedFrame>>,
    }

    impl StubCodec {
        fn new(script: Vec<Option<EncodedFrame>>) -> Box<Self> {
            Box::new(StubCodec {
                script: script.into(),
            })
        }
    }

    impl VideoCodec for StubCodec {
        fn encode(
            &mut self,
            _image: &VideoImage<'_>,
            _force_key: bool,
            on_encoded: &mut dyn FnMut(EncodedFrame),
            on_dropped: &mut dyn FnMut(),
        ) -> std::result::Result<(), namecast_types::traits::CodecError> {
            match self.script.pop_front() {
                Some(Some(frame)) => on_encoded(frame),
                Some(None) => on_dropped(),
                None => on_dropped(),
            }
            Ok(())
        }
    }

    fn key_frame(len: usize) -> Option<EncodedFrame> {
        Some(EncodedFrame {
            frame_type: FrameType::Key,
            data: (0..len).map(|i| (i % 251) as u8).collect(),
        })
    }

    fn delta_frame(len: usize) -> Option<EncodedFrame> {
        Some(EncodedFrame {
            frame_type: FrameType::Delta,
            data: (0..len).map(|i| (i % 249) as u8).collect(),
        })
    }

    fn small_settings(segment_size: usize, use_fec: bool) -> StreamSettings {
        StreamSettings {
            segment_size,
            use_fec,
            store_in_mem_cache: false,
            codec: CodecSettings {
                width: 320,
                height: 240,
                fps: 25,
                gop_length: 10,
            },
        }
    }

    fn create_test_stream(
        script: Vec<Option<EncodedFrame>>,
        settings: StreamSettings,
        cache: Option<Arc<MemoryContentCache>>,
    ) -> (VideoStream, Arc<TestClock>) {
        let clock = TestClock::new(1_600_000_000_000);
        let stream = VideoStream::new(
            Name::from_uri("/icear/user"),
            "camera",
            settings,
            Arc::new(TestKeyChain),
            StubCodec::new(script),
            clock.clone(),
            cache,
        )
        .unwrap();
        (stream, clock)
    }

    #[test]
    fn init_rejects_bad_settings() {
        let mut settings = small_settings(30, false);
        settings.codec.fps = 0;
        let result = VideoStream::new(
            Name::from_uri("/p"),
            "s",
            settings,
            Arc::new(TestKeyChain),
            StubCodec::new(vec![]),
            TestClock::new(0),
            None,
        );
        assert!(matches!(result, Err(ProducerError::InvalidConfig(_))));
    }

    #[test]
    fn single_key_frame_publishes_expected_objects() {
        let (mut stream, _clock) =
            create_test_stream(vec![key_frame(100)], small_settings(30, false), None);

        let packets = stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();
        // stream meta (queued at init) is drained at the end of the list.
        let names: Vec<StreamAddress> = packets
            .iter()
            .map(|d| StreamAddress::parse(stream.prefix(), d.name()).unwrap())
            .collect();

        // 4 data segments of 30,30,30,10 bytes.
        for (i, expected_len) in [(0u64, 30), (1, 30), (2, 30), (3, 10)] {
            assert_eq!(
                names[i as usize],
                StreamAddress::Frame(namecast_types::FrameAddress {
                    frame_seq: 0,
                    kind: SegmentKind::Data(i)
                })
            );
            assert_eq!(packets[i as usize].content().len(), expected_len);
            assert_eq!(
                packets[i as usize].meta_info.final_block_id,
                Some(Component::segment(3))
            );
            assert!(packets[i as usize]
                .signature()
                .unwrap()
                .is_digest_only());
        }

        assert_eq!(
            names[4],
            StreamAddress::Frame(namecast_types::FrameAddress {
                frame_seq: 0,
                kind: SegmentKind::Manifest
            })
        );
        assert_eq!(
            names[5],
            StreamAddress::Frame(namecast_types::FrameAddress {
                frame_seq: 0,
                kind: SegmentKind::FrameMeta
            })
        );
        assert_eq!(
            names[6],
            StreamAddress::Gop {
                gop_seq: 0,
                start: true
            }
        );
        assert_eq!(names[7], StreamAddress::StreamMeta);
        assert_eq!(packets.len(), 8);

        // Frame meta fields per the publish contract.
        let envelope = ContentMetaEnvelope::decode(packets[5].content()).unwrap();
        let meta = envelope.frame_meta().unwrap();
        assert_eq!(meta.frame_type, FrameType::Key);
        assert_eq!(meta.gop_number, 0);
        assert_eq!(meta.gop_position, 0);
        assert_eq!(meta.parity_size, 0);
    }

    #[test]
    fn fec_adds_parity_and_manifest_covers_everything() {
        let (mut stream, _clock) =
            create_test_stream(vec![key_frame(450)], small_settings(100, true), None);

        let packets = stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();

        let parity: Vec<&Data> = packets
            .iter()
            .filter(|d| {
                matches!(
                    StreamAddress::parse(stream.prefix(), d.name()),
                    Ok(StreamAddress::Frame(a)) if matches!(a.kind, SegmentKind::Parity(_))
                )
            })
            .collect();
        // 5 data segments -> ceil(0.2 * 5) = 1 parity segment, seg_size bytes.
        assert_eq!(parity.len(), 1);
        assert_eq!(parity[0].content().len(), 100);
        assert_eq!(
            parity[0].meta_info.final_block_id,
            Some(Component::segment(0))
        );

        let manifest = packets
            .iter()
            .find(|d| {
                matches!(
                    StreamAddress::parse(stream.prefix(), d.name()),
                    Ok(StreamAddress::Frame(a)) if a.kind == SegmentKind::Manifest
                )
            })
            .unwrap();
        assert_eq!(namecast_types::SegmentsManifest::digest_count(manifest), 6);
        for d in packets.iter().take(6) {
            assert!(namecast_types::SegmentsManifest::has_data(manifest, d));
        }
        assert!(!manifest.signature().unwrap().is_digest_only());
    }

    #[test]
    fn gop_delimiters_across_two_gops() {
        let (mut stream, clock) = create_test_stream(
            vec![key_frame(60), delta_frame(60), key_frame(60)],
            small_settings(30, false),
            None,
        );

        let first = stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();
        clock.advance(40);
        let second = stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();
        clock.advance(40);
        let third = stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();

        let addr =
            |d: &Data| StreamAddress::parse(stream.prefix(), d.name()).unwrap();

        // First GOP opens with _gop/0/_start pointing at frame 0.
        let start0 = first.iter().find(|d| {
            addr(d) == StreamAddress::Gop { gop_seq: 0, start: true }
        });
        let set = DelegationSet::decode(start0.unwrap().content()).unwrap();
        assert_eq!(set.get(0), Some(&name::frame(stream.prefix(), 0)));

        // Deltas publish no pointers.
        assert!(!second
            .iter()
            .any(|d| matches!(addr(d), StreamAddress::Gop { .. })));

        // Second Key closes GOP 0 at frame 1 and opens GOP 1 at frame 2.
        let end0 = third
            .iter()
            .find(|d| addr(d) == StreamAddress::Gop { gop_seq: 0, start: false })
            .unwrap();
        let set = DelegationSet::decode(end0.content()).unwrap();
        assert_eq!(set.get(0), Some(&name::frame(stream.prefix(), 1)));

        let start1 = third
            .iter()
            .find(|d| addr(d) == StreamAddress::Gop { gop_seq: 1, start: true })
            .unwrap();
        let set = DelegationSet::decode(start1.content()).unwrap();
        assert_eq!(set.get(0), Some(&name::frame(stream.prefix(), 2)));

        // Delta of GOP 0 carries gop_number 0, position 1; second Key resets.
        let meta_of = |packets: &[Data]| {
            let d = packets
                .iter()
                .find(|d| {
                    matches!(addr(d), StreamAddress::Frame(a) if a.kind == SegmentKind::FrameMeta)
                })
                .unwrap()
                .clone();
            ContentMetaEnvelope::decode(d.content())
                .unwrap()
                .frame_meta()
                .unwrap()
        };
        let delta_meta = meta_of(&second);
        assert_eq!(delta_meta.gop_number, 0);
        assert_eq!(delta_meta.gop_position, 1);
        let key_meta = meta_of(&third);
        assert_eq!(key_meta.gop_number, 1);
        assert_eq!(key_meta.gop_position, 0);
    }

    #[test]
    fn dropped_frames_do_not_consume_sequence_numbers() {
        let (mut stream, _clock) = create_test_stream(
            vec![key_frame(60), None, delta_frame(60)],
            small_settings(30, false),
            None,
        );

        stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();
        let dropped = stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();
        assert!(dropped.is_empty());
        let third = stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();

        // The frame after the drop is #1, keeping published numbering contiguous.
        assert!(third.iter().any(|d| {
            matches!(
                StreamAddress::parse(stream.prefix(), d.name()),
                Ok(StreamAddress::Frame(a))
                    if a.frame_seq == 1 && a.kind == SegmentKind::Data(0)
            )
        }));

        let stats = stream.statistics();
        assert_eq!(stats.captured, 3);
        assert_eq!(stats.encoded, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn latest_filter_answers_with_newest_pointers() {
        let cache = Arc::new(MemoryContentCache::new());
        let (mut stream, clock) = create_test_stream(
            vec![key_frame(60), delta_frame(60)],
            small_settings(30, false),
            Some(cache.clone()),
        );

        stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();
        clock.advance(40);
        stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();

        let latest_name = stream.prefix().clone().append_str(name::LATEST);
        let answer = cache
            .on_interest(&Interest::new(latest_name).fresh(), clock.epoch_ms())
            .unwrap();

        let set = DelegationSet::decode(answer.content()).unwrap();
        assert_eq!(set.get(0), Some(&name::frame(stream.prefix(), 1)));
        assert_eq!(set.get(1), Some(&name::gop(stream.prefix(), 0)));
        // Freshness of the latest pointer tracks the sample period.
        assert_eq!(answer.meta_info.freshness_ms, 1000 / 25);

        // The generated object is also queued for the next cycle.
        clock.advance(40);
        let next = stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();
        assert!(next
            .iter()
            .any(|d| StreamAddress::parse(stream.prefix(), d.name())
                == Ok(StreamAddress::Latest)));
    }

    #[test]
    fn live_filter_reports_rate_and_segment_averages() {
        let cache = Arc::new(MemoryContentCache::new());
        let (mut stream, clock) = create_test_stream(
            vec![key_frame(120), delta_frame(60), delta_frame(60)],
            small_settings(30, false),
            Some(cache.clone()),
        );

        for _ in 0..3 {
            stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();
            clock.advance(40);
        }

        let live_name = stream.prefix().clone().append_str(name::LIVE);
        let answer = cache
            .on_interest(&Interest::new(live_name), clock.epoch_ms())
            .unwrap();
        let live = LiveMeta::decode(answer.content()).unwrap();
        assert!((live.segnum_key - 4.0).abs() < f64::EPSILON); // 120 / 30
        assert!((live.segnum_delta - 2.0).abs() < f64::EPSILON); // 60 / 30
        assert!(live.framerate > 0.0);
    }

    #[test]
    fn pending_meta_interest_yields_generation_delay() {
        let cache = Arc::new(MemoryContentCache::new());
        let mut settings = small_settings(30, false);
        settings.store_in_mem_cache = true;
        let (mut stream, clock) =
            create_test_stream(vec![key_frame(60)], settings, Some(cache.clone()));

        // A consumer asks for frame 0's meta before it exists.
        let meta_name = name::frame_meta(&name::frame(stream.prefix(), 0));
        assert!(cache
            .on_interest(&Interest::new(meta_name).with_lifetime(4000), clock.epoch_ms())
            .is_none());

        clock.advance(25);
        let packets = stream.process_image(ImageFormat::I420, &[0u8; 16]).unwrap();

        let meta_data = packets
            .iter()
            .find(|d| {
                matches!(
                    StreamAddress::parse(stream.prefix(), d.name()),
                    Ok(StreamAddress::Frame(a)) if a.kind == SegmentKind::FrameMeta
                )
            })
            .unwrap();
        let meta = ContentMetaEnvelope::decode(meta_data.content())
            .unwrap()
            .frame_meta()
            .unwrap();
        assert_eq!(meta.generation_delay_ms, 25);
    }
}
