//! Deterministic in-memory collaborators.
//!
//! Scripted stand-ins for the capture, codec and container collaborators.
//! Every implementation records its call history behind a cloneable
//! handle so tests can feed input and assert on output while the engine
//! owns the collaborator itself.

use crate::config::EncoderConfig;
use crate::encoder::{Encoder, Packet, StreamKind, Timebase};
use crate::error::{EncoderError, MuxerError, SourceError};
use crate::frame::Frame;
use crate::muxer::{Muxer, StreamDesc};
use crate::sources::{Acquired, AudioFormat, AudioSource, FrameSource, SampleFormat};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Capture timestamp of frame `index` on an exact `fps` grid
pub fn capture_grid_ms(base_ms: u64, index: u64, fps: u32) -> u64 {
    base_ms + (index * 1000 + fps as u64 / 2) / fps as u64
}

/// Shared feed controlling a [`FakeFrameSource`]
#[derive(Clone, Default)]
pub struct FrameFeed {
    inner: Arc<FrameFeedInner>,
}

#[derive(Default)]
struct FrameFeedInner {
    queue: Mutex<VecDeque<Frame>>,
    fatal: Mutex<Option<String>>,
    acquired: AtomicU64,
}

impl FrameFeed {
    /// Queue one frame for acquisition
    pub fn push(&self, frame: Frame) {
        lock(&self.inner.queue).push_back(frame);
    }

    /// Queue `count` blank frames on an exact fps capture grid starting
    /// at `base_ms`
    pub fn push_sequence(&self, width: u32, height: u32, base_ms: u64, count: u64, fps: u32) {
        let mut queue = lock(&self.inner.queue);
        for i in 0..count {
            queue.push_back(Frame::blank(width, height, capture_grid_ms(base_ms, i, fps)));
        }
    }

    /// Make the next acquisition after the queue empties fail fatally
    pub fn inject_fatal(&self, details: &str) {
        *lock(&self.inner.fatal) = Some(details.to_string());
    }

    /// Frames still waiting to be acquired
    pub fn pending(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Total successful acquisitions so far
    pub fn acquired(&self) -> u64 {
        self.inner.acquired.load(Ordering::Relaxed)
    }
}

/// Frame source driven entirely by a [`FrameFeed`]
pub struct FakeFrameSource {
    feed: FrameFeed,
    width: u32,
    height: u32,
}

impl FakeFrameSource {
    pub fn new(width: u32, height: u32) -> (Self, FrameFeed) {
        let feed = FrameFeed::default();
        (
            Self {
                feed: feed.clone(),
                width,
                height,
            },
            feed,
        )
    }
}

#[async_trait]
impl FrameSource for FakeFrameSource {
    async fn init(&mut self) -> Result<(), SourceError> {
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(SourceError::OddDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    async fn try_acquire(&mut self, timeout: Duration) -> Result<Acquired, SourceError> {
        if let Some(frame) = lock(&self.feed.inner.queue).pop_front() {
            self.feed.inner.acquired.fetch_add(1, Ordering::Relaxed);
            return Ok(Acquired::Frame(frame));
        }

        if let Some(details) = lock(&self.feed.inner.fatal).take() {
            return Err(SourceError::Fatal { details });
        }

        tokio::time::sleep(timeout).await;
        Ok(Acquired::Timeout)
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Shared feed controlling a [`FakeAudioSource`]
#[derive(Clone, Default)]
pub struct AudioFeed {
    chunks: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl AudioFeed {
    /// Queue one PCM chunk; each `drain` call returns one queued chunk
    pub fn push(&self, chunk: Vec<u8>) {
        lock(&self.chunks).push_back(chunk);
    }
}

/// Audio source returning scripted PCM chunks, then silence (empty drains)
pub struct FakeAudioSource {
    feed: AudioFeed,
    format: AudioFormat,
}

impl FakeAudioSource {
    pub fn new(sample_rate: u32, channels: u16) -> (Self, AudioFeed) {
        let feed = AudioFeed::default();
        (
            Self {
                feed: feed.clone(),
                format: AudioFormat {
                    sample_rate,
                    channels,
                    sample_format: SampleFormat::F32,
                },
            },
            feed,
        )
    }
}

#[async_trait]
impl AudioSource for FakeAudioSource {
    async fn init(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn drain(&mut self) -> Vec<u8> {
        lock(&self.feed.chunks).pop_front().unwrap_or_default()
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

/// Recorded call history of a [`FakeEncoder`]
#[derive(Clone, Default)]
pub struct EncoderLog {
    inner: Arc<Mutex<EncoderLogInner>>,
}

#[derive(Default)]
struct EncoderLogInner {
    video_opened: Option<(u32, u32, u32)>,
    settings: Option<EncoderConfig>,
    audio_opened: Option<(u32, u16)>,
    video_pts: Vec<i64>,
    video_frames: Vec<Vec<u8>>,
    audio_pts: Vec<i64>,
    audio_chunk_sizes: Vec<usize>,
    flushed: bool,
}

impl EncoderLog {
    pub fn video_opened(&self) -> Option<(u32, u32, u32)> {
        lock(&self.inner).video_opened
    }

    pub fn settings(&self) -> Option<EncoderConfig> {
        lock(&self.inner).settings.clone()
    }

    pub fn audio_opened(&self) -> Option<(u32, u16)> {
        lock(&self.inner).audio_opened
    }

    /// Every video PTS submitted to the codec, in call order
    pub fn video_pts(&self) -> Vec<i64> {
        lock(&self.inner).video_pts.clone()
    }

    /// Pixel copies of the submitted frames (only when capture enabled)
    pub fn video_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.inner).video_frames.clone()
    }

    pub fn audio_pts(&self) -> Vec<i64> {
        lock(&self.inner).audio_pts.clone()
    }

    pub fn audio_chunk_sizes(&self) -> Vec<usize> {
        lock(&self.inner).audio_chunk_sizes.clone()
    }

    pub fn video_frame_count(&self) -> usize {
        lock(&self.inner).video_pts.len()
    }

    pub fn flushed(&self) -> bool {
        lock(&self.inner).flushed
    }
}

/// Encoder that emits one synthetic packet per submission.
///
/// `queue_latency` packets are retained internally to model a codec
/// that answers "need more input"; `flush` releases the remainder.
pub struct FakeEncoder {
    log: EncoderLog,
    queue_latency: usize,
    held: VecDeque<Packet>,
    fps: u32,
    sample_rate: u32,
    store_frames: bool,
}

impl FakeEncoder {
    pub fn new() -> (Self, EncoderLog) {
        let log = EncoderLog::default();
        (
            Self {
                log: log.clone(),
                queue_latency: 0,
                held: VecDeque::new(),
                fps: 0,
                sample_rate: 0,
                store_frames: false,
            },
            log,
        )
    }

    /// Hold back the most recent `latency` packets until flush
    pub fn with_queue_latency(mut self, latency: usize) -> Self {
        self.queue_latency = latency;
        self
    }

    /// Keep pixel copies of submitted frames for inspection
    pub fn with_frame_capture(mut self) -> Self {
        self.store_frames = true;
        self
    }

    fn release(&mut self) -> Vec<Packet> {
        let mut released = Vec::new();
        while self.held.len() > self.queue_latency {
            if let Some(packet) = self.held.pop_front() {
                released.push(packet);
            }
        }
        released
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn open_video(
        &mut self,
        width: u32,
        height: u32,
        fps: u32,
        settings: &EncoderConfig,
    ) -> Result<(), EncoderError> {
        self.fps = fps;
        let mut log = lock(&self.log.inner);
        log.video_opened = Some((width, height, fps));
        log.settings = Some(settings.clone());
        Ok(())
    }

    async fn open_audio(
        &mut self,
        format: AudioFormat,
        _bitrate_kbps: u32,
    ) -> Result<(), EncoderError> {
        self.sample_rate = format.sample_rate;
        lock(&self.log.inner).audio_opened = Some((format.sample_rate, format.channels));
        Ok(())
    }

    async fn encode_video(&mut self, frame: &Frame, pts: i64) -> Result<Vec<Packet>, EncoderError> {
        if self.fps == 0 {
            return Err(EncoderError::NotOpened { stream: "video" });
        }

        {
            let mut log = lock(&self.log.inner);
            log.video_pts.push(pts);
            if self.store_frames {
                log.video_frames.push(frame.data.clone());
            }
        }

        self.held.push_back(Packet {
            stream: StreamKind::Video,
            data: pts.to_le_bytes().to_vec(),
            pts,
            dts: pts,
            timebase: Timebase::per_frame(self.fps),
        });
        Ok(self.release())
    }

    async fn encode_audio(
        &mut self,
        samples: &[u8],
        pts_sample_index: i64,
    ) -> Result<Vec<Packet>, EncoderError> {
        if self.sample_rate == 0 {
            return Err(EncoderError::NotOpened { stream: "audio" });
        }

        {
            let mut log = lock(&self.log.inner);
            log.audio_pts.push(pts_sample_index);
            log.audio_chunk_sizes.push(samples.len());
        }

        self.held.push_back(Packet {
            stream: StreamKind::Audio,
            data: pts_sample_index.to_le_bytes().to_vec(),
            pts: pts_sample_index,
            dts: pts_sample_index,
            timebase: Timebase::per_sample(self.sample_rate),
        });
        Ok(self.release())
    }

    async fn flush(&mut self) -> Result<Vec<Packet>, EncoderError> {
        lock(&self.log.inner).flushed = true;
        Ok(self.held.drain(..).collect())
    }
}

/// Recorded call history of a [`FakeMuxer`]
#[derive(Clone, Default)]
pub struct MuxerLog {
    inner: Arc<Mutex<MuxerLogInner>>,
}

#[derive(Default)]
struct MuxerLogInner {
    opened: Option<(PathBuf, usize)>,
    header_written: bool,
    packets: Vec<(usize, Packet)>,
    trailer_written: bool,
    closed: bool,
    fail_after_packets: Option<usize>,
}

impl MuxerLog {
    pub fn opened_path(&self) -> Option<PathBuf> {
        lock(&self.inner).opened.as_ref().map(|(p, _)| p.clone())
    }

    pub fn header_written(&self) -> bool {
        lock(&self.inner).header_written
    }

    pub fn trailer_written(&self) -> bool {
        lock(&self.inner).trailer_written
    }

    pub fn closed(&self) -> bool {
        lock(&self.inner).closed
    }

    pub fn packet_count(&self) -> usize {
        lock(&self.inner).packets.len()
    }

    /// PTS of every packet written to the given stream index, in order
    pub fn stream_pts(&self, stream_index: usize) -> Vec<i64> {
        lock(&self.inner)
            .packets
            .iter()
            .filter(|(idx, _)| *idx == stream_index)
            .map(|(_, p)| p.pts)
            .collect()
    }

    /// Fail every `write_packet` call after `count` packets succeeded
    pub fn fail_after_packets(&self, count: usize) {
        lock(&self.inner).fail_after_packets = Some(count);
    }
}

/// Muxer that records packets in memory
pub struct FakeMuxer {
    log: MuxerLog,
}

impl FakeMuxer {
    pub fn new() -> (Self, MuxerLog) {
        let log = MuxerLog::default();
        (Self { log: log.clone() }, log)
    }
}

#[async_trait]
impl Muxer for FakeMuxer {
    async fn open(&mut self, path: &Path, streams: &[StreamDesc]) -> Result<(), MuxerError> {
        lock(&self.log.inner).opened = Some((path.to_path_buf(), streams.len()));
        Ok(())
    }

    async fn write_header(&mut self) -> Result<(), MuxerError> {
        let mut log = lock(&self.log.inner);
        if log.opened.is_none() {
            return Err(MuxerError::NotOpen);
        }
        log.header_written = true;
        Ok(())
    }

    async fn write_packet(
        &mut self,
        packet: Packet,
        stream_index: usize,
    ) -> Result<(), MuxerError> {
        let mut log = lock(&self.log.inner);
        if !log.header_written {
            return Err(MuxerError::NotOpen);
        }
        if let Some(limit) = log.fail_after_packets {
            if log.packets.len() >= limit {
                return Err(MuxerError::Write {
                    details: "simulated disk failure".to_string(),
                });
            }
        }
        log.packets.push((stream_index, packet));
        Ok(())
    }

    async fn write_trailer(&mut self) -> Result<(), MuxerError> {
        let mut log = lock(&self.log.inner);
        if !log.header_written {
            return Err(MuxerError::NotOpen);
        }
        log.trailer_written = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MuxerError> {
        lock(&self.log.inner).closed = true;
        Ok(())
    }
}
