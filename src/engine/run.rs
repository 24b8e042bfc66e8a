use super::{RecorderState, Shared};
use crate::annotations::AnnotationStore;
use crate::clock::RecordingClock;
use crate::compositor;
use crate::config::RecorderConfig;
use crate::encoder::{Encoder, Packet, StreamKind, Timebase};
use crate::error::{EngineError, RecorderError, Result};
use crate::events::{EventBus, RecorderEvent};
use crate::frame::{Frame, FrameStamp};
use crate::metadata::{save_metadata, SessionMetadata};
use crate::muxer::{Muxer, StreamDesc};
use crate::ring_buffer::RingBuffer;
use crate::sources::{Acquired, AudioFormat, AudioSource, FrameSource};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// The boxed collaborator set moved into the capture loop at arm time
pub(crate) struct Collaborators {
    pub frame_source: Box<dyn FrameSource>,
    pub audio_source: Box<dyn AudioSource>,
    pub encoder: Box<dyn Encoder>,
    pub muxer: Box<dyn Muxer>,
}

/// Control requests serviced by the capture loop between iterations
pub(crate) enum Command {
    Start {
        reply: oneshot::Sender<Result<PathBuf>>,
    },
    Stop {
        reply: oneshot::Sender<Result<SessionReport>>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
}

/// Summary of a finished recording session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub path: PathBuf,
    pub duration_ms: u64,
    pub video_frames: u64,
    pub audio_frames: u64,
    /// Frames that entered the session from the pre-roll buffer
    pub preroll_frames: u64,
    /// Whether the container was finalized without errors
    pub clean: bool,
}

/// Per-session bookkeeping
struct Session {
    path: PathBuf,
    started_at: DateTime<Utc>,
    audio_format: AudioFormat,
    audio_frame_samples: usize,
    audio_pending: Vec<u8>,
    audio_sample_pts: i64,
    last_video_pts: Option<i64>,
    video_frames: u64,
    audio_frames: u64,
    preroll_frames: u64,
    video_timebase: Timebase,
    audio_timebase: Timebase,
}

const VIDEO_STREAM: usize = 0;
const AUDIO_STREAM: usize = 1;

/// Encoder and muxer behind one seam so the encode path can borrow them
/// independently of the rest of the loop state.
struct OutputWriter {
    encoder: Box<dyn Encoder>,
    muxer: Box<dyn Muxer>,
    fps: u32,
}

impl OutputWriter {
    /// Rescale and write a batch of packets, DTS order per stream
    async fn write_packets(
        &mut self,
        session: &Session,
        shared: &Shared,
        packets: Vec<Packet>,
    ) -> Result<()> {
        for packet in packets {
            let (stream_index, timebase) = match packet.stream {
                StreamKind::Video => (VIDEO_STREAM, session.video_timebase),
                StreamKind::Audio => (AUDIO_STREAM, session.audio_timebase),
            };
            self.muxer
                .write_packet(packet.rescaled(timebase), stream_index)
                .await?;
            shared.stats.packets_written.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Encode one frame that left the ring buffer. Paused-stamped frames
    /// are dropped here and never reach the codec.
    async fn encode_frame(
        &mut self,
        session: &mut Session,
        shared: &Shared,
        frame: Frame,
    ) -> Result<()> {
        let pts_ms = match frame.stamp {
            FrameStamp::Paused => {
                shared.stats.frames_discarded.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            FrameStamp::Media(ms) => ms,
            FrameStamp::Preroll => {
                session.preroll_frames += 1;
                shared.media_time(frame.capture_ms).unwrap_or(0)
            }
        };

        // Frame-number PTS, rounded to the fps grid. Strict monotonicity
        // is an output invariant, so collisions bump to the next slot.
        let mut pts = (pts_ms as i64 * self.fps as i64 + 500) / 1000;
        if let Some(last) = session.last_video_pts {
            if pts <= last {
                trace!("PTS collision at {}, bumping to {}", pts, last + 1);
                pts = last + 1;
            }
        }
        session.last_video_pts = Some(pts);

        let packets = self.encoder.encode_video(&frame, pts).await?;
        session.video_frames += 1;
        shared
            .stats
            .video_frames_encoded
            .fetch_add(1, Ordering::Relaxed);

        self.write_packets(session, shared, packets).await
    }

    /// Encode one codec frame of PCM at the session's running sample index
    async fn encode_audio_chunk(
        &mut self,
        session: &mut Session,
        shared: &Shared,
        chunk: &[u8],
    ) -> Result<()> {
        let pts = session.audio_sample_pts;
        let packets = self.encoder.encode_audio(chunk, pts).await?;
        session.audio_sample_pts += session.audio_frame_samples as i64;
        session.audio_frames += 1;
        shared
            .stats
            .audio_frames_encoded
            .fetch_add(1, Ordering::Relaxed);

        self.write_packets(session, shared, packets).await
    }
}

/// The capture-loop task state
pub(crate) struct CaptureLoop {
    config: RecorderConfig,
    annotations: Arc<AnnotationStore>,
    ring: Arc<RingBuffer>,
    events: Arc<EventBus>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    frame_source: Box<dyn FrameSource>,
    audio_source: Box<dyn AudioSource>,
    writer: OutputWriter,
    audio_available: bool,
    width: u32,
    height: u32,
    session: Option<Session>,
}

impl CaptureLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: RecorderConfig,
        annotations: Arc<AnnotationStore>,
        ring: Arc<RingBuffer>,
        events: Arc<EventBus>,
        shared: Arc<Shared>,
        cancel: CancellationToken,
        collaborators: Collaborators,
        audio_available: bool,
        width: u32,
        height: u32,
    ) -> Self {
        let fps = config.video.fps;
        Self {
            config,
            annotations,
            ring,
            events,
            shared,
            cancel,
            frame_source: collaborators.frame_source,
            audio_source: collaborators.audio_source,
            writer: OutputWriter {
                encoder: collaborators.encoder,
                muxer: collaborators.muxer,
                fps,
            },
            audio_available,
            width,
            height,
            session: None,
        }
    }

    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let timeout = Duration::from_millis(self.config.video.capture_timeout_ms.max(1));
        debug!("Capture loop started");

        loop {
            while let Ok(command) = cmd_rx.try_recv() {
                self.handle_command(command).await;
            }

            if self.cancel.is_cancelled() {
                break;
            }

            match self.frame_source.try_acquire(timeout).await {
                Ok(Acquired::Timeout) => continue,
                Ok(Acquired::Frame(frame)) => {
                    if let Err(e) = self.admit_frame(frame).await {
                        self.abandon_session(e).await;
                    }
                }
                Err(source_error) => {
                    self.events.publish(RecorderEvent::SourceLost {
                        details: source_error.to_string(),
                    });
                    self.shared.record_error(source_error.into());
                    if self.session.is_some() {
                        self.shared.state.set(RecorderState::Stopping);
                        let _ = self.finish_session(true).await;
                    }
                    self.shared.state.set(RecorderState::Idle);
                    break;
                }
            }
        }

        // A session still open here means the loop was cancelled; the
        // drain phase runs to completion regardless.
        if self.session.is_some() {
            self.shared.state.set(RecorderState::Stopping);
            let _ = self.finish_session(true).await;
            self.shared.state.set(RecorderState::Idle);
        }

        // Answer any stragglers so control callers do not hang
        while let Ok(command) = cmd_rx.try_recv() {
            match command {
                Command::Start { reply } => {
                    let _ = reply.send(Err(EngineError::LoopExited.into()));
                }
                Command::Stop { reply } => {
                    let _ = reply.send(Err(EngineError::LoopExited.into()));
                }
                Command::Pause { reply } | Command::Resume { reply } => {
                    let _ = reply.send(());
                }
            }
        }

        debug!("Capture loop exited");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                let _ = reply.send(self.handle_start().await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.handle_stop().await);
            }
            Command::Pause { reply } => {
                self.handle_pause();
                let _ = reply.send(());
            }
            Command::Resume { reply } => {
                self.handle_resume();
                let _ = reply.send(());
            }
        }
    }

    async fn handle_start(&mut self) -> Result<PathBuf> {
        if self.session.is_some() {
            return Err(EngineError::AlreadyRecording.into());
        }

        let now = (self.shared.now)();
        let path = self.resolve_output_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }

        let audio_format = self.audio_source.format();
        let fps = self.config.video.fps;

        self.writer
            .encoder
            .open_video(self.width, self.height, fps, &self.config.encoder)
            .await?;
        self.writer
            .encoder
            .open_audio(audio_format, self.config.audio.bitrate_kbps)
            .await?;

        let streams = [
            StreamDesc::video(fps),
            StreamDesc::audio(audio_format.sample_rate),
        ];
        self.writer.muxer.open(&path, &streams).await?;
        self.writer.muxer.write_header().await?;

        // Pre-roll anchoring: the session clock starts at the oldest
        // buffered frame so the first encoded frame maps to PTS 0.
        let mut clock = RecordingClock::start(now, self.config.video.preroll_seconds as u64 * 1000);
        let oldest = self.ring.oldest_capture_ms().await;
        clock.anchor_to(oldest.unwrap_or(now));
        self.shared.set_clock(Some(clock));

        self.session = Some(Session {
            path: path.clone(),
            started_at: Utc::now(),
            audio_format,
            audio_frame_samples: self.config.audio.frame_size as usize,
            audio_pending: Vec::new(),
            audio_sample_pts: 0,
            last_video_pts: None,
            video_frames: 0,
            audio_frames: 0,
            preroll_frames: 0,
            video_timebase: Timebase::per_frame(fps),
            audio_timebase: Timebase::per_sample(audio_format.sample_rate),
        });

        self.shared.has_session.store(true, Ordering::Release);
        self.shared.state.set(RecorderState::Recording);
        self.events.publish(RecorderEvent::SessionStarted { path: path.clone() });
        Ok(path)
    }

    async fn handle_stop(&mut self) -> Result<SessionReport> {
        if self.session.is_none() {
            return Err(EngineError::NotRecording.into());
        }

        self.shared.state.set(RecorderState::Stopping);
        let result = self.finish_session(false).await;
        self.shared.state.set(RecorderState::Idle);
        result
    }

    fn handle_pause(&mut self) {
        if self.shared.state.get() != RecorderState::Recording {
            debug!("Pause ignored outside Recording");
            return;
        }
        let now = (self.shared.now)();
        self.shared.with_clock(|clock| clock.pause(now));
        self.shared.state.set(RecorderState::Paused);
        self.events.publish(RecorderEvent::Paused);
    }

    fn handle_resume(&mut self) {
        if self.shared.state.get() != RecorderState::Paused {
            debug!("Resume ignored outside Paused");
            return;
        }
        let now = (self.shared.now)();
        self.shared.with_clock(|clock| clock.resume(now));
        self.shared.state.set(RecorderState::Recording);
        self.events.publish(RecorderEvent::Resumed);
    }

    /// One captured frame: forward compose, stamp, admit, and feed the
    /// eviction (if any) to the encoder.
    async fn admit_frame(&mut self, mut frame: Frame) -> Result<()> {
        self.shared
            .stats
            .frames_captured
            .fetch_add(1, Ordering::Relaxed);

        let snapshot = self.annotations.snapshot();
        if !snapshot.is_empty() {
            let (stride, width, height) = (frame.stride, frame.width, frame.height);
            compositor::apply(&mut frame.data, stride, width, height, &snapshot);
            self.shared
                .stats
                .frames_composited
                .fetch_add(1, Ordering::Relaxed);
        }

        let state = self.shared.state.get();
        frame.stamp = match state {
            RecorderState::Recording => self
                .shared
                .media_time(frame.capture_ms)
                .map(FrameStamp::Media)
                .unwrap_or(FrameStamp::Preroll),
            RecorderState::Paused => FrameStamp::Paused,
            _ => FrameStamp::Preroll,
        };

        let evicted = self.ring.push(frame).await;

        if let Some(evicted) = evicted {
            // An evicted frame is encoded when a session exists and the
            // frame belongs to it (pre-roll or recorded); pause-captured
            // frames and idle evictions are discarded.
            match self.session.as_mut() {
                Some(session) if evicted.stamp.encodable() => {
                    self.writer
                        .encode_frame(session, &self.shared, evicted)
                        .await?;
                }
                _ => {
                    self.shared
                        .stats
                        .frames_discarded
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if state == RecorderState::Recording {
            self.drain_audio().await?;
        }

        Ok(())
    }

    /// Pull accumulated PCM and submit complete codec frames. When the
    /// source yields nothing and no full frame is pending, a zero-filled
    /// frame keeps the audio track continuous.
    async fn drain_audio(&mut self) -> Result<()> {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Ok(()),
        };

        let bytes = if self.audio_available {
            self.audio_source.drain()
        } else {
            Vec::new()
        };
        let frame_bytes = session.audio_format.frame_bytes(session.audio_frame_samples);

        session.audio_pending.extend_from_slice(&bytes);

        let mut emitted = false;
        while session.audio_pending.len() >= frame_bytes {
            let chunk: Vec<u8> = session.audio_pending.drain(..frame_bytes).collect();
            self.writer
                .encode_audio_chunk(session, &self.shared, &chunk)
                .await?;
            emitted = true;
        }

        if bytes.is_empty() && !emitted {
            let silent = vec![0u8; frame_bytes];
            self.writer
                .encode_audio_chunk(session, &self.shared, &silent)
                .await?;
        }

        Ok(())
    }

    /// A mid-session encoder or muxer failure: the session is finalized
    /// best-effort and the pipeline returns to armed-idle capture.
    async fn abandon_session(&mut self, error: RecorderError) {
        if self.session.is_none() {
            self.shared.record_error(error);
            return;
        }

        error!("Session abandoned: {}", error);
        self.events.publish(RecorderEvent::OutputFailed {
            details: error.to_string(),
        });
        self.shared.record_error(error);
        self.shared.state.set(RecorderState::Stopping);
        let _ = self.finish_session(true).await;
        self.shared.state.set(RecorderState::Idle);
    }

    /// Drain the buffer tail, flush the codec, finalize the container.
    /// With `best_effort` set, individual step failures are logged and
    /// the remaining steps still run so the trailer gets its chance.
    async fn finish_session(&mut self, best_effort: bool) -> Result<SessionReport> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => return Err(EngineError::NotRecording.into()),
        };

        let mut first_error: Option<RecorderError> = None;
        fn record(error: RecorderError, first_error: &mut Option<RecorderError>) {
            warn!("Finalization step failed: {}", error);
            if first_error.is_none() {
                *first_error = Some(error);
            }
        }

        // Buffer tail, front to back
        let tail = self.ring.drain().await;
        info!("Draining {} buffered frames into the encoder", tail.len());
        for frame in tail {
            if let Err(e) = self
                .writer
                .encode_frame(&mut session, &self.shared, frame)
                .await
            {
                record(e, &mut first_error);
                if !best_effort {
                    break;
                }
            }
        }

        // Pad the partial audio frame so the track length is stable
        if !session.audio_pending.is_empty() {
            let frame_bytes = session.audio_format.frame_bytes(session.audio_frame_samples);
            let mut chunk = std::mem::take(&mut session.audio_pending);
            chunk.resize(frame_bytes, 0);
            if let Err(e) = self
                .writer
                .encode_audio_chunk(&mut session, &self.shared, &chunk)
                .await
            {
                record(e, &mut first_error);
            }
        }

        // Codec-internal queues
        match self.writer.encoder.flush().await {
            Ok(packets) => {
                if let Err(e) = self
                    .writer
                    .write_packets(&session, &self.shared, packets)
                    .await
                {
                    record(e, &mut first_error);
                }
            }
            Err(e) => record(e.into(), &mut first_error),
        }

        if let Err(e) = self.writer.muxer.write_trailer().await {
            record(e.into(), &mut first_error);
        }
        if let Err(e) = self.writer.muxer.close().await {
            record(e.into(), &mut first_error);
        }

        let now = (self.shared.now)();
        let duration_ms = self.shared.media_time(now).unwrap_or(0);
        self.shared
            .last_duration_ms
            .store(duration_ms, Ordering::Relaxed);
        self.shared.set_clock(None);

        let clean = first_error.is_none();
        let report = SessionReport {
            path: session.path.clone(),
            duration_ms,
            video_frames: session.video_frames,
            audio_frames: session.audio_frames,
            preroll_frames: session.preroll_frames,
            clean,
        };

        if clean && self.config.output.write_metadata {
            let metadata = SessionMetadata {
                output: session.path.clone(),
                started_at: session.started_at,
                duration_ms,
                width: self.width,
                height: self.height,
                fps: self.config.video.fps,
                video_frames: session.video_frames,
                audio_frames: session.audio_frames,
                preroll_frames: session.preroll_frames,
                encoder: self.config.encoder.clone(),
            };
            if let Err(e) = save_metadata(&metadata).await {
                warn!("Metadata sidecar not written: {}", e);
            }
        }

        self.events.publish(RecorderEvent::SessionFinished {
            path: session.path,
            duration_ms,
            video_frames: session.video_frames,
        });

        match first_error {
            Some(error) => {
                let details = error.to_string();
                self.shared.record_error(error);
                if best_effort {
                    Ok(report)
                } else {
                    Err(RecorderError::component(
                        "engine",
                        &format!("session finalization failed: {}", details),
                    ))
                }
            }
            None => Ok(report),
        }
    }

    fn resolve_output_path(&self) -> PathBuf {
        let name = self
            .config
            .output
            .filename
            .clone()
            .unwrap_or_else(|| {
                chrono::Local::now()
                    .format("Rec_%Y%m%d_%H%M%S.mp4")
                    .to_string()
            });
        PathBuf::from(&self.config.output.directory).join(name)
    }
}
