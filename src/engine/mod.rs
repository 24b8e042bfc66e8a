//! The capture pipeline orchestrator.
//!
//! One capture-loop task drives acquisition, forward composition, ring
//! buffer admission, eviction-to-encoder and audio interleaving. The
//! control surface talks to the loop over a command channel, so the
//! loop task is the only caller of the encoder and muxer.

mod control;
mod run;

pub use run::SessionReport;

use crate::annotations::AnnotationStore;
use crate::clock::{wall_clock_ms, RecordingClock};
use crate::config::RecorderConfig;
use crate::encoder::Encoder;
use crate::error::{EngineError, RecorderError, Result};
use crate::events::EventBus;
use crate::muxer::Muxer;
use crate::ring_buffer::{RingBuffer, RingBufferStatsSnapshot};
use crate::sources::{AudioSource, FrameSource};
use run::{Collaborators, Command};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Recorder lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecorderState {
    Idle = 0,
    Recording = 1,
    Paused = 2,
    Stopping = 3,
}

impl RecorderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RecorderState::Recording,
            2 => RecorderState::Paused,
            3 => RecorderState::Stopping,
            _ => RecorderState::Idle,
        }
    }

    /// Whether a session currently exists
    pub fn is_active(&self) -> bool {
        !matches!(self, RecorderState::Idle)
    }
}

pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: RecorderState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> RecorderState {
        RecorderState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: RecorderState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Wall-clock milliseconds provider, injectable for deterministic tests
pub type TimeSource = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Counters exposed by the engine
#[derive(Default)]
pub(crate) struct EngineStats {
    pub frames_captured: AtomicU64,
    pub frames_composited: AtomicU64,
    pub frames_discarded: AtomicU64,
    pub video_frames_encoded: AtomicU64,
    pub audio_frames_encoded: AtomicU64,
    pub packets_written: AtomicU64,
}

/// Snapshot of engine counters
#[derive(Debug, Clone)]
pub struct EngineStatsSnapshot {
    /// Frames acquired from the source
    pub frames_captured: u64,
    /// Frames that received forward composition
    pub frames_composited: u64,
    /// Evicted frames dropped without encoding
    pub frames_discarded: u64,
    pub video_frames_encoded: u64,
    pub audio_frames_encoded: u64,
    pub packets_written: u64,
}

impl EngineStats {
    fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_composited: self.frames_composited.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            video_frames_encoded: self.video_frames_encoded.load(Ordering::Relaxed),
            audio_frames_encoded: self.audio_frames_encoded.load(Ordering::Relaxed),
            packets_written: self.packets_written.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the control surface and the capture loop
pub(crate) struct Shared {
    pub(crate) state: StateCell,
    pub(crate) clock: Mutex<Option<RecordingClock>>,
    pub(crate) last_error: Mutex<Option<Arc<RecorderError>>>,
    pub(crate) has_session: AtomicBool,
    pub(crate) last_duration_ms: AtomicU64,
    pub(crate) stats: EngineStats,
    pub(crate) now: TimeSource,
}

impl Shared {
    fn new(now: TimeSource) -> Self {
        Self {
            state: StateCell::new(RecorderState::Idle),
            clock: Mutex::new(None),
            last_error: Mutex::new(None),
            has_session: AtomicBool::new(false),
            last_duration_ms: AtomicU64::new(0),
            stats: EngineStats::default(),
            now,
        }
    }

    /// Media time of an instant on the capture timeline, if a session
    /// clock exists. Never holds the lock across an await point.
    pub(crate) fn media_time(&self, instant_ms: u64) -> Option<u64> {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|clock| clock.media_time_ms(instant_ms))
    }

    pub(crate) fn record_error(&self, error: RecorderError) {
        warn!("Recording error: {}", error);
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(error));
    }

    pub(crate) fn with_clock<R>(&self, f: impl FnOnce(&mut RecordingClock) -> R) -> Option<R> {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .map(f)
    }

    pub(crate) fn set_clock(&self, clock: Option<RecordingClock>) {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner) = clock;
    }
}

/// The recorder core: owns the ring buffer, the collaborators and the
/// capture-loop task; shares the annotation store with the control
/// thread.
pub struct RecorderEngine {
    config: RecorderConfig,
    annotations: Arc<AnnotationStore>,
    ring: Arc<RingBuffer>,
    events: Arc<EventBus>,
    shared: Arc<Shared>,
    collaborators: Mutex<Option<Collaborators>>,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    loop_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl RecorderEngine {
    /// Create an engine over the given collaborators. The pipeline does
    /// not capture until [`arm`](Self::arm) is called.
    pub fn new(
        config: RecorderConfig,
        frame_source: impl FrameSource + 'static,
        audio_source: impl AudioSource + 'static,
        encoder: impl Encoder + 'static,
        muxer: impl Muxer + 'static,
    ) -> Self {
        let ring = Arc::new(RingBuffer::new(config.video.ring_capacity()));
        Self {
            config,
            annotations: Arc::new(AnnotationStore::new()),
            ring,
            events: Arc::new(EventBus::default()),
            shared: Arc::new(Shared::new(Arc::new(wall_clock_ms))),
            collaborators: Mutex::new(Some(Collaborators {
                frame_source: Box::new(frame_source),
                audio_source: Box::new(audio_source),
                encoder: Box::new(encoder),
                muxer: Box::new(muxer),
            })),
            cmd_tx: Mutex::new(None),
            loop_task: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the wall-clock source. Tests drive this with a manually
    /// advanced counter matched to their scripted capture timestamps.
    pub fn with_time_source(self, now: TimeSource) -> Self {
        let shared = Arc::new(Shared::new(now));
        Self { shared, ..self }
    }

    /// Start the capture loop: frames begin flowing into the pre-roll
    /// ring buffer. Recording itself starts with [`start`](Self::start).
    pub async fn arm(&self) -> Result<()> {
        let collaborators = self
            .lock_collaborators()
            .take()
            .ok_or(EngineError::AlreadyArmed)?;

        let mut collaborators = collaborators;
        collaborators.frame_source.init().await?;

        let (width, height) = collaborators.frame_source.screen_size();
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(crate::error::SourceError::OddDimensions { width, height }.into());
        }

        let audio_available = match collaborators.audio_source.init().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Audio source unavailable, recording a silent track: {}", e);
                false
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.lock_cmd_tx() = Some(cmd_tx);

        let capture_loop = run::CaptureLoop::new(
            self.config.clone(),
            Arc::clone(&self.annotations),
            Arc::clone(&self.ring),
            Arc::clone(&self.events),
            Arc::clone(&self.shared),
            self.cancel.clone(),
            collaborators,
            audio_available,
            width,
            height,
        );

        let handle = tokio::spawn(capture_loop.run(cmd_rx));
        *self.loop_task.lock().await = Some(handle);

        info!("Pipeline armed ({}x{} @ {}fps, pre-roll {}s)",
            width, height, self.config.video.fps, self.config.video.preroll_seconds);
        Ok(())
    }

    /// Tear the capture loop down. An active session is finalized first;
    /// the drain phase is not cancellable.
    pub async fn disarm(&self) -> Result<()> {
        let handle = self.loop_task.lock().await.take();
        match handle {
            Some(handle) => {
                self.cancel.cancel();
                if let Err(e) = handle.await {
                    warn!("Capture loop join failed: {}", e);
                }
                *self.lock_cmd_tx() = None;
                info!("Pipeline disarmed");
                Ok(())
            }
            None => {
                debug!("Disarm requested but pipeline was not armed");
                Ok(())
            }
        }
    }

    /// The shared annotation store, for control-thread writers
    pub fn annotations(&self) -> Arc<AnnotationStore> {
        Arc::clone(&self.annotations)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::events::RecorderEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> RecorderState {
        self.shared.state.get()
    }

    /// The most recent session-fatal error, if any
    pub fn last_error(&self) -> Option<Arc<RecorderError>> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded duration: live media time while a session exists, the
    /// final duration of the last session otherwise.
    pub fn duration_ms(&self) -> u64 {
        let now = (self.shared.now)();
        self.shared
            .media_time(now)
            .unwrap_or_else(|| self.shared.last_duration_ms.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn ring_stats(&self) -> RingBufferStatsSnapshot {
        self.ring.stats()
    }

    pub(crate) fn lock_collaborators(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<Collaborators>> {
        self.collaborators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_cmd_tx(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<Command>>> {
        self.cmd_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
