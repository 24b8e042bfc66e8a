use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Notifications emitted by the pipeline engine.
///
/// The control surface is synchronous request/response; events exist so
/// observers (the CLI status line, tests) can follow lifecycle changes
/// without polling.
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// A recording session opened its output container
    SessionStarted { path: PathBuf },
    /// A session finished and the container was finalized
    SessionFinished {
        path: PathBuf,
        duration_ms: u64,
        video_frames: u64,
    },
    /// Recording paused
    Paused,
    /// Recording resumed
    Resumed,
    /// A retroactive mask pass rewrote the buffered frames
    RetroactiveMaskApplied { frames: usize },
    /// The frame source failed unrecoverably
    SourceLost { details: String },
    /// Packet writing failed and the session was abandoned mid-flight
    OutputFailed { details: String },
}

impl RecorderEvent {
    /// Get the event type as a string for filtering and logs
    pub fn event_type(&self) -> &'static str {
        match self {
            RecorderEvent::SessionStarted { .. } => "session_started",
            RecorderEvent::SessionFinished { .. } => "session_finished",
            RecorderEvent::Paused => "paused",
            RecorderEvent::Resumed => "resumed",
            RecorderEvent::RetroactiveMaskApplied { .. } => "retroactive_mask_applied",
            RecorderEvent::SourceLost { .. } => "source_lost",
            RecorderEvent::OutputFailed { .. } => "output_failed",
        }
    }
}

/// Broadcast bus for recorder events
pub struct EventBus {
    sender: broadcast::Sender<RecorderEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers. Events without subscribers
    /// are dropped silently; publishing is never an error for the
    /// pipeline itself.
    pub fn publish(&self, event: RecorderEvent) {
        match &event {
            RecorderEvent::SessionStarted { path } => {
                info!("Recording started: {}", path.display());
            }
            RecorderEvent::SessionFinished {
                path, duration_ms, ..
            } => {
                info!(
                    "Recording finished: {} ({} ms)",
                    path.display(),
                    duration_ms
                );
            }
            RecorderEvent::SourceLost { details } => {
                error!("Capture source lost: {}", details);
            }
            RecorderEvent::OutputFailed { details } => {
                error!("Output failed: {}", details);
            }
            RecorderEvent::RetroactiveMaskApplied { frames } => {
                info!("Retroactive mask applied to {} buffered frames", frames);
            }
            _ => debug!("Event: {}", event.event_type()),
        }

        // A send error just means there are no subscribers
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Drain a receiver of everything currently queued, discarding lag gaps
pub fn drain_pending(
    receiver: &mut broadcast::Receiver<RecorderEvent>,
) -> Vec<RecorderEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!("Event receiver lagged by {} events", n);
            }
            Err(_) => break,
        }
    }
    events
}
