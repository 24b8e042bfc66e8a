//! The control surface: methods invoked from the UI/control thread.
//!
//! Lifecycle requests travel over the command channel and are serviced
//! by the capture loop between iterations, so the loop task stays the
//! sole owner of the encoder and muxer. Annotation edits and the
//! retroactive mask act directly on the shared store and ring buffer.

use super::run::{Command, SessionReport};
use super::RecorderEngine;
use crate::annotations::{MaskZone, Stroke, ToolMode};
use crate::compositor;
use crate::error::{EngineError, Result};
use crate::events::RecorderEvent;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

impl RecorderEngine {
    fn command_sender(&self) -> Result<mpsc::UnboundedSender<Command>> {
        self.lock_cmd_tx()
            .clone()
            .ok_or_else(|| EngineError::NotArmed.into())
    }

    /// Begin a recording session: open codecs and container, anchor the
    /// session clock to the buffered pre-roll, transition to Recording.
    /// Returns the output path.
    pub async fn start(&self) -> Result<PathBuf> {
        let (reply, response) = oneshot::channel();
        self.command_sender()?
            .send(Command::Start { reply })
            .map_err(|_| EngineError::LoopExited)?;
        response.await.map_err(|_| EngineError::LoopExited)?
    }

    /// End the session: drain the buffer tail, flush the codec, finalize
    /// the container. Blocks until the output file is complete.
    pub async fn stop(&self) -> Result<SessionReport> {
        let (reply, response) = oneshot::channel();
        self.command_sender()?
            .send(Command::Stop { reply })
            .map_err(|_| EngineError::LoopExited)?;
        response.await.map_err(|_| EngineError::LoopExited)?
    }

    /// Freeze the recording clock and stop emitting frames/audio.
    /// No-op outside Recording.
    pub async fn pause(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.command_sender()?
            .send(Command::Pause { reply })
            .map_err(|_| EngineError::LoopExited)?;
        response.await.map_err(|_| EngineError::LoopExited)?;
        Ok(())
    }

    /// Resume a paused recording. No-op outside Paused.
    pub async fn resume(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.command_sender()?
            .send(Command::Resume { reply })
            .map_err(|_| EngineError::LoopExited)?;
        response.await.map_err(|_| EngineError::LoopExited)?;
        Ok(())
    }

    pub fn set_mode(&self, mode: ToolMode) {
        self.annotations.set_mode(mode);
    }

    pub fn tool_mode(&self) -> ToolMode {
        self.annotations.mode()
    }

    fn require_session_history(&self) -> Result<()> {
        if self.shared.has_session.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::NoSessionYet.into())
        }
    }

    /// Add a pen point at the given screen coordinates
    pub fn add_stroke(&self, x: i32, y: i32) -> Result<()> {
        self.require_session_history()?;
        self.annotations.add_stroke(Stroke::new(x, y));
        Ok(())
    }

    /// Add a mosaic mask zone with the default block size
    pub fn add_mosaic_zone(&self, x: i32, y: i32, w: i32, h: i32) -> Result<()> {
        self.require_session_history()?;
        self.annotations.add_zone(MaskZone::mosaic(x, y, w, h));
        Ok(())
    }

    /// Add a mask zone with an explicit style (mosaic block size or blur)
    pub fn add_mask_zone(&self, zone: MaskZone) -> Result<()> {
        self.require_session_history()?;
        self.annotations.add_zone(zone);
        Ok(())
    }

    /// Toggle whether the zone at `index` participates in retroactive
    /// passes. Returns the new flag, or None for an unknown index.
    pub fn toggle_zone_retroactive(&self, index: usize) -> Option<bool> {
        self.annotations.toggle_zone_retroactive(index)
    }

    /// Drop all accumulated strokes and zones
    pub fn clear_effects(&self) {
        self.annotations.clear();
    }

    /// Apply the current retroactive mask zones to every frame resident
    /// in the ring buffer. Strokes stay forward-only. Blocks admission
    /// and drain for the duration of the pass; the affected set is
    /// exactly the frames buffered when the buffer lock was acquired.
    /// Returns the number of frames rewritten.
    pub async fn apply_retroactive_mosaic(&self) -> usize {
        let masks = self.annotations.snapshot().retroactive_masks();
        if masks.zones.is_empty() {
            debug!("Retroactive mask requested with no active zones");
            return 0;
        }

        let frames = self
            .ring
            .for_each_mut(|frame| {
                let (stride, width, height) = (frame.stride, frame.width, frame.height);
                compositor::apply(&mut frame.data, stride, width, height, &masks);
            })
            .await;

        self.events
            .publish(RecorderEvent::RetroactiveMaskApplied { frames });
        frames
    }
}
