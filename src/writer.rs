//! Ffmpeg-subprocess implementations of the codec and container
//! collaborators.
//!
//! One `ffmpeg` child receives raw BGRA frames on stdin and produces an
//! H.264 MP4; PCM is spooled to a sidecar file and folded in as AAC by a
//! second pass at finalize time. The child owns both the codec and the
//! container, so no packets surface through the [`Encoder`] contract —
//! an always-empty packet queue is a legal codec state, and the engine's
//! drain discipline is unaffected.
//!
//! Frame input is constant-rate: the engine's pause handling removes
//! gaps from the PTS grid, so feeding frames in order at the nominal fps
//! reproduces the intended timeline.

use crate::config::EncoderConfig;
use crate::encoder::{Encoder, Packet};
use crate::error::{EncoderError, MuxerError};
use crate::frame::Frame;
use crate::muxer::{Muxer, StreamDesc};
use crate::sources::{AudioFormat, SampleFormat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct PipeState {
    settings: EncoderConfig,
    audio_bitrate_kbps: u32,
    video: Option<(u32, u32, u32)>,
    audio: Option<AudioFormat>,
    final_path: Option<PathBuf>,
    video_path: Option<PathBuf>,
    audio_path: Option<PathBuf>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    audio_file: Option<tokio::fs::File>,
    audio_bytes: u64,
}

/// Shared handle behind the [`FfmpegEncoder`]/[`FfmpegMuxer`] pair
pub struct FfmpegSink {
    state: Arc<Mutex<PipeState>>,
}

impl FfmpegSink {
    pub fn new(settings: EncoderConfig, audio_bitrate_kbps: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(PipeState {
                settings,
                audio_bitrate_kbps,
                video: None,
                audio: None,
                final_path: None,
                video_path: None,
                audio_path: None,
                child: None,
                stdin: None,
                audio_file: None,
                audio_bytes: 0,
            })),
        }
    }

    /// Split the sink into its encoder and muxer faces for the engine
    pub fn pair(self) -> (FfmpegEncoder, FfmpegMuxer) {
        let state = self.state;
        (
            FfmpegEncoder {
                state: Arc::clone(&state),
            },
            FfmpegMuxer { state },
        )
    }
}

pub struct FfmpegEncoder {
    state: Arc<Mutex<PipeState>>,
}

pub struct FfmpegMuxer {
    state: Arc<Mutex<PipeState>>,
}

impl PipeState {
    fn spawn_video_pass(&mut self) -> Result<(), MuxerError> {
        let (width, height, fps) = self.video.ok_or(MuxerError::NotOpen)?;
        let video_path = self.video_path.clone().ok_or(MuxerError::NotOpen)?;

        lower_process_priority();

        let mut command = Command::new("ffmpeg");
        command
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-y",
                "-f",
                "rawvideo",
                "-pixel_format",
                "bgra",
                "-video_size",
            ])
            .arg(format!("{}x{}", width, height))
            .arg("-framerate")
            .arg(fps.to_string())
            .args(["-i", "pipe:0", "-c:v", "libx264", "-preset"])
            .arg(&self.settings.preset)
            .arg("-crf")
            .arg(self.settings.crf.to_string())
            .arg("-g")
            .arg(self.settings.gop_size.to_string())
            .arg("-bf")
            .arg(self.settings.max_b_frames.to_string())
            .args(["-pix_fmt", "yuv420p", "-movflags", "+faststart"])
            .arg(&video_path)
            .stdin(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| MuxerError::Open {
            path: video_path.display().to_string(),
            details: format!("Failed to start ffmpeg: {}", e),
        })?;

        self.stdin = child.stdin.take();
        self.child = Some(child);
        info!(
            "ffmpeg video pass started ({}x{} @ {}fps -> {})",
            width,
            height,
            fps,
            video_path.display()
        );
        Ok(())
    }

    async fn wait_video_pass(&mut self) -> Result<(), EncoderError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await.map_err(|e| EncoderError::Flush {
                details: format!("Failed to close ffmpeg stdin: {}", e),
            })?;
        }

        if let Some(child) = self.child.take() {
            let output = child.wait_with_output().await.map_err(|e| {
                EncoderError::Flush {
                    details: format!("ffmpeg did not exit: {}", e),
                }
            })?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(EncoderError::Flush {
                    details: format!("ffmpeg encoding failed: {}", stderr.trim()),
                });
            }
            debug!("ffmpeg video pass finished");
        }
        Ok(())
    }

    /// Second pass: fold the PCM sidecar into the container as AAC, or
    /// rename the video-only file when no audio was captured.
    async fn finalize(&mut self) -> Result<(), MuxerError> {
        let final_path = self.final_path.clone().ok_or(MuxerError::NotOpen)?;
        let video_path = self.video_path.clone().ok_or(MuxerError::NotOpen)?;
        let audio_path = self.audio_path.clone();

        if let Some(file) = self.audio_file.take() {
            drop(file);
        }

        let audio_path = match audio_path {
            Some(path) if self.audio_bytes > 0 => path,
            _ => {
                tokio::fs::rename(&video_path, &final_path)
                    .await
                    .map_err(|e| MuxerError::Trailer {
                        details: format!("Failed to move output into place: {}", e),
                    })?;
                info!("Output finalized (video only): {}", final_path.display());
                return Ok(());
            }
        };
        let format = self.audio.ok_or(MuxerError::NotOpen)?;
        let pcm_format = match format.sample_format {
            SampleFormat::F32 => "f32le",
            SampleFormat::S16 => "s16le",
        };

        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y", "-f", pcm_format])
            .arg("-ar")
            .arg(format.sample_rate.to_string())
            .arg("-ac")
            .arg(format.channels.to_string())
            .arg("-i")
            .arg(&audio_path)
            .arg("-i")
            .arg(&video_path)
            .args(["-map", "1:v:0", "-map", "0:a:0", "-c:v", "copy", "-c:a", "aac", "-b:a"])
            .arg(format!("{}k", self.audio_bitrate_kbps))
            .args(["-movflags", "+faststart", "-shortest"])
            .arg(&final_path)
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| MuxerError::Trailer {
                details: format!("Failed to run ffmpeg mux pass: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MuxerError::Trailer {
                details: format!("ffmpeg mux pass failed: {}", stderr.trim()),
            });
        }

        if let Err(e) = tokio::fs::remove_file(&video_path).await {
            warn!("Could not remove intermediate video file: {}", e);
        }
        if let Err(e) = tokio::fs::remove_file(&audio_path).await {
            warn!("Could not remove PCM sidecar: {}", e);
        }

        info!("Output finalized: {}", final_path.display());
        Ok(())
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn open_video(
        &mut self,
        width: u32,
        height: u32,
        fps: u32,
        settings: &EncoderConfig,
    ) -> Result<(), EncoderError> {
        let mut state = self.state.lock().await;
        state.settings = settings.clone();
        state.video = Some((width, height, fps));
        Ok(())
    }

    async fn open_audio(
        &mut self,
        format: AudioFormat,
        bitrate_kbps: u32,
    ) -> Result<(), EncoderError> {
        let mut state = self.state.lock().await;
        state.audio = Some(format);
        state.audio_bitrate_kbps = bitrate_kbps;
        Ok(())
    }

    async fn encode_video(&mut self, frame: &Frame, _pts: i64) -> Result<Vec<Packet>, EncoderError> {
        let mut state = self.state.lock().await;
        let stdin = state.stdin.as_mut().ok_or(EncoderError::NotOpened {
            stream: "video",
        })?;
        stdin.write_all(&frame.data).await.map_err(|e| {
            EncoderError::Encode {
                details: format!("Failed to write frame to ffmpeg: {}", e),
            }
        })?;
        Ok(Vec::new())
    }

    async fn encode_audio(
        &mut self,
        samples: &[u8],
        _pts_sample_index: i64,
    ) -> Result<Vec<Packet>, EncoderError> {
        let mut state = self.state.lock().await;
        let file = state.audio_file.as_mut().ok_or(EncoderError::NotOpened {
            stream: "audio",
        })?;
        file.write_all(samples).await.map_err(|e| EncoderError::Encode {
            details: format!("Failed to spool PCM: {}", e),
        })?;
        state.audio_bytes += samples.len() as u64;
        Ok(Vec::new())
    }

    async fn flush(&mut self) -> Result<Vec<Packet>, EncoderError> {
        let mut state = self.state.lock().await;
        state.wait_video_pass().await?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn open(&mut self, path: &Path, _streams: &[StreamDesc]) -> Result<(), MuxerError> {
        let mut state = self.state.lock().await;
        state.final_path = Some(path.to_path_buf());
        state.video_path = Some(path.with_extension("video.mp4"));
        state.audio_path = Some(path.with_extension("pcm"));
        state.audio_bytes = 0;
        Ok(())
    }

    async fn write_header(&mut self) -> Result<(), MuxerError> {
        let mut state = self.state.lock().await;
        state.spawn_video_pass()?;

        let audio_path = state.audio_path.clone().ok_or(MuxerError::NotOpen)?;
        let file = tokio::fs::File::create(&audio_path).await.map_err(|e| {
            MuxerError::Header {
                details: format!("Failed to create PCM sidecar: {}", e),
            }
        })?;
        state.audio_file = Some(file);
        Ok(())
    }

    async fn write_packet(&mut self, _packet: Packet, _stream_index: usize) -> Result<(), MuxerError> {
        // The child process muxes internally; nothing surfaces here
        Ok(())
    }

    async fn write_trailer(&mut self) -> Result<(), MuxerError> {
        let mut state = self.state.lock().await;
        state.finalize().await
    }

    async fn close(&mut self) -> Result<(), MuxerError> {
        let mut state = self.state.lock().await;
        state.stdin = None;
        if let Some(mut child) = state.child.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }
}

/// Lower scheduling priority before the spawn; the encode child
/// inherits it.
#[cfg(target_os = "linux")]
fn lower_process_priority() {
    use libc::{setpriority, PRIO_PROCESS};
    let _ = unsafe { setpriority(PRIO_PROCESS as u32, 0, 10) };
}

#[cfg(not(target_os = "linux"))]
fn lower_process_priority() {}
