//! Self-paced synthetic capture sources.
//!
//! These stand in for the platform screen/audio primitives: the frame
//! source emits a moving test pattern at the configured rate and the
//! audio source emits a sine tone (or silence). Used by the demo binary
//! and anywhere the pipeline needs to run without capture hardware.

use super::{Acquired, AudioFormat, AudioSource, FrameSource, SampleFormat};
use crate::clock::wall_clock_ms;
use crate::error::SourceError;
use crate::frame::{Frame, BGRA_BYTES_PER_PIXEL};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Frame source producing a scrolling gradient test pattern at a fixed rate
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    fps: u32,
    frame_counter: u64,
    next_due: Option<Instant>,
    initialized: bool,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            frame_counter: 0,
            next_due: None,
            initialized: false,
        }
    }

    fn render_pattern(&self, frame: &mut Frame) {
        let shift = (self.frame_counter * 2) as u32;
        for y in 0..self.height {
            let row = y as usize * frame.stride;
            for x in 0..self.width {
                let off = row + x as usize * BGRA_BYTES_PER_PIXEL;
                frame.data[off] = ((x + shift) % 256) as u8;
                frame.data[off + 1] = ((y + shift / 2) % 256) as u8;
                frame.data[off + 2] = (((x + y) / 2) % 256) as u8;
                frame.data[off + 3] = 255;
            }
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticFrameSource {
    async fn init(&mut self) -> Result<(), SourceError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(SourceError::OddDimensions {
                width: self.width,
                height: self.height,
            });
        }
        debug!(
            "Synthetic frame source ready ({}x{} @ {}fps)",
            self.width, self.height, self.fps
        );
        self.initialized = true;
        Ok(())
    }

    async fn try_acquire(&mut self, timeout: Duration) -> Result<Acquired, SourceError> {
        if !self.initialized {
            return Err(SourceError::NotInitialized);
        }

        let interval = Duration::from_micros(1_000_000 / self.fps as u64);
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);

        if due > now {
            let wait = due - now;
            if wait > timeout {
                tokio::time::sleep(timeout).await;
                return Ok(Acquired::Timeout);
            }
            tokio::time::sleep(wait).await;
        }

        self.next_due = Some(due.max(now) + interval);

        let mut frame = Frame::blank(self.width, self.height, wall_clock_ms());
        self.render_pattern(&mut frame);
        self.frame_counter += 1;
        trace!("Synthetic frame {} generated", self.frame_counter);

        Ok(Acquired::Frame(frame))
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Audio source producing a continuous sine tone, or silence
pub struct SyntheticAudioSource {
    format: AudioFormat,
    tone_hz: Option<f32>,
    phase: f32,
    last_drain: Option<Instant>,
    initialized: bool,
}

impl SyntheticAudioSource {
    /// A 440 Hz stereo tone at the given sample rate
    pub fn tone(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: AudioFormat {
                sample_rate,
                channels,
                sample_format: SampleFormat::F32,
            },
            tone_hz: Some(440.0),
            phase: 0.0,
            last_drain: None,
            initialized: false,
        }
    }

    /// A silent stream with the given parameters
    pub fn silence(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: AudioFormat {
                sample_rate,
                channels,
                sample_format: SampleFormat::F32,
            },
            tone_hz: None,
            phase: 0.0,
            last_drain: None,
            initialized: false,
        }
    }
}

#[async_trait]
impl AudioSource for SyntheticAudioSource {
    async fn init(&mut self) -> Result<(), SourceError> {
        debug!(
            "Synthetic audio source ready ({} Hz, {} ch, {:?})",
            self.format.sample_rate, self.format.channels, self.format.sample_format
        );
        self.initialized = true;
        Ok(())
    }

    fn drain(&mut self) -> Vec<u8> {
        if !self.initialized {
            return Vec::new();
        }

        let now = Instant::now();
        let elapsed = match self.last_drain.replace(now) {
            Some(last) => now - last,
            None => return Vec::new(),
        };

        let samples = (elapsed.as_secs_f64() * self.format.sample_rate as f64) as usize;
        if samples == 0 {
            // Keep the anchor so sub-sample intervals accumulate
            self.last_drain = Some(now - elapsed);
            return Vec::new();
        }

        let mut bytes = Vec::with_capacity(self.format.frame_bytes(samples));
        let step = match self.tone_hz {
            Some(hz) => hz * std::f32::consts::TAU / self.format.sample_rate as f32,
            None => 0.0,
        };

        for _ in 0..samples {
            let value = if self.tone_hz.is_some() {
                self.phase = (self.phase + step) % std::f32::consts::TAU;
                (self.phase.sin() * 0.2).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            for _ in 0..self.format.channels {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        bytes
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_source_rejects_odd_dimensions() {
        let mut source = SyntheticFrameSource::new(641, 480, 30);
        assert!(matches!(
            source.init().await,
            Err(SourceError::OddDimensions { .. })
        ));
    }

    #[tokio::test]
    async fn test_frame_source_requires_init() {
        let mut source = SyntheticFrameSource::new(640, 480, 30);
        let result = source.try_acquire(Duration::from_millis(1)).await;
        assert!(matches!(result, Err(SourceError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_frame_source_produces_valid_frames() {
        let mut source = SyntheticFrameSource::new(64, 48, 120);
        source.init().await.unwrap();

        let acquired = source.try_acquire(Duration::from_millis(100)).await.unwrap();
        match acquired {
            Acquired::Frame(frame) => {
                assert_eq!(frame.width, 64);
                assert_eq!(frame.height, 48);
                assert!(frame.validate_size());
            }
            Acquired::Timeout => panic!("expected a frame"),
        }
    }

    #[tokio::test]
    async fn test_frame_source_paces_output() {
        let mut source = SyntheticFrameSource::new(16, 16, 50);
        source.init().await.unwrap();

        // First frame is immediate; the second is due one interval later,
        // so a tiny timeout yields Timeout
        let first = source.try_acquire(Duration::from_millis(50)).await.unwrap();
        assert!(matches!(first, Acquired::Frame(_)));

        let second = source.try_acquire(Duration::from_millis(1)).await.unwrap();
        assert!(matches!(second, Acquired::Timeout));
    }

    #[tokio::test]
    async fn test_audio_silence_is_zero_filled() {
        let mut source = SyntheticAudioSource::silence(48000, 2);
        source.init().await.unwrap();

        // First drain establishes the anchor
        let _ = source.drain();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let bytes = source.drain();

        assert!(!bytes.is_empty());
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_audio_tone_produces_nonzero_samples() {
        let mut source = SyntheticAudioSource::tone(48000, 2);
        source.init().await.unwrap();

        let _ = source.drain();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let bytes = source.drain();

        assert!(!bytes.is_empty());
        // Interleaved f32 stereo: byte length is a multiple of one sample frame
        assert_eq!(bytes.len() % 8, 0);
        assert!(bytes.iter().any(|&b| b != 0));
    }

    #[tokio::test]
    async fn test_audio_drain_before_init_is_empty() {
        let mut source = SyntheticAudioSource::tone(48000, 2);
        assert!(source.drain().is_empty());
    }
}
