//! Contracts for the platform capture collaborators.
//!
//! The screen and loopback-audio primitives live outside this crate;
//! the engine only depends on the traits here. [`synthetic`] provides
//! self-contained implementations so the pipeline runs end-to-end
//! without platform capture support.

mod synthetic;

pub use synthetic::{SyntheticAudioSource, SyntheticFrameSource};

use crate::error::SourceError;
use crate::frame::Frame;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a frame acquisition attempt.
///
/// `Timeout` is not an error: the screen did not change within the
/// deadline and the caller simply skips this iteration.
#[derive(Debug)]
pub enum Acquired {
    Frame(Frame),
    Timeout,
}

/// PCM sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 32-bit float
    F32,
    /// 16-bit signed integer
    S16,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::S16 => 2,
        }
    }
}

/// Audio stream parameters, queried once at init
#[derive(Debug, Clone, Copy)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Byte length of `samples` interleaved sample frames
    pub fn frame_bytes(&self, samples: usize) -> usize {
        samples * self.channels as usize * self.sample_format.bytes_per_sample()
    }
}

/// Supplier of raw BGRA desktop frames.
///
/// Returned frames are owned by the caller; the platform resource is
/// released before `try_acquire` returns, so there is no separate
/// release step.
#[async_trait]
pub trait FrameSource: Send {
    /// Initialize the capture device. Must be called before the first
    /// acquisition; failure means the source is unusable.
    async fn init(&mut self) -> Result<(), SourceError>;

    /// Wait up to `timeout` for the next frame. `Acquired::Timeout`
    /// means no new frame was produced; an `Err` is unrecoverable and
    /// the pipeline transitions to its stopping path.
    async fn try_acquire(&mut self, timeout: Duration) -> Result<Acquired, SourceError>;

    /// Capture dimensions. Both values are even.
    fn screen_size(&self) -> (u32, u32);
}

/// Supplier of interleaved PCM sample runs.
#[async_trait]
pub trait AudioSource: Send {
    /// Initialize the loopback device. A failed init degrades the
    /// recording to a silent track rather than aborting it.
    async fn init(&mut self) -> Result<(), SourceError>;

    /// Return all PCM bytes accumulated since the last call, without
    /// blocking. An unavailable source returns an empty vector.
    fn drain(&mut self) -> Vec<u8>;

    /// Stream parameters, constant for the source's lifetime
    fn format(&self) -> AudioFormat;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_sizes() {
        assert_eq!(SampleFormat::F32.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::S16.bytes_per_sample(), 2);
    }

    #[test]
    fn test_audio_format_frame_bytes() {
        let format = AudioFormat {
            sample_rate: 48000,
            channels: 2,
            sample_format: SampleFormat::F32,
        };
        // 1024 stereo float samples
        assert_eq!(format.frame_bytes(1024), 1024 * 2 * 4);

        let mono_s16 = AudioFormat {
            sample_rate: 44100,
            channels: 1,
            sample_format: SampleFormat::S16,
        };
        assert_eq!(mono_s16.frame_bytes(512), 1024);
    }
}
