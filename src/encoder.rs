//! Codec collaborator contract.
//!
//! The engine submits composed frames and PCM runs and receives packets
//! back as the codec's internal queue permits; a submission may yield
//! zero packets and `flush` surfaces whatever remains. Packet timestamps
//! are in the encoder's own timebase and are rescaled by the caller
//! before muxing.

use crate::config::EncoderConfig;
use crate::error::EncoderError;
use crate::frame::Frame;
use crate::sources::AudioFormat;
use async_trait::async_trait;

/// Which container stream a packet belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

/// A rational timebase: each tick is `num / den` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    pub num: i64,
    pub den: i64,
}

impl Timebase {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Timebase of one tick per frame at `fps`
    pub const fn per_frame(fps: u32) -> Self {
        Self::new(1, fps as i64)
    }

    /// Timebase of one tick per audio sample at `sample_rate`
    pub const fn per_sample(sample_rate: u32) -> Self {
        Self::new(1, sample_rate as i64)
    }

    /// Rescale a tick count from this timebase into `target`.
    ///
    /// Exact integer arithmetic in i128 so large timestamps cannot
    /// overflow; truncates toward zero like the usual rescale helpers.
    pub fn rescale(&self, value: i64, target: Timebase) -> i64 {
        let numerator = value as i128 * self.num as i128 * target.den as i128;
        let denominator = self.den as i128 * target.num as i128;
        (numerator / denominator) as i64
    }
}

/// One compressed packet emitted by the encoder
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream: StreamKind,
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub timebase: Timebase,
}

impl Packet {
    /// Copy of this packet with pts/dts rescaled into `target`
    pub fn rescaled(&self, target: Timebase) -> Packet {
        Packet {
            stream: self.stream,
            data: self.data.clone(),
            pts: self.timebase.rescale(self.pts, target),
            dts: self.timebase.rescale(self.dts, target),
            timebase: target,
        }
    }
}

/// Compressing codec pair for one video and one audio stream.
#[async_trait]
pub trait Encoder: Send {
    /// Open the video codec. `settings` carries the low-latency tuning
    /// knobs (GOP length, B-frame cap, CRF, preset).
    async fn open_video(
        &mut self,
        width: u32,
        height: u32,
        fps: u32,
        settings: &EncoderConfig,
    ) -> Result<(), EncoderError>;

    /// Open the audio codec for the given stream parameters
    async fn open_audio(&mut self, format: AudioFormat, bitrate_kbps: u32)
        -> Result<(), EncoderError>;

    /// Submit a composed frame at the given PTS (in frames). Returns any
    /// packets the codec released; zero packets means the queue is
    /// holding input back, not an error.
    async fn encode_video(&mut self, frame: &Frame, pts: i64) -> Result<Vec<Packet>, EncoderError>;

    /// Submit one codec frame of interleaved PCM at the given sample
    /// index. Returns released packets, possibly none.
    async fn encode_audio(
        &mut self,
        samples: &[u8],
        pts_sample_index: i64,
    ) -> Result<Vec<Packet>, EncoderError>;

    /// Signal end of stream and return all remaining queued packets
    async fn flush(&mut self) -> Result<Vec<Packet>, EncoderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_identity() {
        let tb = Timebase::per_frame(30);
        assert_eq!(tb.rescale(149, tb), 149);
    }

    #[test]
    fn test_rescale_frames_to_mp4_ticks() {
        // 30 fps frame index into a 1/90000 MPEG tick clock
        let frames = Timebase::per_frame(30);
        let ticks = Timebase::new(1, 90_000);
        assert_eq!(frames.rescale(1, ticks), 3_000);
        assert_eq!(frames.rescale(30, ticks), 90_000);
    }

    #[test]
    fn test_rescale_samples_to_milliseconds() {
        let samples = Timebase::per_sample(48_000);
        let millis = Timebase::new(1, 1_000);
        assert_eq!(samples.rescale(48_000, millis), 1_000);
        assert_eq!(samples.rescale(1_024, millis), 21);
    }

    #[test]
    fn test_rescale_large_values_do_not_overflow() {
        let tb = Timebase::new(1, 1_000_000_000);
        let target = Timebase::new(1, 1_000);
        let one_year_ns: i64 = 31_536_000_000_000_000;
        assert_eq!(tb.rescale(one_year_ns, target), 31_536_000_000);
    }

    #[test]
    fn test_packet_rescaled() {
        let packet = Packet {
            stream: StreamKind::Video,
            data: vec![1, 2, 3],
            pts: 60,
            dts: 59,
            timebase: Timebase::per_frame(30),
        };

        let rescaled = packet.rescaled(Timebase::new(1, 15_360));
        assert_eq!(rescaled.pts, 30_720);
        assert_eq!(rescaled.dts, 30_208);
        assert_eq!(rescaled.data, packet.data);
    }
}
