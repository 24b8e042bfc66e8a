//! Container muxer collaborator contract.
//!
//! The muxer owns the output file handle. It is not thread-safe by
//! itself; the engine guarantees single-task access.

use crate::encoder::{Packet, StreamKind, Timebase};
use crate::error::MuxerError;
use async_trait::async_trait;
use std::path::Path;

/// Description of one container stream
#[derive(Debug, Clone, Copy)]
pub struct StreamDesc {
    pub kind: StreamKind,
    pub timebase: Timebase,
}

impl StreamDesc {
    pub fn video(fps: u32) -> Self {
        Self {
            kind: StreamKind::Video,
            timebase: Timebase::per_frame(fps),
        }
    }

    pub fn audio(sample_rate: u32) -> Self {
        Self {
            kind: StreamKind::Audio,
            timebase: Timebase::per_sample(sample_rate),
        }
    }
}

/// Writer of encoded packets into an output container.
///
/// Call order: `open`, `write_header`, any number of `write_packet`
/// calls interleaved by DTS, `write_trailer`, `close`. A container
/// without its trailer is truncated.
#[async_trait]
pub trait Muxer: Send {
    async fn open(&mut self, path: &Path, streams: &[StreamDesc]) -> Result<(), MuxerError>;

    async fn write_header(&mut self) -> Result<(), MuxerError>;

    /// Write one packet, already rescaled to the stream's timebase
    async fn write_packet(&mut self, packet: Packet, stream_index: usize)
        -> Result<(), MuxerError>;

    /// Finalize the container and flush it to disk
    async fn write_trailer(&mut self) -> Result<(), MuxerError>;

    async fn close(&mut self) -> Result<(), MuxerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_descriptors() {
        let video = StreamDesc::video(30);
        assert_eq!(video.kind, StreamKind::Video);
        assert_eq!(video.timebase, Timebase::new(1, 30));

        let audio = StreamDesc::audio(48_000);
        assert_eq!(audio.kind, StreamKind::Audio);
        assert_eq!(audio.timebase, Timebase::new(1, 48_000));
    }
}
