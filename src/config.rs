use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RecorderConfig {
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VideoConfig {
    /// Capture frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Pre-roll window retained in the ring buffer, in seconds
    #[serde(default = "default_preroll_seconds")]
    pub preroll_seconds: u32,

    /// Frame acquisition timeout in milliseconds
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// Capture resolution used by the synthetic source (width, height).
    /// Platform sources report their own screen size instead.
    #[serde(default = "default_capture_resolution")]
    pub resolution: (u32, u32),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Channel count
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Audio bitrate in kbit/s
    #[serde(default = "default_audio_bitrate_kbps")]
    pub bitrate_kbps: u32,

    /// Samples per audio codec frame (1024 for AAC)
    #[serde(default = "default_audio_frame_size")]
    pub frame_size: u32,
}

/// Codec tuning knobs. Defaults favor low latency over compression.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EncoderConfig {
    /// Keyframe interval in frames
    #[serde(default = "default_gop_size")]
    pub gop_size: u32,

    /// Maximum consecutive B-frames
    #[serde(default = "default_max_b_frames")]
    pub max_b_frames: u32,

    /// Constant rate factor (0-51, lower is higher quality)
    #[serde(default = "default_crf")]
    pub crf: u32,

    /// Encoder speed preset
    #[serde(default = "default_preset")]
    pub preset: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    /// Directory the output container is written to
    #[serde(default = "default_output_directory")]
    pub directory: String,

    /// Fixed output filename. When unset, a `Rec_YYYYMMDD_HHMMSS.mp4`
    /// name is generated at session start.
    pub filename: Option<String>,

    /// Write a JSON metadata sidecar next to the container on stop
    #[serde(default = "default_write_metadata")]
    pub write_metadata: bool,
}

impl RecorderConfig {
    /// Load configuration from the default file location with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("retrorec.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// The file is optional; missing files fall back to built-in defaults.
    /// Environment variables prefixed with `RETROREC_` override file values.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from {}", path_str);

        let settings = Config::builder()
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("RETROREC").separator("_"))
            .build()?;

        let config: RecorderConfig = settings.try_deserialize()?;
        info!("Configuration loaded (fps: {}, preroll: {}s)", config.video.fps, config.video.preroll_seconds);
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video.fps == 0 || self.video.fps > 240 {
            return Err(ConfigError::Message(format!(
                "video.fps must be between 1 and 240, got {}",
                self.video.fps
            )));
        }

        if self.video.preroll_seconds == 0 {
            return Err(ConfigError::Message(
                "video.preroll_seconds must be at least 1".to_string(),
            ));
        }

        let (width, height) = self.video.resolution;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(ConfigError::Message(format!(
                "video.resolution must be non-zero and even, got {}x{}",
                width, height
            )));
        }

        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Message(
                "audio.sample_rate must be non-zero".to_string(),
            ));
        }

        if self.audio.channels == 0 || self.audio.channels > 2 {
            return Err(ConfigError::Message(format!(
                "audio.channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }

        if self.audio.frame_size == 0 {
            return Err(ConfigError::Message(
                "audio.frame_size must be non-zero".to_string(),
            ));
        }

        if self.encoder.crf > 51 {
            return Err(ConfigError::Message(format!(
                "encoder.crf must be at most 51, got {}",
                self.encoder.crf
            )));
        }

        Ok(())
    }
}

impl VideoConfig {
    /// Ring buffer capacity: enough slots for the configured pre-roll window
    pub fn ring_capacity(&self) -> usize {
        (self.fps as usize) * (self.preroll_seconds as usize)
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            preroll_seconds: default_preroll_seconds(),
            capture_timeout_ms: default_capture_timeout_ms(),
            resolution: default_capture_resolution(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            bitrate_kbps: default_audio_bitrate_kbps(),
            frame_size: default_audio_frame_size(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            filename: None,
            write_metadata: default_write_metadata(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            gop_size: default_gop_size(),
            max_b_frames: default_max_b_frames(),
            crf: default_crf(),
            preset: default_preset(),
        }
    }
}

fn default_fps() -> u32 {
    30
}

fn default_preroll_seconds() -> u32 {
    3
}

fn default_capture_timeout_ms() -> u64 {
    10
}

fn default_capture_resolution() -> (u32, u32) {
    (1280, 720)
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_channels() -> u16 {
    2
}

fn default_audio_bitrate_kbps() -> u32 {
    128
}

fn default_audio_frame_size() -> u32 {
    1024
}

fn default_gop_size() -> u32 {
    10
}

fn default_max_b_frames() -> u32 {
    0
}

fn default_crf() -> u32 {
    23
}

fn default_preset() -> String {
    "ultrafast".to_string()
}

fn default_output_directory() -> String {
    ".".to_string()
}

fn default_write_metadata() -> bool {
    true
}
