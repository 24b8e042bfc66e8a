use thiserror::Error;

/// Main error type for the recorder
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Capture source error: {0}")]
    Source(#[from] SourceError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Muxer error: {0}")]
    Muxer(#[from] MuxerError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl RecorderError {
    /// Create a system error with a message
    pub fn system(message: &str) -> Self {
        RecorderError::System {
            message: message.to_string(),
        }
    }

    /// Create a component error with component name and message
    pub fn component(component: &str, message: &str) -> Self {
        RecorderError::Component {
            component: component.to_string(),
            message: message.to_string(),
        }
    }
}

/// Capture source error types (video and audio)
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Capture source is not initialized")]
    NotInitialized,

    #[error("Unrecoverable capture failure: {details}")]
    Fatal { details: String },

    #[error("Audio source unavailable: {details}")]
    AudioUnavailable { details: String },

    #[error("Screen dimensions {width}x{height} must both be even")]
    OddDimensions { width: u32, height: u32 },
}

impl SourceError {
    pub fn fatal(details: &str) -> Self {
        SourceError::Fatal {
            details: details.to_string(),
        }
    }
}

/// Video/audio encoder error types
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Failed to open video codec: {details}")]
    VideoOpen { details: String },

    #[error("Failed to open audio codec: {details}")]
    AudioOpen { details: String },

    #[error("Encode failed: {details}")]
    Encode { details: String },

    #[error("Codec flush failed: {details}")]
    Flush { details: String },

    #[error("Codec not opened for {stream} stream")]
    NotOpened { stream: &'static str },
}

/// Container muxer error types
#[derive(Error, Debug)]
pub enum MuxerError {
    #[error("Failed to open output {path}: {details}")]
    Open { path: String, details: String },

    #[error("Header write failed: {details}")]
    Header { details: String },

    #[error("Packet write failed: {details}")]
    Write { details: String },

    #[error("Trailer write failed: {details}")]
    Trailer { details: String },

    #[error("Muxer is not open")]
    NotOpen,
}

/// Pipeline engine lifecycle and misuse error types
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Pipeline is not armed")]
    NotArmed,

    #[error("Pipeline is already armed")]
    AlreadyArmed,

    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Annotation received before the first recording session")]
    NoSessionYet,

    #[error("Engine is stopping; operation rejected")]
    Stopping,

    #[error("Capture loop is no longer running")]
    LoopExited,
}

/// Result type alias using RecorderError
pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RecorderError::system("test failure");
        assert_eq!(err.to_string(), "System error: test failure");

        let err = RecorderError::component("encoder", "codec rejected frame");
        assert!(err.to_string().contains("encoder"));
        assert!(err.to_string().contains("codec rejected frame"));
    }

    #[test]
    fn test_error_conversion() {
        let source_err = SourceError::fatal("device lost");
        let recorder_err: RecorderError = source_err.into();
        assert!(matches!(recorder_err, RecorderError::Source(_)));

        let engine_err = EngineError::AlreadyRecording;
        let recorder_err: RecorderError = engine_err.into();
        assert!(recorder_err.to_string().contains("already in progress"));
    }

    #[test]
    fn test_odd_dimensions_message() {
        let err = SourceError::OddDimensions {
            width: 1921,
            height: 1080,
        };
        assert!(err.to_string().contains("1921x1080"));
    }
}
