use crate::config::EncoderConfig;
use crate::error::{RecorderError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Metadata for a completed recording session, written as a JSON sidecar
/// next to the output container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub output: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_frames: u64,
    pub audio_frames: u64,
    pub preroll_frames: u64,
    pub encoder: EncoderConfig,
}

/// Sidecar path for an output container: same stem, `.json` extension
pub fn sidecar_path(output: &Path) -> PathBuf {
    output.with_extension("json")
}

pub async fn save_metadata(metadata: &SessionMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(metadata).map_err(|e| {
        RecorderError::component("metadata", &format!("Failed to serialize metadata: {}", e))
    })?;

    let path = sidecar_path(&metadata.output);
    fs::write(&path, json).await.map_err(|e| {
        RecorderError::component(
            "metadata",
            &format!("Failed to write metadata file {}: {}", path.display(), e),
        )
    })?;

    debug!("Saved session metadata to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/Rec_20250101_120000.mp4")),
            PathBuf::from("/tmp/Rec_20250101_120000.json")
        );
    }

    #[test]
    fn test_metadata_round_trip() {
        let metadata = SessionMetadata {
            output: PathBuf::from("out.mp4"),
            started_at: Utc::now(),
            duration_ms: 5000,
            width: 1280,
            height: 720,
            fps: 30,
            video_frames: 150,
            audio_frames: 144,
            preroll_frames: 90,
            encoder: EncoderConfig::default(),
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let parsed: SessionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.video_frames, 150);
        assert_eq!(parsed.encoder.gop_size, 10);
    }

    #[tokio::test]
    async fn test_save_metadata_writes_sidecar() {
        let dir = std::env::temp_dir().join("retrorec_metadata_test");
        fs::create_dir_all(&dir).await.unwrap();
        let output = dir.join("session.mp4");

        let metadata = SessionMetadata {
            output: output.clone(),
            started_at: Utc::now(),
            duration_ms: 1000,
            width: 64,
            height: 64,
            fps: 30,
            video_frames: 30,
            audio_frames: 28,
            preroll_frames: 0,
            encoder: EncoderConfig::default(),
        };

        save_metadata(&metadata).await.unwrap();
        let written = fs::read_to_string(sidecar_path(&output)).await.unwrap();
        assert!(written.contains("\"video_frames\": 30"));

        let _ = fs::remove_dir_all(&dir).await;
    }
}
