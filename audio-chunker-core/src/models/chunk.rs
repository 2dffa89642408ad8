use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::error::ChunkerError;

/// Record of one finalized chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: u32,
    /// Path of the chunk file; `None` when delivered to an in-process sink.
    pub path: Option<String>,
    pub frames: u64,
    pub duration_secs: f64,
    /// SHA-256 hex digest of the finalized file; `None` for sink delivery.
    pub checksum: Option<String>,
    pub created_at: String,
}

/// Sidecar manifest written next to the chunk files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub id: String,
    pub created_at: String,
    pub sample_rate: u32,
    pub chunks: Vec<ChunkInfo>,
}

impl ChunkManifest {
    pub fn new(sample_rate: u32, chunks: Vec<ChunkInfo>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            sample_rate,
            chunks,
        }
    }
}

/// Write a manifest as pretty-printed JSON.
pub fn write_manifest(manifest: &ChunkManifest, path: &Path) -> Result<(), ChunkerError> {
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| ChunkerError::Storage(format!("failed to serialize manifest: {e}")))?;
    fs::write(path, json)
        .map_err(|e| ChunkerError::Storage(format!("failed to write manifest: {e}")))?;
    Ok(())
}

/// Read a manifest back from disk.
pub fn read_manifest(path: &Path) -> Result<ChunkManifest, ChunkerError> {
    let json = fs::read_to_string(path)
        .map_err(|e| ChunkerError::Storage(format!("failed to read manifest: {e}")))?;
    let manifest: ChunkManifest = serde_json::from_str(&json)
        .map_err(|e| ChunkerError::Storage(format!("failed to parse manifest: {e}")))?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        let manifest = ChunkManifest::new(
            8_000,
            vec![ChunkInfo {
                index: 0,
                path: Some("out/00.wav".into()),
                frames: 16_000,
                duration_secs: 2.0,
                checksum: Some("abc123".into()),
                created_at: "2024-01-01T00:00:00Z".into(),
            }],
        );

        write_manifest(&manifest, &path).unwrap();
        let back = read_manifest(&path).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn read_missing_manifest_is_storage_error() {
        let result = read_manifest(Path::new("/nonexistent/manifest.json"));
        assert!(matches!(result, Err(ChunkerError::Storage(_))));
    }
}
