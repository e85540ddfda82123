use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const STATE_VERSION: u32 = 1;

/// Persisted between runs: when the last fully successful sync finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStateFile {
    version: u32,
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for SyncStateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_sync: None,
        }
    }
}

impl SyncStateFile {
    /// Load state, treating a missing or outdated file as "never synced".
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        tracing::debug!("Loading sync state from {}", path.display());

        let file = File::open(path).map_err(|e| SyncError::storage("open state file", path, e))?;
        let state: Self = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            tracing::warn!("Failed to parse state file: {}", e);
            SyncError::storage(
                "parse state file",
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        if state.version != STATE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}",
                STATE_VERSION,
                state.version
            );
            return Ok(Self::default());
        }

        Ok(state)
    }

    /// Save state (atomic)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::storage("create state directory", parent, e))?;
        }
        let temp_path = path.with_extension("json.tmp");

        {
            let file = File::create(&temp_path)
                .map_err(|e| SyncError::storage("create temp state file", &temp_path, e))?;
            serde_json::to_writer_pretty(BufWriter::new(file), self).map_err(|e| {
                SyncError::storage("write state file", &temp_path, std::io::Error::other(e))
            })?;
        }

        std::fs::rename(&temp_path, path).map_err(|e| SyncError::storage("save state file", path, e))
    }

    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested/state.json");

        let mut state = SyncStateFile::default();
        let at = Utc::now();
        state.mark_synced(at);
        state.save(&path).unwrap();

        let loaded = SyncStateFile::load(&path).unwrap();
        assert_eq!(loaded.last_sync, Some(at));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_state_is_default() {
        let temp_dir = tempdir().unwrap();
        let state = SyncStateFile::load(&temp_dir.path().join("state.json")).unwrap();
        assert_eq!(state.last_sync, None);
    }

    #[test]
    fn test_version_mismatch_resets() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        std::fs::write(&path, r#"{"version": 99, "last_sync": "2024-01-01T00:00:00Z"}"#).unwrap();

        let state = SyncStateFile::load(&path).unwrap();
        assert_eq!(state.last_sync, None);
    }

    #[test]
    fn test_corrupted_state_is_error() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SyncStateFile::load(&path).is_err());
    }
}
