// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: write to `<path>.tmp`, then rename over `<path>`
// - Automatic backup: the previous file is copied to `<path>.backup` first
// - Recovery: an unparseable main file falls back to the backup, and an
//   unparseable backup falls back to empty state
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "state": {
//     "last_write": "2025-01-09T12:00:00Z",
//     "last_active": { "cu-v4": ["1.1.1.1", "1.0.0.1"] },
//     "artifact_id": "9f3c…"
//   }
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::{PriorRunState, StateStore};

/// State file format version
/// Used for future migration if format changes
const STATE_FILE_VERSION: &str = "1.0";

/// File-based state store with crash recovery
///
/// The file is read once at construction; `load()` serves the cached copy
/// and `save()` writes through immediately.
///
/// # Example
///
/// ```rust,no_run
/// use multinet_core::state::FileStateStore;
/// use multinet_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/multinet/state.json").await?;
///
///     let mut state = store.load().await?;
///     state.artifact_id = Some("9f3c".to_string());
///     store.save(&state).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    state: Arc<RwLock<PriorRunState>>,
}

/// Serializable state file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    state: PriorRunState,
}

/// Why a state file could not be loaded
enum LoadFailure {
    /// The file exists but does not parse
    Corrupted(Error),
    /// The file could not be read
    Unreadable(Error),
}

impl FileStateStore {
    /// Create or load a file state store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing state file
    /// 3. If it is corrupted, try the backup
    /// 4. If both fail to parse, start with empty state
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let state = Self::load_state_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Load state from file with automatic recovery
    async fn load_state_with_recovery(path: &Path) -> Result<PriorRunState, Error> {
        let err = match Self::load_state(path).await {
            Ok(state) => {
                tracing::debug!("Loaded run state from {}", path.display());
                return Ok(state);
            }
            Err(LoadFailure::Unreadable(e)) => return Err(e),
            Err(LoadFailure::Corrupted(e)) => e,
        };

        tracing::warn!(
            "State file appears corrupted: {}. Attempting recovery from backup.",
            err
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with empty state.");
            return Ok(PriorRunState::default());
        }

        match Self::load_state(&backup_path).await {
            Ok(state) => {
                tracing::info!("Recovered run state from backup");
                if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await {
                    tracing::error!(
                        "Failed to restore state file from backup: {}",
                        restore_err
                    );
                }
                Ok(state)
            }
            Err(LoadFailure::Corrupted(backup_err)) | Err(LoadFailure::Unreadable(backup_err)) => {
                tracing::error!(
                    "Backup also unusable: {}. Starting with empty state.",
                    backup_err
                );
                Ok(PriorRunState::default())
            }
        }
    }

    /// Load state from file
    async fn load_state(path: &Path) -> Result<PriorRunState, LoadFailure> {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(PriorRunState::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadFailure::Unreadable(Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            )))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadFailure::Corrupted(Error::state_store(format!(
                "Failed to parse state file {}: {}",
                path.display(),
                e
            )))
        })?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        Ok(state_file.state)
    }

    /// Write state to file atomically
    async fn write_state(&self, state: &PriorRunState) -> Result<(), Error> {
        let state_file = StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            state: state.clone(),
        };

        let json = serde_json::to_string_pretty(&state_file)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Run state written to {}", self.path.display());
        Ok(())
    }

    /// Restore state file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored state file from backup");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<PriorRunState, Error> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &PriorRunState) -> Result<(), Error> {
        // Hold the write lock across the file write so saves never interleave
        let mut guard = self.state.write().await;
        self.write_state(state).await?;
        *guard = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state_with_artifact(id: &str) -> PriorRunState {
        PriorRunState {
            artifact_id: Some(id.to_string()),
            ..PriorRunState::default()
        }
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileStateStore::new(&path).await.unwrap();
        assert_eq!(store.load().await.unwrap(), PriorRunState::default());

        let mut state = state_with_artifact("gist-1");
        state.last_write = Some(chrono::Utc::now());
        state
            .last_active
            .insert("cu-v4".to_string(), vec!["1.1.1.1".to_string()]);
        store.save(&state).await.unwrap();
        assert!(path.exists());

        let reopened = FileStateStore::new(&path).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path).await.unwrap();
        store.save(&state_with_artifact("first")).await.unwrap();
        // Second write moves "first" into the backup
        store.save(&state_with_artifact("second")).await.unwrap();

        let backup_path = FileStateStore::backup_path(&path);
        assert!(backup_path.exists(), "Backup file should exist after write");

        fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = FileStateStore::new(&path).await.unwrap();
        assert_eq!(
            recovered.load().await.unwrap().artifact_id.as_deref(),
            Some("first"),
            "Backup should contain previous state, not latest"
        );
    }

    #[tokio::test]
    async fn test_corrupted_without_backup_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").await.unwrap();

        let store = FileStateStore::new(&path).await.unwrap();
        assert_eq!(store.load().await.unwrap(), PriorRunState::default());
    }
}
