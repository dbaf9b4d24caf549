//! Durable round state.
//!
//! The coordinator writes the round counter before announcing a round, so
//! after a crash it resumes at a number no client has seen yet.

use std::path::{Path, PathBuf};

use cascade_core::round::PersistedState;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to encode state: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode {0}: {1}")]
    Decode(PathBuf, serde_json::Error),
    #[error("unsupported state version {0}")]
    UnsupportedVersion(u32),
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for the round counter.
///
/// `persist` is called with the round lock held, so implementations must
/// not call back into the coordinator.
pub trait StateStore: Send + Sync {
    fn persist(&self, state: &PersistedState) -> Result<(), PersistError>;

    /// The last persisted state, or `None` on first start.
    fn load_latest(&self) -> Result<Option<PersistedState>, PersistError>;
}

/// JSON file store. Writes go to a sibling temp file which is synced and
/// renamed over the target, so a crash leaves either the old or the new
/// snapshot.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    fn persist(&self, state: &PersistedState) -> Result<(), PersistError> {
        use std::io::Write;

        let json = serde_json::to_vec_pretty(state).map_err(PersistError::Encode)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistError::Write(parent.to_path_buf(), e))?;
        }

        let tmp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| PersistError::Write(self.path.clone(), e))?;

        tracing::trace!(round = state.round, path = %self.path.display(), "state persisted");
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<PersistedState>, PersistError> {
        let text = match std::fs::read(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::Read(self.path.clone(), e)),
        };
        let state: PersistedState = serde_json::from_slice(&text)
            .map_err(|e| PersistError::Decode(self.path.clone(), e))?;
        if state.version != PersistedState::VERSION {
            return Err(PersistError::UnsupportedVersion(state.version));
        }
        Ok(Some(state))
    }
}
