//! File-backed persistence for the document store.
//!
//! One JSON file holds the whole serialized store. Reads and writes are
//! blocking and run only at startup and on the autosave cadence.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use panelui_core::{ConfigPersist, PersistError};

/// Stores the serialized document in a single file on disk.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigPersist for FileStorage {
    fn load(&self) -> Result<String, PersistError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                debug!(path = %self.path.display(), bytes = raw.len(), "config loaded");
                Ok(raw)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(PersistError::NotFound(self.path.display().to_string()))
            }
            Err(e) => Err(PersistError::Read(e.to_string())),
        }
    }

    fn save(&self, raw: &str) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PersistError::Write(e.to_string()))?;
            }
        }
        std::fs::write(&self.path, raw).map_err(|e| PersistError::Write(e.to_string()))?;
        debug!(path = %self.path.display(), bytes = raw.len(), "config saved");
        Ok(())
    }
}
