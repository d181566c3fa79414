//! Persistence abstraction for the document store.
//!
//! The store itself never touches I/O; a [`ConfigPersist`] implementation is
//! handed in by the host platform (a flash file on embedded targets, a plain
//! file on Linux). Both methods are blocking: they run at startup and on the
//! autosave cadence, never on the message path.

/// Errors that can occur during persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// No persisted document exists yet (normal on first boot).
    #[error("no persisted config at {0}")]
    NotFound(String),

    #[error("config read failed: {0}")]
    Read(String),

    #[error("config write failed: {0}")]
    Write(String),
}

/// Blocking load/save of the serialized document store.
pub trait ConfigPersist: Send + Sync {
    /// Load the raw serialized document.
    fn load(&self) -> Result<String, PersistError>;

    /// Persist the raw serialized document.
    fn save(&self, raw: &str) -> Result<(), PersistError>;
}
