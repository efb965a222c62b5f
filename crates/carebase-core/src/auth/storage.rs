//! Durable storage for the session record.
//!
//! The session lives under a single named record (`auth`). Backends only move
//! raw JSON text around; parsing and the "corrupt means signed out" rule live
//! here so every backend degrades the same way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing::debug;

use super::session::SessionData;

/// Name of the storage record holding the session
pub const SESSION_KEY: &str = "auth";

/// Session file name in the data directory
const SESSION_FILE: &str = "auth.json";

/// A persistent key-value slot for the serialized session.
pub trait SessionStorage: Send + Sync {
    /// Read the raw record, `None` if nothing has been stored
    fn read(&self) -> Result<Option<String>>;

    fn write(&self, contents: &str) -> Result<()>;

    /// Remove the record. Removing a missing record is not an error.
    fn remove(&self) -> Result<()>;
}

/// Load and parse the stored session.
/// Read failures are returned; a record that fails to parse is an error too.
pub fn load_session(storage: &dyn SessionStorage) -> Result<Option<SessionData>> {
    let Some(contents) = storage.read()? else {
        return Ok(None);
    };
    let data: SessionData =
        serde_json::from_str(&contents).context("Failed to parse stored session")?;
    Ok(Some(data))
}

/// Persist the session, removing the record entirely once it is empty
pub fn save_session(storage: &dyn SessionStorage, data: &SessionData) -> Result<()> {
    if data.is_empty() {
        storage.remove()
    } else {
        let contents = serde_json::to_string(data)?;
        storage.write(&contents)
    }
}

/// Read the bearer token straight from storage.
///
/// Does not go through a `SessionManager`, so it works before hydration and
/// for one-shot callers that hold no subscription. Any failure reads as
/// signed out.
pub fn get_stored_token(storage: &dyn SessionStorage) -> Option<String> {
    match load_session(storage) {
        Ok(data) => data.and_then(|d| d.token),
        Err(e) => {
            debug!(error = %e, "Stored session unreadable, treating as signed out");
            None
        }
    }
}

/// JSON file in the data directory.
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }
}

impl SessionStorage for FileStorage {
    fn read(&self) -> Result<Option<String>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        Ok(Some(contents))
    }

    fn write(&self, contents: &str) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a half-written record
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write session file")?;
        std::fs::rename(&tmp, &path).context("Failed to replace session file")?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// Process-local storage, used by tests and by embedders without a disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<&'static str, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the record with arbitrary text (including corrupt JSON)
    pub fn with_contents(contents: impl Into<String>) -> Self {
        let storage = Self::default();
        storage.records().insert(SESSION_KEY, contents.into());
        storage
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, String>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStorage for MemoryStorage {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.records().get(SESSION_KEY).cloned())
    }

    fn write(&self, contents: &str) -> Result<()> {
        self.records().insert(SESSION_KEY, contents.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        self.records().remove(SESSION_KEY);
        Ok(())
    }
}
