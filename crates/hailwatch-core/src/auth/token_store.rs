//! Session token persistence.
//!
//! The store file is a flat JSON object of string keys to string values living
//! at `<base>/session.json` with restricted permissions (0600). The bearer
//! token is kept under [`STORAGE_KEY`]; any other keys are left untouched.
//! Tokens are never logged or displayed in full.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::config::paths;
use crate::error::PersistenceError;

/// Key the bearer token is stored under.
pub const STORAGE_KEY: &str = "authToken";

/// Session store filename.
const SESSION_FILE: &str = "session.json";

/// Durable storage for exactly one session token.
pub trait TokenStore: Send + Sync {
    /// Stores `token`, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if the value could not be written durably.
    fn save(&self, token: &str) -> Result<(), PersistenceError>;

    /// Returns the stored token, or `None` if nothing has been stored.
    ///
    /// # Errors
    /// Returns an error if the storage exists but cannot be read.
    fn load(&self) -> Result<Option<String>, PersistenceError>;

    /// Removes the stored token. Clearing an empty store is not an error.
    ///
    /// # Errors
    /// Returns an error if existing storage could not be updated.
    fn clear(&self) -> Result<(), PersistenceError>;
}

impl<S: TokenStore + ?Sized> TokenStore for std::sync::Arc<S> {
    fn save(&self, token: &str) -> Result<(), PersistenceError> {
        (**self).save(token)
    }

    fn load(&self) -> Result<Option<String>, PersistenceError> {
        (**self).load()
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        (**self).clear()
    }
}

/// File-backed token store.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store at the default location under the hailwatch home directory.
    pub fn new() -> Self {
        Self::at(Self::default_path())
    }

    /// Store backed by an explicit file.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the default path of the session file.
    pub fn default_path() -> PathBuf {
        paths::hailwatch_home().join(SESSION_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, PersistenceError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(PersistenceError::new("read", &self.path, e)),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| PersistenceError::new("parse", &self.path, e))
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<(), PersistenceError> {
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(PersistenceError::new("remove", &self.path, e)),
            };
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::new("create directory for", &self.path, e))?;
        }

        let contents = serde_json::to_string_pretty(entries)
            .map_err(|e| PersistenceError::new("serialize", &self.path, e))?;

        // Write with restricted permissions
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .map_err(|e| PersistenceError::new("open", &self.path, e))?;
            file.write_all(contents.as_bytes())
                .and_then(|()| file.sync_all())
                .map_err(|e| PersistenceError::new("write", &self.path, e))?;
        }

        #[cfg(not(unix))]
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)
                .map_err(|e| PersistenceError::new("open", &self.path, e))?;
            file.write_all(contents.as_bytes())
                .and_then(|()| file.sync_all())
                .map_err(|e| PersistenceError::new("write", &self.path, e))?;
        }

        Ok(())
    }
}

impl Default for FileTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, token: &str) -> Result<(), PersistenceError> {
        let mut entries = self.read_entries()?;
        entries.insert(STORAGE_KEY.to_string(), token.to_string());
        self.write_entries(&entries)?;
        debug!(path = %self.path.display(), "session token saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<String>, PersistenceError> {
        let mut entries = self.read_entries()?;
        Ok(entries.remove(STORAGE_KEY).filter(|t| !t.is_empty()))
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        let mut entries = self.read_entries()?;
        if entries.remove(STORAGE_KEY).is_none() {
            return Ok(());
        }
        self.write_entries(&entries)?;
        debug!(path = %self.path.display(), "session token cleared");
        Ok(())
    }
}

/// Process-local token store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a token, as if a previous run had saved it.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        // A poisoned slot still holds a plain string; keep using it.
        self.token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, token: &str) -> Result<(), PersistenceError> {
        *self.slot() = Some(token.to_string());
        Ok(())
    }

    fn load(&self) -> Result<Option<String>, PersistenceError> {
        Ok(self.slot().clone())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        *self.slot() = None;
        Ok(())
    }
}
