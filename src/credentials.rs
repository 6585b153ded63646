//! Bearer-token persistence.
//!
//! The client keeps a single bearer token.  It is stored under a fixed key,
//! read before every request, and cleared on logout or when the backend
//! rejects it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Key under which the bearer token is persisted.
pub const TOKEN_KEY: &str = "access_token";

/// Storage for the bearer token.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored token, if any.
    fn load(&self) -> Option<String>;

    /// Persists `token`, replacing any previous one.
    fn store(&self, token: &str) -> Result<()>;

    /// Removes the stored token.
    fn clear(&self) -> Result<()>;
}

/// Keeps the token in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    token: Mutex<Option<String>>,
}

impl MemoryCredentials {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentials {
    fn load(&self) -> Option<String> {
        self.token.lock().ok().and_then(|token| token.clone())
    }

    fn store(&self, token: &str) -> Result<()> {
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(token.to_string());
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut slot) = self.token.lock() {
            *slot = None;
        }
        Ok(())
    }
}

/// Persists the token in a JSON document on disk.
///
/// The document is a flat object; the token lives under [`TOKEN_KEY`] and any
/// other keys are preserved across writes.
#[derive(Debug, Clone)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    /// Creates a store backed by the file at `path`.  The file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(Error::io("failed to read credential file", err)),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&content).map_err(|err| {
            Error::serialization("failed to parse credential file", Some(Box::new(err)))
        })
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|err| Error::io("failed to create credential directory", err))?;
        }
        let content = serde_json::to_string_pretty(document)?;
        fs::write(&self.path, content)
            .map_err(|err| Error::io("failed to write credential file", err))
    }
}

impl CredentialStore for FileCredentials {
    fn load(&self) -> Option<String> {
        match self.read_document() {
            Ok(document) => document
                .get(TOKEN_KEY)
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "ignoring unreadable credential file");
                None
            }
        }
    }

    fn store(&self, token: &str) -> Result<()> {
        let mut document = self.read_document().unwrap_or_default();
        document.insert(TOKEN_KEY.to_string(), Value::String(token.to_string()));
        self.write_document(&document)
    }

    fn clear(&self) -> Result<()> {
        let mut document = match self.read_document() {
            Ok(document) => document,
            Err(_) => Map::new(),
        };
        if document.remove(TOKEN_KEY).is_none() && !self.path.exists() {
            return Ok(());
        }
        self.write_document(&document)
    }
}
