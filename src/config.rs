//! Client settings.
//!
//! Settings are plain serde structs so they can be loaded from a YAML file
//! and overridden from the command line.  Every field has a default; an empty
//! document is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::quota::QuotaLimits;

/// Default request timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default number of messages fetched when a session is opened.
pub const DEFAULT_MESSAGE_PAGE_SIZE: usize = 500;

/// Settings shared by the library and the REPL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Backend base URL.  `None` defers to `PARLEY_BASE_URL` and then to a
    /// local backend.
    pub base_url: Option<String>,
    /// Timeout for unary requests.
    pub timeout_secs: u64,
    /// File persisting the bearer token; `None` keeps it in memory.
    pub token_file: Option<PathBuf>,
    /// Client-side limits.
    pub limits: QuotaLimits,
    /// Streaming preference for the first session.
    pub default_stream: bool,
    /// Messages fetched when a session becomes active.
    pub message_page_size: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            token_file: None,
            limits: QuotaLimits::default(),
            default_stream: true,
            message_page_size: DEFAULT_MESSAGE_PAGE_SIZE,
        }
    }
}

impl ClientSettings {
    /// Parses settings from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|err| {
            Error::io(format!("failed to read settings {}", path.display()), err)
        })?;
        Self::from_yaml(&yaml)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::validation(
                "timeout_secs must be positive",
                Some("timeout_secs".to_string()),
            ));
        }
        if self.message_page_size == 0 {
            return Err(Error::validation(
                "message_page_size must be positive",
                Some("message_page_size".to_string()),
            ));
        }
        Ok(())
    }
}
