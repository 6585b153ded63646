//! Configuration types for the chat REPL.
//!
//! This module provides CLI argument parsing via `arrrg` and resolves the
//! arguments against an optional YAML settings file.

use std::path::PathBuf;

use arrrg_derive::CommandLine;

use crate::config::ClientSettings;
use crate::error::Result;
use crate::types::SessionConfig;

/// Command-line arguments for the parley-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Backend base URL.
    #[arrrg(optional, "Backend base URL (default: $PARLEY_BASE_URL or http://localhost:8000/)", "URL")]
    pub base_url: Option<String>,

    /// YAML settings file.
    #[arrrg(optional, "YAML settings file", "PATH")]
    pub config: Option<String>,

    /// Model alias for new sessions.
    #[arrrg(optional, "Model alias for new sessions (default: the backend's default)", "ALIAS")]
    pub model: Option<String>,

    /// Enable retrieval augmentation for new sessions.
    #[arrrg(flag, "Enable retrieval augmentation")]
    pub rag: bool,

    /// Disable streamed answers for new sessions.
    #[arrrg(flag, "Wait for complete answers instead of streaming")]
    pub no_stream: bool,

    /// File persisting the login token.
    #[arrrg(optional, "File persisting the login token", "PATH")]
    pub token_file: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Resolved configuration for the REPL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Client settings after command-line overrides.
    pub settings: ClientSettings,

    /// Configuration of the first session.  An empty model alias defers to
    /// the backend's default model.
    pub initial: SessionConfig,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::with_settings(ClientSettings::default())
    }

    /// Creates a configuration from settings, streaming as the settings say.
    pub fn with_settings(settings: ClientSettings) -> Self {
        let initial = SessionConfig::new("").with_stream(settings.default_stream);
        Self {
            settings,
            initial,
            use_color: true,
        }
    }

    /// Resolves command-line arguments, loading the settings file they name.
    pub fn from_args(args: ChatArgs) -> Result<Self> {
        let settings = match &args.config {
            Some(path) => ClientSettings::load(path)?,
            None => ClientSettings::default(),
        };
        Ok(Self::with_settings(settings).apply_args(args))
    }

    /// Overrides settings with command-line arguments.
    pub fn apply_args(mut self, args: ChatArgs) -> Self {
        if let Some(base_url) = args.base_url {
            self.settings.base_url = Some(base_url);
        }
        if let Some(token_file) = args.token_file {
            self.settings.token_file = Some(PathBuf::from(token_file));
        }
        if let Some(model) = args.model {
            self.initial.model_alias = model;
        }
        if args.rag {
            self.initial.use_rag = true;
        }
        if args.no_stream {
            self.initial.stream = false;
        }
        self.use_color = !args.no_color;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}
