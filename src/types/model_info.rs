use serde::{Deserialize, Serialize};

/// A model the backend offers, as listed by `GET /models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Alias sessions bind to.
    pub alias: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Upstream provider.
    #[serde(default)]
    pub provider: String,

    /// Provider-side model name.
    #[serde(default)]
    pub model_name: String,

    /// Whether the backend marks this model as its default.
    #[serde(default)]
    pub is_default: bool,
}

impl ModelInfo {
    /// Create a new `ModelInfo` with only an alias.
    pub fn new(alias: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            name: alias.clone(),
            alias,
            provider: String::new(),
            model_name: String::new(),
            is_default: false,
        }
    }

    /// Returns the display name, or the alias when the name is empty.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.alias
        } else {
            &self.name
        }
    }
}
