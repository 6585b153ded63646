use serde::{Deserialize, Serialize};

/// The configuration a session is bound to.
///
/// The client keeps one of these as its configuration snapshot; after any
/// reconciliation it equals the active session's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Alias of the model answering in the session.
    pub model_alias: String,
    /// Whether retrieval augmentation is enabled.
    pub use_rag: bool,
    /// Retrieval corpora consulted when `use_rag` is set.
    pub rag_corpus_ids: Vec<i64>,
    /// Whether answers are streamed token by token.
    pub stream: bool,
}

impl SessionConfig {
    /// Creates a streaming configuration for `model_alias` with retrieval off.
    pub fn new(model_alias: impl Into<String>) -> Self {
        Self {
            model_alias: model_alias.into(),
            use_rag: false,
            rag_corpus_ids: Vec::new(),
            stream: true,
        }
    }

    /// Sets the retrieval flag.
    pub fn with_rag(mut self, use_rag: bool) -> Self {
        self.use_rag = use_rag;
        self
    }

    /// Sets the retrieval corpora.
    pub fn with_corpora(mut self, rag_corpus_ids: Vec<i64>) -> Self {
        self.rag_corpus_ids = rag_corpus_ids;
        self
    }

    /// Sets the streaming flag.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Returns a copy with every field present in `desired` overridden.
    pub fn apply(&self, desired: &ConfigOverride) -> Self {
        Self {
            model_alias: desired
                .model_alias
                .clone()
                .unwrap_or_else(|| self.model_alias.clone()),
            use_rag: desired.use_rag.unwrap_or(self.use_rag),
            rag_corpus_ids: desired
                .rag_corpus_ids
                .clone()
                .unwrap_or_else(|| self.rag_corpus_ids.clone()),
            stream: desired.stream.unwrap_or(self.stream),
        }
    }
}

/// A partial override of [`SessionConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverride {
    /// Model alias to switch to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_alias: Option<String>,
    /// Retrieval flag to switch to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_rag: Option<bool>,
    /// Corpus set to switch to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_corpus_ids: Option<Vec<i64>>,
    /// Streaming flag to switch to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ConfigOverride {
    /// An override that changes nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Overrides the model alias.
    pub fn model(alias: impl Into<String>) -> Self {
        Self {
            model_alias: Some(alias.into()),
            ..Self::default()
        }
    }

    /// Overrides the retrieval flag.
    pub fn rag(use_rag: bool) -> Self {
        Self {
            use_rag: Some(use_rag),
            ..Self::default()
        }
    }

    /// Overrides the corpus set.
    pub fn corpora(rag_corpus_ids: Vec<i64>) -> Self {
        Self {
            rag_corpus_ids: Some(rag_corpus_ids),
            ..Self::default()
        }
    }

    /// Overrides the streaming flag.
    pub fn stream(stream: bool) -> Self {
        Self {
            stream: Some(stream),
            ..Self::default()
        }
    }
}
