use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::types::SessionConfig;

/// Key inside `Session::meta` holding the streaming preference.
pub const META_STREAM_KEY: &str = "stream";

/// A remote conversation context.
///
/// A session is bound to exactly one model alias and one retrieval
/// configuration at a time; see [`Session::config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier assigned by the backend.
    pub id: String,

    /// Owning user, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,

    /// Display title.
    #[serde(default)]
    pub title: Option<String>,

    /// Alias of the model the session is bound to.
    pub model_alias: String,

    /// Whether retrieval augmentation is enabled.
    #[serde(default)]
    pub use_rag: bool,

    /// Retrieval corpora bound to the session.
    #[serde(default)]
    pub rag_corpus_ids: Vec<i64>,

    /// Lifecycle status (1 = active, 2 = archived).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,

    /// Free-form metadata; carries the streaming preference.
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,

    /// Time of the last message.
    #[serde(default, with = "crate::utils::time")]
    pub last_message_at: Option<OffsetDateTime>,

    /// Creation time.
    #[serde(default, with = "crate::utils::time")]
    pub created_at: Option<OffsetDateTime>,

    /// Last update time.
    #[serde(default, with = "crate::utils::time")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Session {
    /// Create a session with the given id and configuration and no metadata
    /// beyond the streaming flag.
    pub fn new(id: impl Into<String>, config: &SessionConfig) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            title: None,
            model_alias: config.model_alias.clone(),
            use_rag: config.use_rag,
            rag_corpus_ids: config.rag_corpus_ids.clone(),
            status: Some(1),
            meta: Some(stream_meta(config.stream)),
            last_message_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Returns the streaming preference recorded in `meta`.
    ///
    /// Sessions created by other clients may lack the key; those stream.
    pub fn stream(&self) -> bool {
        self.meta
            .as_ref()
            .and_then(|meta| meta.get(META_STREAM_KEY))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Returns the configuration the session is bound to.
    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            model_alias: self.model_alias.clone(),
            use_rag: self.use_rag,
            rag_corpus_ids: self.rag_corpus_ids.clone(),
            stream: self.stream(),
        }
    }

    /// Returns a title suitable for listing.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => "(untitled)",
        }
    }
}

/// Builds the `meta` map carrying the streaming flag.
pub(crate) fn stream_meta(stream: bool) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert(META_STREAM_KEY.to_string(), Value::Bool(stream));
    meta
}

/// Body of `POST /chat/sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCreateParams {
    /// Model alias to bind.
    pub model_alias: String,
    /// Whether retrieval augmentation is enabled.
    pub use_rag: bool,
    /// Retrieval corpora to bind.
    pub rag_corpus_ids: Vec<i64>,
    /// Metadata; always carries the streaming flag.
    pub meta: Map<String, Value>,
}

impl From<&SessionConfig> for SessionCreateParams {
    fn from(config: &SessionConfig) -> Self {
        Self {
            model_alias: config.model_alias.clone(),
            use_rag: config.use_rag,
            rag_corpus_ids: config.rag_corpus_ids.clone(),
            meta: stream_meta(config.stream),
        }
    }
}

/// Body of `PATCH /chat/sessions/{id}`; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatchParams {
    /// New model alias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_alias: Option<String>,
    /// New retrieval flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_rag: Option<bool>,
    /// New corpus set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_corpus_ids: Option<Vec<i64>>,
    /// New metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl SessionPatchParams {
    /// Builds the patch that moves `current` to `desired`.
    ///
    /// Only fields that differ are sent.  The session's existing metadata is
    /// preserved with the streaming flag updated.
    pub fn between(current: &Session, desired: &SessionConfig) -> Self {
        let mut patch = Self::default();
        if current.model_alias != desired.model_alias {
            patch.model_alias = Some(desired.model_alias.clone());
        }
        if current.use_rag != desired.use_rag {
            patch.use_rag = Some(desired.use_rag);
        }
        if current.rag_corpus_ids != desired.rag_corpus_ids {
            patch.rag_corpus_ids = Some(desired.rag_corpus_ids.clone());
        }
        if current.stream() != desired.stream {
            let mut meta = current.meta.clone().unwrap_or_default();
            meta.insert(META_STREAM_KEY.to_string(), Value::Bool(desired.stream));
            patch.meta = Some(meta);
        }
        patch
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.model_alias.is_none()
            && self.use_rag.is_none()
            && self.rag_corpus_ids.is_none()
            && self.meta.is_none()
    }
}

/// Response of `GET /chat/sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionList {
    /// Sessions, most recent first.
    pub items: Vec<Session>,
    /// Number of sessions returned.
    #[serde(default)]
    pub total: usize,
}
