use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{MessageRecord, Session};

/// Response of a non-streaming `POST /chat/sessions/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    /// The session after the exchange (title and timestamps may change).
    pub session: Session,
    /// The persisted user turn.
    pub request_message: MessageRecord,
    /// The persisted answer.
    pub answer_message: MessageRecord,
    /// Whether retrieval contributed to the answer.
    #[serde(default)]
    pub used_rag: bool,
    /// Backend-specific extras.
    #[serde(default)]
    pub extra: Map<String, Value>,
}
