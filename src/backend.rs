//! The backend operations the chat core depends on.
//!
//! [`Client`](crate::Client) implements [`Backend`] over HTTP.  The session
//! reconciler and the conversation state only see this trait, which keeps
//! them testable against an in-memory backend.

use async_trait::async_trait;

use crate::error::Result;
use crate::sse::TokenStream;
use crate::types::{
    ChatResult, MessageCreateParams, MessageRecord, ModelInfo, Session, SessionCreateParams,
    SessionPatchParams,
};

/// Remote operations on models, sessions and messages.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Lists the enabled models.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Lists the user's sessions, most recent first.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Creates a session.
    async fn create_session(&self, params: &SessionCreateParams) -> Result<Session>;

    /// Updates an empty session's configuration in place.
    ///
    /// Refusals (the session is not empty, the operation is not allowed, the
    /// session is gone) are reported as `Error::ConfigUpdateRejected`.
    async fn patch_session(&self, session_id: &str, params: &SessionPatchParams)
    -> Result<Session>;

    /// Deletes a session.
    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Lists up to `limit` messages of a session starting at `offset`, oldest
    /// first.
    async fn list_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRecord>>;

    /// Sends a user turn and waits for the complete answer.
    async fn post_message(
        &self,
        session_id: &str,
        params: &MessageCreateParams,
    ) -> Result<ChatResult>;

    /// Sends a user turn and opens the answer stream.
    async fn open_stream(
        &self,
        session_id: &str,
        params: &MessageCreateParams,
    ) -> Result<TokenStream>;
}
