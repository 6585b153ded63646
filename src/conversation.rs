//! Per-session message cache.
//!
//! Messages are kept in order of arrival.  Turns sent by this client are
//! inserted immediately with provisional ids and later replaced by the
//! backend's records.

use std::collections::HashMap;

use crate::backend::Backend;
use crate::error::Result;
use crate::types::{Message, MessageId, MessageRecord, Role};

/// Session id to ordered messages.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: HashMap<String, Vec<Message>>,
    next_provisional: u64,
    page_size: usize,
}

impl Conversation {
    /// Creates an empty cache that fetches at most `page_size` messages per
    /// session.
    pub fn new(page_size: usize) -> Self {
        Self {
            messages: HashMap::new(),
            next_provisional: 0,
            page_size,
        }
    }

    /// Cached messages of a session, oldest first.
    pub fn messages(&self, session_id: &str) -> &[Message] {
        self.messages
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of cached messages of a session.
    pub fn message_count(&self, session_id: &str) -> usize {
        self.messages.get(session_id).map_or(0, Vec::len)
    }

    /// Allocates a provisional id.  Ids are never reused.
    pub fn allocate_id(&mut self) -> MessageId {
        self.next_provisional += 1;
        MessageId::Provisional(self.next_provisional)
    }

    /// Inserts a user turn stamped with the current time and returns its
    /// provisional id.
    pub fn append_user_message(&mut self, session_id: &str, text: &str) -> MessageId {
        let id = self.allocate_id();
        self.messages
            .entry(session_id.to_string())
            .or_default()
            .push(Message::new(id, session_id, Role::User, text));
        id
    }

    /// Appends `delta` to the assistant message `id`, inserting an empty one
    /// first if it does not exist.
    pub fn append_or_update_assistant_message(
        &mut self,
        session_id: &str,
        id: MessageId,
        delta: &str,
    ) {
        let messages = self.messages.entry(session_id.to_string()).or_default();
        match messages.iter_mut().find(|m| m.id == id) {
            Some(message) => message.content.push_str(delta),
            None => messages.push(Message::new(id, session_id, Role::Assistant, delta)),
        }
    }

    /// Replaces a session's messages wholesale.
    pub fn replace_messages(&mut self, session_id: &str, messages: Vec<Message>) {
        self.messages.insert(session_id.to_string(), messages);
    }

    /// Drops a session's messages.
    pub fn remove_session(&mut self, session_id: &str) -> Option<Vec<Message>> {
        self.messages.remove(session_id)
    }

    /// Replaces the provisional user turn with the backend's record and
    /// records the answer.
    pub fn confirm_exchange(
        &mut self,
        session_id: &str,
        provisional: MessageId,
        request: MessageRecord,
        answer: MessageRecord,
    ) {
        let messages = self.messages.entry(session_id.to_string()).or_default();
        let request = Message::from(request);
        match messages.iter_mut().find(|m| m.id == provisional) {
            Some(slot) => *slot = request,
            None => messages.push(request),
        }
        let answer = Message::from(answer);
        match messages.iter_mut().find(|m| m.id == answer.id) {
            Some(slot) => *slot = answer,
            None => messages.push(answer),
        }
    }

    /// Fetches a session's messages and replaces the cache.
    ///
    /// On failure the previous cache is left untouched.  Returns the number
    /// of messages fetched.
    pub async fn fetch<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        session_id: &str,
    ) -> Result<usize> {
        let records = backend
            .list_messages(session_id, self.page_size, 0)
            .await?;
        let messages: Vec<Message> = records.into_iter().map(Message::from).collect();
        let count = messages.len();
        self.replace_messages(session_id, messages);
        Ok(count)
    }
}
