use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::backend::Backend;
use crate::chat::render::Renderer;
use crate::config::ClientSettings;
use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::observability::{STATE_REMOTE_DELETE_FAILURES, STATE_SWITCH_FETCH_FAILURES};
use crate::quota::QuotaGuard;
use crate::reconciler::{Reconciled, SessionReconciler};
use crate::sse::{CancelHandle, StreamEvent, StreamOutcome, TokenStream};
use crate::types::{
    ChatResult, ConfigOverride, Message, MessageCreateParams, MessageId, ModelInfo, Session,
    SessionConfig,
};

/// An answer being streamed into the conversation.
///
/// Tokens are written to the session the stream was opened on, whichever
/// session is active when they arrive.  The session counts as streaming
/// until the stream ends or the turn is dropped.
pub struct StreamingTurn {
    session_id: String,
    request_id: MessageId,
    answer_id: MessageId,
    stream: TokenStream,
    in_flight: Arc<()>,
}

impl StreamingTurn {
    /// The session the stream writes to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Provisional id of the user turn.
    pub fn request_id(&self) -> MessageId {
        self.request_id
    }

    /// Provisional id of the answer being streamed.
    pub fn answer_id(&self) -> MessageId {
        self.answer_id
    }

    /// Returns a handle that cancels the stream.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.stream.cancel_handle()
    }
}

struct InFlight {
    alive: Weak<()>,
    cancel: CancelHandle,
}

/// How [`ChatClient::send`] delivered the answer.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The answer was streamed.
    Streamed(StreamOutcome),
    /// The answer arrived in one response.
    Answered(Box<ChatResult>),
}

/// Aggregated state of a chat client.
#[derive(Debug, Clone)]
pub struct ChatStats {
    /// Number of known sessions.
    pub session_count: usize,
    /// The active session id.
    pub active_session: Option<String>,
    /// Messages cached for the active session.
    pub message_count: usize,
    /// Number of sessions with an answer streaming in.
    pub streams_in_flight: usize,
    /// The configuration snapshot.
    pub config: SessionConfig,
}

/// The chat client's state and its mutation entry points.
///
/// Owns the session reconciler and the conversation cache, and routes every
/// send through the quota guard.  Methods take `&mut self`, so state only
/// changes between awaits.
pub struct ChatClient<B> {
    backend: B,
    reconciler: SessionReconciler,
    conversation: Conversation,
    in_flight: HashMap<String, InFlight>,
}

impl<B: Backend> ChatClient<B> {
    /// Creates a client with no sessions loaded.  Call
    /// [`bootstrap`](Self::bootstrap) to fetch models and sessions.
    pub fn new(backend: B, settings: &ClientSettings, initial: SessionConfig) -> Self {
        Self {
            backend,
            reconciler: SessionReconciler::new(QuotaGuard::new(settings.limits), initial),
            conversation: Conversation::new(settings.message_page_size),
            in_flight: HashMap::new(),
        }
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The session reconciler.
    pub fn reconciler(&self) -> &SessionReconciler {
        &self.reconciler
    }

    /// The conversation cache.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Known sessions, most recent first.
    pub fn sessions(&self) -> &[Session] {
        self.reconciler.sessions()
    }

    /// Known models.
    pub fn models(&self) -> &[ModelInfo] {
        self.reconciler.models()
    }

    /// The active session id.
    pub fn active_id(&self) -> Option<&str> {
        self.reconciler.active_id()
    }

    /// The configuration snapshot.
    pub fn snapshot(&self) -> &SessionConfig {
        self.reconciler.snapshot()
    }

    /// Messages of the active session.
    pub fn messages(&self) -> &[Message] {
        match self.reconciler.active_id() {
            Some(id) => self.conversation.messages(id),
            None => &[],
        }
    }

    /// Returns true if an answer is streaming into `session_id`.
    pub fn is_streaming(&self, session_id: &str) -> bool {
        self.in_flight
            .get(session_id)
            .is_some_and(|flight| flight.alive.strong_count() > 0)
    }

    /// Returns the current state snapshot.
    pub fn stats(&self) -> ChatStats {
        ChatStats {
            session_count: self.sessions().len(),
            active_session: self.active_id().map(str::to_string),
            message_count: self.messages().len(),
            streams_in_flight: self
                .in_flight
                .values()
                .filter(|flight| flight.alive.strong_count() > 0)
                .count(),
            config: self.snapshot().clone(),
        }
    }

    fn active_message_count(&self) -> usize {
        self.reconciler
            .active_id()
            .map_or(0, |id| self.conversation.message_count(id))
    }

    fn seed_if_created(&mut self, reconciled: &Reconciled) {
        if reconciled.is_created() {
            self.conversation
                .replace_messages(reconciled.session_id(), Vec::new());
        }
    }

    /// Loads models and sessions and opens the most recent session.
    pub async fn bootstrap(&mut self) -> Result<()> {
        let models = self.backend.list_models().await?;
        self.reconciler.set_models(models);
        self.refresh_sessions().await?;
        if self.reconciler.active_id().is_none()
            && let Some(first) = self.reconciler.sessions().first()
        {
            let id = first.id.clone();
            self.switch_active(&id).await?;
        }
        Ok(())
    }

    /// Reloads the session list.
    pub async fn refresh_sessions(&mut self) -> Result<()> {
        let sessions = self.backend.list_sessions().await?;
        self.reconciler.set_sessions(sessions);
        Ok(())
    }

    /// Makes `session_id` active and loads its messages.
    ///
    /// If the messages cannot be fetched the session still becomes active
    /// and whatever was cached for it is kept.
    ///
    /// A successful fetch replaces the cache.  Switching back to a session
    /// whose answer is still streaming therefore drops the partial answer
    /// held locally, and later tokens start a new entry holding only the
    /// rest of the answer.
    pub async fn switch_active(&mut self, session_id: &str) -> Result<()> {
        self.reconciler.set_active(session_id)?;
        if let Err(err) = self.conversation.fetch(&self.backend, session_id).await {
            STATE_SWITCH_FETCH_FAILURES.click();
            tracing::warn!(session_id, error = %err, "failed to load messages; keeping cached copy");
        }
        Ok(())
    }

    /// Refetches the active session's messages, replacing provisional ids
    /// with the backend's.
    pub async fn resync(&mut self) -> Result<usize> {
        let Some(id) = self.reconciler.active_id().map(str::to_string) else {
            return Ok(0);
        };
        self.conversation.fetch(&self.backend, &id).await
    }

    /// Moves the active session to the desired configuration.
    pub async fn set_config(&mut self, desired: ConfigOverride) -> Result<Reconciled> {
        let count = self.active_message_count();
        let reconciled = self
            .reconciler
            .reconcile(&self.backend, count, &desired)
            .await?;
        self.seed_if_created(&reconciled);
        Ok(reconciled)
    }

    /// Starts a new session with the current configuration.
    pub async fn new_session(&mut self) -> Result<String> {
        let id = self
            .reconciler
            .start_session(&self.backend, &ConfigOverride::none())
            .await?;
        self.conversation.replace_messages(&id, Vec::new());
        Ok(id)
    }

    /// Deletes a session.
    ///
    /// The local copy is always removed and any answer streaming into it is
    /// cancelled.  Returns false if the backend did not confirm the delete.
    pub async fn delete_session(&mut self, session_id: &str) -> bool {
        if let Some(flight) = self.in_flight.remove(session_id) {
            flight.cancel.cancel();
        }
        let confirmed = match self.backend.delete_session(session_id).await {
            Ok(()) => true,
            Err(err) => {
                STATE_REMOTE_DELETE_FAILURES.click();
                tracing::warn!(session_id, error = %err, "remote delete failed; removing local copy");
                false
            }
        };
        self.reconciler.forget(session_id);
        self.conversation.remove_session(session_id);
        confirmed
    }

    /// Stops the answer streaming into `session_id` and marks the session
    /// idle.  Returns false if nothing was streaming.
    pub fn cancel_stream(&mut self, session_id: &str) -> bool {
        match self.in_flight.remove(session_id) {
            Some(flight) => {
                flight.cancel.cancel();
                flight.alive.strong_count() > 0
            }
            None => false,
        }
    }

    /// Checks quotas and returns the session a send goes to, creating one if
    /// nothing is active.
    async fn prepare_send(&mut self, text: &str) -> Result<String> {
        let count = self.active_message_count();
        self.reconciler.quota().check_message_send(count, text)?;
        let reconciled = self.reconciler.ensure_active(&self.backend).await?;
        self.seed_if_created(&reconciled);
        let session_id = reconciled.session_id().to_string();
        if self.is_streaming(&session_id) {
            return Err(Error::stream_busy(session_id));
        }
        Ok(session_id)
    }

    /// Sends a turn the way the configuration says: streamed or not.
    pub async fn send(
        &mut self,
        text: &str,
        renderer: &mut dyn Renderer,
        cancel: &CancelHandle,
    ) -> Result<SendOutcome> {
        if self.snapshot().stream {
            let outcome = self.send_streaming(text, renderer, cancel).await?;
            Ok(SendOutcome::Streamed(outcome))
        } else {
            let result = self.send_message(text).await?;
            if let Some(answer) = &result.answer_message.content_text {
                renderer.print_text(answer);
            }
            renderer.finish_response();
            Ok(SendOutcome::Answered(Box::new(result)))
        }
    }

    /// Sends a turn and waits for the complete answer.
    ///
    /// The user turn is inserted before the request and replaced by the
    /// backend's record when the answer arrives.
    pub async fn send_message(&mut self, text: &str) -> Result<ChatResult> {
        let session_id = self.prepare_send(text).await?;
        let request_id = self.conversation.append_user_message(&session_id, text);
        let result = self
            .backend
            .post_message(&session_id, &MessageCreateParams::text(text))
            .await?;
        self.conversation.confirm_exchange(
            &session_id,
            request_id,
            result.request_message.clone(),
            result.answer_message.clone(),
        );
        self.reconciler.refresh(result.session.clone());
        Ok(result)
    }

    /// Sends a turn and opens its answer stream.
    ///
    /// An empty assistant entry is inserted as soon as the stream opens and
    /// grows as tokens arrive.
    /// The stream is cancelled along with `cancel`.  Drive it with
    /// [`next_stream_event`](Self::next_stream_event).
    pub async fn start_stream(
        &mut self,
        text: &str,
        cancel: &CancelHandle,
    ) -> Result<StreamingTurn> {
        let session_id = self.prepare_send(text).await?;
        let request_id = self.conversation.append_user_message(&session_id, text);
        let stream = self
            .backend
            .open_stream(&session_id, &MessageCreateParams::text(text))
            .await?
            .with_parent(cancel);
        let answer_id = self.conversation.allocate_id();
        self.conversation
            .append_or_update_assistant_message(&session_id, answer_id, "");
        let alive = Arc::new(());
        self.in_flight.insert(
            session_id.clone(),
            InFlight {
                alive: Arc::downgrade(&alive),
                cancel: stream.cancel_handle(),
            },
        );
        Ok(StreamingTurn {
            session_id,
            request_id,
            answer_id,
            stream,
            in_flight: alive,
        })
    }

    /// Reads the next event of `turn`, appending tokens to its answer.
    ///
    /// `None` means the stream was cancelled.  Tokens received before an
    /// error are kept.
    pub async fn next_stream_event(
        &mut self,
        turn: &mut StreamingTurn,
    ) -> Option<Result<StreamEvent>> {
        let event = turn.stream.next_event().await;
        match &event {
            Some(Ok(StreamEvent::Token(token))) => {
                self.conversation.append_or_update_assistant_message(
                    &turn.session_id,
                    turn.answer_id,
                    token,
                );
            }
            _ => {
                // A cancelled turn may have been replaced by a newer one.
                let owned = self.in_flight.get(&turn.session_id).is_some_and(|flight| {
                    Weak::ptr_eq(&flight.alive, &Arc::downgrade(&turn.in_flight))
                });
                if owned {
                    self.in_flight.remove(&turn.session_id);
                }
            }
        }
        event
    }

    /// Sends a turn and renders its answer as it streams in.
    pub async fn send_streaming(
        &mut self,
        text: &str,
        renderer: &mut dyn Renderer,
        cancel: &CancelHandle,
    ) -> Result<StreamOutcome> {
        let mut turn = self.start_stream(text, cancel).await?;
        loop {
            match self.next_stream_event(&mut turn).await {
                Some(Ok(StreamEvent::Token(token))) => renderer.print_text(&token),
                Some(Ok(StreamEvent::End)) => {
                    renderer.finish_response();
                    return Ok(StreamOutcome::Completed);
                }
                Some(Err(err)) => {
                    renderer.finish_response();
                    return Err(err);
                }
                None => {
                    renderer.print_interrupted();
                    return Ok(StreamOutcome::Cancelled);
                }
            }
        }
    }
}
