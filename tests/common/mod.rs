//! An in-memory backend that records every call.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc::{self, UnboundedSender};

use parley::{
    Backend, ChatResult, Error, MessageCreateParams, MessageRecord, ModelInfo, Result, Session,
    SessionConfig, SessionCreateParams, SessionPatchParams, TokenStream,
};

/// Number of calls per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calls {
    pub list_models: usize,
    pub list_sessions: usize,
    pub create: usize,
    pub patch: usize,
    pub delete: usize,
    pub list_messages: usize,
    pub post: usize,
    pub stream: usize,
}

impl Calls {
    pub fn total(&self) -> usize {
        self.list_models
            + self.list_sessions
            + self.create
            + self.patch
            + self.delete
            + self.list_messages
            + self.post
            + self.stream
    }
}

#[derive(Default)]
struct State {
    models: Vec<ModelInfo>,
    sessions: Vec<Session>,
    messages: HashMap<String, Vec<MessageRecord>>,
    next_session: u64,
    next_message: i64,
    calls: Calls,
    patch_failure: Option<Error>,
    delete_fails: bool,
    list_messages_fails: bool,
    stream_script: Option<Vec<&'static [u8]>>,
    feeds: Vec<UnboundedSender<Result<Bytes>>>,
}

/// Scriptable backend.
///
/// Streams either replay a fixed script or, when no script is set, stay
/// open until the test pushes bytes through [`FakeBackend::feed`].
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

pub fn record(id: i64, session_id: &str, role: &str, text: &str) -> MessageRecord {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "session_id": session_id,
        "role": role,
        "content_text": text,
    }))
    .unwrap()
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(aliases: &[&str]) -> Self {
        let backend = Self::new();
        backend.state.lock().unwrap().models =
            aliases.iter().map(|alias| ModelInfo::new(*alias)).collect();
        backend
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn add_session(&self, id: &str, config: &SessionConfig, messages: usize) {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(0, Session::new(id, config));
        let mut records = Vec::new();
        for i in 0..messages {
            state.next_message += 1;
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            records.push(record(state.next_message, id, role, &format!("m{i}")));
        }
        state.messages.insert(id.to_string(), records);
    }

    pub fn fail_patch_with(&self, err: Error) {
        self.state.lock().unwrap().patch_failure = Some(err);
    }

    pub fn fail_delete(&self) {
        self.state.lock().unwrap().delete_fails = true;
    }

    pub fn fail_list_messages(&self, fails: bool) {
        self.state.lock().unwrap().list_messages_fails = fails;
    }

    pub fn script_stream(&self, chunks: Vec<&'static [u8]>) {
        self.state.lock().unwrap().stream_script = Some(chunks);
    }

    /// Pushes bytes into the `index`th manually fed stream.  Bytes sent
    /// after the reader went away are dropped.
    pub fn feed(&self, index: usize, chunk: &'static [u8]) {
        let state = self.state.lock().unwrap();
        let _ = state.feeds[index].unbounded_send(Ok(Bytes::from_static(chunk)));
    }

    /// Closes the `index`th manually fed stream.
    pub fn close(&self, index: usize) {
        self.state.lock().unwrap().feeds[index].close_channel();
    }
}

fn config_of(params: &SessionCreateParams) -> SessionConfig {
    let stream = params
        .meta
        .get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    SessionConfig::new(params.model_alias.clone())
        .with_rag(params.use_rag)
        .with_corpora(params.rag_corpus_ids.clone())
        .with_stream(stream)
}

#[async_trait]
impl Backend for FakeBackend {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut state = self.state.lock().unwrap();
        state.calls.list_models += 1;
        Ok(state.models.clone())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut state = self.state.lock().unwrap();
        state.calls.list_sessions += 1;
        Ok(state.sessions.clone())
    }

    async fn create_session(&self, params: &SessionCreateParams) -> Result<Session> {
        let mut state = self.state.lock().unwrap();
        state.calls.create += 1;
        state.next_session += 1;
        let id = format!("session-{}", state.next_session);
        let session = Session::new(id.clone(), &config_of(params));
        state.sessions.insert(0, session.clone());
        state.messages.insert(id, Vec::new());
        Ok(session)
    }

    async fn patch_session(
        &self,
        session_id: &str,
        params: &SessionPatchParams,
    ) -> Result<Session> {
        let mut state = self.state.lock().unwrap();
        state.calls.patch += 1;
        if let Some(err) = state.patch_failure.clone() {
            return Err(err);
        }
        let non_empty = state
            .messages
            .get(session_id)
            .is_some_and(|messages| !messages.is_empty());
        if non_empty {
            return Err(Error::config_update_rejected(session_id, 409, "session has messages"));
        }
        let Some(session) = state.sessions.iter_mut().find(|s| s.id == session_id) else {
            return Err(Error::config_update_rejected(session_id, 404, "no such session"));
        };
        if let Some(alias) = &params.model_alias {
            session.model_alias = alias.clone();
        }
        if let Some(use_rag) = params.use_rag {
            session.use_rag = use_rag;
        }
        if let Some(ids) = &params.rag_corpus_ids {
            // The backend normalizes corpus ids.
            let mut ids = ids.clone();
            ids.sort_unstable();
            ids.dedup();
            session.rag_corpus_ids = ids;
        }
        if let Some(meta) = &params.meta {
            session.meta = Some(meta.clone());
        }
        Ok(session.clone())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.delete += 1;
        if state.delete_fails {
            return Err(Error::internal_server("delete failed"));
        }
        state.sessions.retain(|s| s.id != session_id);
        state.messages.remove(session_id);
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRecord>> {
        let mut state = self.state.lock().unwrap();
        state.calls.list_messages += 1;
        if state.list_messages_fails {
            return Err(Error::service_unavailable("backend down", None));
        }
        Ok(state
            .messages
            .get(session_id)
            .map(|messages| messages.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn post_message(
        &self,
        session_id: &str,
        params: &MessageCreateParams,
    ) -> Result<ChatResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.post += 1;
        let Some(session) = state.sessions.iter().find(|s| s.id == session_id).cloned() else {
            return Err(Error::not_found("no such session", None, None));
        };
        state.next_message += 2;
        let request = record(state.next_message - 1, session_id, "user", &params.content);
        let answer = record(
            state.next_message,
            session_id,
            "assistant",
            &format!("echo: {}", params.content),
        );
        let messages = state.messages.entry(session_id.to_string()).or_default();
        messages.push(request.clone());
        messages.push(answer.clone());
        Ok(ChatResult {
            session,
            request_message: request,
            answer_message: answer,
            used_rag: false,
            extra: Default::default(),
        })
    }

    async fn open_stream(
        &self,
        _session_id: &str,
        _params: &MessageCreateParams,
    ) -> Result<TokenStream> {
        let mut state = self.state.lock().unwrap();
        state.calls.stream += 1;
        let (tx, rx) = mpsc::unbounded();
        match state.stream_script.clone() {
            Some(script) => {
                for chunk in script {
                    let _ = tx.unbounded_send(Ok(Bytes::from_static(chunk)));
                }
            }
            None => state.feeds.push(tx),
        }
        Ok(TokenStream::from_bytes(rx))
    }
}
