//! Session reconciliation and conversation state against an in-memory
//! backend.

mod common;

use common::FakeBackend;
use parley::chat::ChatClient;
use parley::{
    ClientSettings, ConfigOverride, Error, QuotaGuard, QuotaLimits, Reconciled, SessionConfig,
    SessionReconciler,
};

fn settings() -> ClientSettings {
    ClientSettings::default()
}

fn chat(backend: FakeBackend) -> ChatClient<FakeBackend> {
    ChatClient::new(backend, &settings(), SessionConfig::new("qwen-plus"))
}

#[tokio::test]
async fn first_reconcile_creates_exactly_one_session() {
    let backend = FakeBackend::with_models(&["qwen-plus", "deepseek-chat"]);
    let mut reconciler = SessionReconciler::new(QuotaGuard::default(), SessionConfig::new(""));
    reconciler.set_models(vec![parley::ModelInfo::new("qwen-plus")]);

    let first = reconciler
        .reconcile(&backend, 0, &ConfigOverride::none())
        .await
        .unwrap();
    assert!(first.is_created());
    assert_eq!(backend.calls().create, 1);
    assert_eq!(reconciler.sessions().len(), 1);
    assert_eq!(reconciler.active_id(), Some(first.session_id()));
    assert_eq!(reconciler.snapshot().model_alias, "qwen-plus");

    // The fresh session is empty and already matches: nothing to do.
    let second = reconciler
        .reconcile(&backend, 0, &ConfigOverride::none())
        .await
        .unwrap();
    assert_eq!(second, Reconciled::Unchanged(first.session_id().to_string()));
    assert_eq!(backend.calls().create, 1);
    assert_eq!(backend.calls().patch, 0);
}

#[tokio::test]
async fn omitted_fields_fall_back_to_snapshot() {
    let backend = FakeBackend::new();
    let initial = SessionConfig::new("qwen-plus")
        .with_rag(true)
        .with_corpora(vec![4])
        .with_stream(false);
    let mut reconciler = SessionReconciler::new(QuotaGuard::default(), initial);
    reconciler
        .reconcile(&backend, 0, &ConfigOverride::model("deepseek-chat"))
        .await
        .unwrap();
    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.model_alias, "deepseek-chat");
    assert!(snapshot.use_rag);
    assert_eq!(snapshot.rag_corpus_ids, vec![4]);
    assert!(!snapshot.stream);
}

#[tokio::test]
async fn empty_session_is_patched_in_place() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut chat = chat(backend);
    chat.bootstrap().await.unwrap();
    let created = chat.set_config(ConfigOverride::none()).await.unwrap();
    assert!(created.is_created());

    let patched = chat
        .set_config(ConfigOverride::model("deepseek-chat"))
        .await
        .unwrap();
    assert_eq!(patched, Reconciled::Patched(created.session_id().to_string()));
    assert_eq!(chat.snapshot().model_alias, "deepseek-chat");
    assert_eq!(chat.sessions().len(), 1);
    assert_eq!(chat.backend().calls().patch, 1);
}

#[tokio::test]
async fn server_normalization_wins_after_patch() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut chat = chat(backend);
    chat.set_config(ConfigOverride::none()).await.unwrap();
    chat.set_config(ConfigOverride::corpora(vec![3, 1, 3]))
        .await
        .unwrap();
    assert_eq!(chat.snapshot().rag_corpus_ids, vec![1, 3]);
    assert_eq!(
        chat.reconciler().active().unwrap().config(),
        *chat.snapshot()
    );
}

#[tokio::test]
async fn refused_patch_falls_back_to_create() {
    for refusal in [
        Error::config_update_rejected("x", 409, "conflict"),
        Error::config_update_rejected("x", 405, "not allowed"),
        Error::internal_server("boom"),
    ] {
        let backend = FakeBackend::with_models(&["qwen-plus"]);
        let mut chat = chat(backend);
        let first = chat.set_config(ConfigOverride::none()).await.unwrap();
        chat.backend().fail_patch_with(refusal);

        let next = chat
            .set_config(ConfigOverride::model("deepseek-chat"))
            .await
            .unwrap();
        assert!(next.is_created());
        assert_ne!(next.session_id(), first.session_id());
        assert_eq!(chat.active_id(), Some(next.session_id()));
        assert_eq!(chat.snapshot().model_alias, "deepseek-chat");
        assert_eq!(chat.sessions().len(), 2);
        assert_eq!(chat.sessions()[0].id, next.session_id());
        assert!(chat.messages().is_empty());
    }
}

#[tokio::test]
async fn authentication_failure_during_patch_is_surfaced() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut chat = chat(backend);
    chat.set_config(ConfigOverride::none()).await.unwrap();
    chat.backend()
        .fail_patch_with(Error::authentication("token expired"));

    let err = chat
        .set_config(ConfigOverride::model("deepseek-chat"))
        .await
        .unwrap_err();
    assert!(err.is_authentication());
    assert_eq!(chat.backend().calls().create, 1);
}

#[tokio::test]
async fn session_with_messages_gets_a_new_id() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut chat = chat(backend);
    chat.send_message("hello").await.unwrap();
    let before = chat.active_id().unwrap().to_string();
    assert_eq!(chat.messages().len(), 2);

    let next = chat
        .set_config(ConfigOverride::model("deepseek-chat"))
        .await
        .unwrap();
    assert!(next.is_created());
    assert_ne!(next.session_id(), before);
    assert_eq!(chat.backend().calls().patch, 0);
    assert!(chat.messages().is_empty());
    // The old conversation is still cached.
    assert_eq!(chat.conversation().message_count(&before), 2);
}

#[tokio::test]
async fn session_quota_blocks_create_without_network() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let limits = QuotaLimits {
        max_sessions: 3,
        ..QuotaLimits::default()
    };
    let mut reconciler = SessionReconciler::new(QuotaGuard::new(limits), SessionConfig::new("m"));
    for _ in 0..3 {
        reconciler
            .reconcile(&backend, 1, &ConfigOverride::none())
            .await
            .unwrap();
    }
    let calls = backend.calls();
    assert_eq!(calls.create, 3);

    let err = reconciler
        .reconcile(&backend, 1, &ConfigOverride::none())
        .await
        .unwrap_err();
    match err {
        Error::QuotaExceeded { limit, max, .. } => {
            assert_eq!(limit, "max_sessions");
            assert_eq!(max, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.calls(), calls);
    assert_eq!(reconciler.sessions().len(), 3);
}

#[tokio::test]
async fn default_session_quota_is_one_hundred() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut reconciler = SessionReconciler::new(QuotaGuard::default(), SessionConfig::new("m"));
    for _ in 0..100 {
        reconciler
            .start_session(&backend, &ConfigOverride::none())
            .await
            .unwrap();
    }
    let before = backend.calls().total();
    let err = reconciler
        .reconcile(&backend, 5, &ConfigOverride::none())
        .await
        .unwrap_err();
    assert!(err.is_quota_exceeded());
    assert_eq!(backend.calls().total(), before);
}

#[tokio::test]
async fn long_input_is_rejected_locally() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut chat = chat(backend);
    chat.send_message("hi").await.unwrap();
    let before = chat.messages().to_vec();
    let calls = chat.backend().calls();

    let err = chat.send_message(&"x".repeat(4001)).await.unwrap_err();
    assert!(err.is_quota_exceeded());
    assert_eq!(chat.messages(), before.as_slice());
    assert_eq!(chat.backend().calls(), calls);
}

#[tokio::test]
async fn message_quota_is_per_session() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let settings = ClientSettings {
        limits: QuotaLimits {
            max_messages_per_session: 2,
            ..QuotaLimits::default()
        },
        ..ClientSettings::default()
    };
    let mut chat = ChatClient::new(backend, &settings, SessionConfig::new("qwen-plus"));
    chat.send_message("one").await.unwrap();
    assert!(chat.send_message("two").await.unwrap_err().is_quota_exceeded());

    chat.new_session().await.unwrap();
    chat.send_message("two").await.unwrap();
}

#[tokio::test]
async fn sends_reuse_the_active_session() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut chat = chat(backend);
    chat.send_message("one").await.unwrap();
    chat.send_message("two").await.unwrap();
    assert_eq!(chat.backend().calls().create, 1);
    assert_eq!(chat.sessions().len(), 1);
    let contents: Vec<_> = chat.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "echo: one", "two", "echo: two"]);
    assert!(chat.messages().iter().all(|m| !m.id.is_provisional()));
}

#[tokio::test]
async fn delete_removes_local_state_even_when_remote_fails() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut chat = chat(backend);
    chat.send_message("hello").await.unwrap();
    let id = chat.active_id().unwrap().to_string();
    chat.backend().fail_delete();

    assert!(!chat.delete_session(&id).await);
    assert!(chat.sessions().iter().all(|s| s.id != id));
    assert_eq!(chat.conversation().message_count(&id), 0);
    assert_eq!(chat.active_id(), None);
    assert_eq!(chat.backend().calls().delete, 1);
}

#[tokio::test]
async fn delete_of_inactive_session_keeps_active() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut chat = chat(backend);
    let first = chat.new_session().await.unwrap();
    let second = chat.new_session().await.unwrap();
    assert!(chat.delete_session(&first).await);
    assert_eq!(chat.active_id(), Some(second.as_str()));
    assert_eq!(chat.sessions().len(), 1);
}

#[tokio::test]
async fn switch_keeps_cache_when_fetch_fails() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let config = SessionConfig::new("qwen-plus");
    backend.add_session("a", &config, 3);
    backend.add_session("b", &config.clone().with_rag(true), 0);
    let mut chat = chat(backend);
    chat.bootstrap().await.unwrap();
    // Most recent first.
    assert_eq!(chat.active_id(), Some("b"));

    chat.switch_active("a").await.unwrap();
    assert_eq!(chat.messages().len(), 3);
    assert!(!chat.snapshot().use_rag);

    chat.switch_active("b").await.unwrap();
    assert!(chat.snapshot().use_rag);

    chat.backend().fail_list_messages(true);
    chat.switch_active("a").await.unwrap();
    assert_eq!(chat.active_id(), Some("a"));
    assert_eq!(chat.messages().len(), 3);

    assert!(chat.switch_active("missing").await.unwrap_err().is_not_found());
    assert_eq!(chat.active_id(), Some("a"));
}

#[tokio::test]
async fn bootstrap_without_sessions_defers_creation() {
    let backend = FakeBackend::with_models(&["qwen-plus"]);
    let mut chat = ChatClient::new(backend, &settings(), SessionConfig::new(""));
    chat.bootstrap().await.unwrap();
    assert_eq!(chat.active_id(), None);
    assert_eq!(chat.snapshot().model_alias, "qwen-plus");
    assert_eq!(chat.backend().calls().create, 0);
}
