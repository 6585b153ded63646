//! The HTTP client against a mock backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parley::chat::ChatClient;
use parley::{
    Backend, Client, ClientLogger, ClientSettings, ConfigOverride, CredentialStore, Error,
    MemoryCredentials, MessageCreateParams, Role, SessionConfig, SessionCreateParams,
    SessionPatchParams, StreamEvent,
};

fn session_json(id: &str, model: &str) -> serde_json::Value {
    json!({
        "id": id,
        "model_alias": model,
        "use_rag": false,
        "rag_corpus_ids": [],
        "meta": {"stream": true},
        "created_at": 1740823200,
    })
}

fn client_for(server: &MockServer, token: Option<&str>) -> (Client, Arc<MemoryCredentials>) {
    let credentials = Arc::new(match token {
        Some(token) => MemoryCredentials::with_token(token),
        None => MemoryCredentials::new(),
    });
    let client = Client::with_options(
        Some(server.uri()),
        Some(Duration::from_secs(5)),
        credentials.clone(),
    )
    .unwrap();
    (client, credentials)
}

#[tokio::test]
async fn bearer_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(query_param("enabled", "true"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"alias": "qwen-plus", "name": "Qwen Plus", "provider": "dashscope", "is_default": true},
            {"alias": "deepseek-chat"},
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("secret"));
    let models = client.list_models().await.unwrap();
    assert_eq!(models.len(), 2);
    assert!(models[0].is_default);
    assert_eq!(models[1].display_name(), "deepseek-chat");
}

#[tokio::test]
async fn unauthorized_clears_the_credential_and_notifies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Could not validate credentials"})),
        )
        .mount(&server)
        .await;

    let (client, credentials) = client_for(&server, Some("stale"));
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let client = client.with_auth_observer(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let err = client.list_sessions().await.unwrap_err();
    assert!(err.is_authentication());
    assert!(err.to_string().contains("Could not validate credentials"));
    assert_eq!(credentials.load(), None);
    assert!(!client.is_authenticated());
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_list_reads_the_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions"))
        .and(query_param("limit", "200"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                session_json("s2", "qwen-plus"),
                {"id": "s1", "model_alias": "deepseek-chat", "meta": {"stream": false}},
            ],
            "total": 2,
        })))
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let sessions = client.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, "s2");
    assert!(sessions[0].created_at.is_some());
    assert!(!sessions[1].stream());
}

#[tokio::test]
async fn create_sends_the_stream_flag_in_meta() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/sessions"))
        .and(body_json(json!({
            "model_alias": "qwen-plus",
            "use_rag": true,
            "rag_corpus_ids": [2],
            "meta": {"stream": false},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json("s9", "qwen-plus")))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let config = SessionConfig::new("qwen-plus")
        .with_rag(true)
        .with_corpora(vec![2])
        .with_stream(false);
    let session = client
        .create_session(&SessionCreateParams::from(&config))
        .await
        .unwrap();
    assert_eq!(session.id, "s9");
}

#[tokio::test]
async fn refused_patch_is_a_config_update_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/chat/sessions/s1"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"detail": "session already has messages"})),
        )
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let patch = SessionPatchParams {
        model_alias: Some("deepseek-chat".to_string()),
        ..SessionPatchParams::default()
    };
    let err = client.patch_session("s1", &patch).await.unwrap_err();
    assert!(err.is_config_update_rejected());
    assert_eq!(err.status_code(), Some(409));
}

#[tokio::test]
async fn validation_details_are_flattened() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/sessions/s1/messages"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "detail": [
                {"loc": ["body", "content"], "msg": "field required", "type": "missing"},
                {"loc": ["body", "message_type"], "msg": "unknown type", "type": "value_error"},
            ]
        })))
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let err = client
        .post_message("s1", &MessageCreateParams::text(""))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(400));
    assert_eq!(err.to_string(), "Bad request: field required; unknown type");
}

#[tokio::test]
async fn service_errors_map_by_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Session not found"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions/busy"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("retry-after", "7")
                .set_body_string("upstream overloaded"),
        )
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let err = client.get_session("gone").await.unwrap_err();
    assert!(err.is_not_found());

    let err = client.get_session("busy").await.unwrap_err();
    assert!(err.is_server_error());
    match err {
        Error::ServiceUnavailable { retry_after, .. } => assert_eq!(retry_after, Some(7)),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn session_ids_are_percent_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/chat/sessions/a%20b%2Fc"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    client.delete_session("a b/c").await.unwrap();
}

#[tokio::test]
async fn message_pages_accept_both_shapes() {
    let server = MockServer::start().await;
    let record = json!({"id": 1, "session_id": "s1", "role": "user", "content_text": "hi"});
    Mock::given(method("GET"))
        .and(path("/chat/sessions/s1/messages"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([record.clone()])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions/s2/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [record]})))
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let bare = client.list_messages("s1", 50, 0).await.unwrap();
    let envelope = client.list_messages("s2", 50, 0).await.unwrap();
    assert_eq!(bare, envelope);
    assert_eq!(bare[0].role, Role::User);
    assert_eq!(bare[0].message_type, "text");
}

#[tokio::test]
async fn login_stores_the_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=ada"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fresh", "token_type": "bearer"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"user_id": 3, "username": "ada", "role": "admin"})),
        )
        .mount(&server)
        .await;

    let (client, credentials) = client_for(&server, None);
    assert!(!client.is_authenticated());
    let token = client.login("ada", "pw").await.unwrap();
    assert_eq!(token.access_token, "fresh");
    assert_eq!(credentials.load().as_deref(), Some("fresh"));

    let me = client.me().await.unwrap();
    assert!(me.is_admin());

    client.logout().unwrap();
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn rejected_login_is_not_an_expired_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Incorrect username or password"})),
        )
        .mount(&server)
        .await;

    let (client, credentials) = client_for(&server, Some("still-valid"));
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let client = client.with_auth_observer(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let err = client.login("ada", "wrong").await.unwrap_err();
    assert!(err.is_authentication());
    assert!(err.to_string().contains("Incorrect username or password"));
    assert_eq!(credentials.load().as_deref(), Some("still-valid"));
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn answer_streams_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions/s1/stream"))
        .and(query_param("content", "hi there"))
        .and(query_param("message_type", "text"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(": keep-alive\n\ndata: hello\n\ndata: world\n\nevent: end\ndata: [DONE]\n\n"),
        )
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let mut stream = client
        .open_stream("s1", &MessageCreateParams::text("hi there"))
        .await
        .unwrap();
    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await {
        events.push(event.unwrap());
    }
    assert_eq!(
        events,
        vec![
            StreamEvent::Token("hello".into()),
            StreamEvent::Token("world".into()),
            StreamEvent::End,
        ]
    );
}

#[tokio::test]
async fn stream_error_frame_fails_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions/s1/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("data: par\n\nevent: error\ndata: model unavailable\n\ndata: late\n\n"),
        )
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let mut stream = client
        .open_stream("s1", &MessageCreateParams::text("hi"))
        .await
        .unwrap();
    assert_eq!(
        stream.next_event().await.unwrap().unwrap(),
        StreamEvent::Token("par".into())
    );
    let err = stream.next_event().await.unwrap().unwrap_err();
    assert!(err.is_streaming());
    assert!(err.to_string().contains("model unavailable"));
    assert!(stream.next_event().await.is_none());
}

#[tokio::test]
async fn stream_open_failure_is_an_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions/s1/stream"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"detail": "not your session"})))
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let Err(err) = client
        .open_stream("s1", &MessageCreateParams::text("hi"))
        .await
    else {
        panic!("stream should not open");
    };
    assert!(err.is_permission());
}

#[tokio::test]
async fn unreachable_backend_is_a_connection_error() {
    let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentials::with_token("t"));
    let client = Client::with_options(
        Some("http://127.0.0.1:1/".to_string()),
        Some(Duration::from_secs(2)),
        credentials,
    )
    .unwrap();
    let err = client.list_models().await.unwrap_err();
    assert!(err.is_connection() || err.is_timeout(), "{err}");
}

#[derive(Default)]
struct RecordingLogger {
    requests: Mutex<Vec<(Method, String, Option<u16>)>>,
    stream_events: AtomicUsize,
}

impl ClientLogger for RecordingLogger {
    fn log_request(&self, method: &Method, path: &str, status: Option<u16>, _: Duration) {
        self.requests
            .lock()
            .unwrap()
            .push((method.clone(), path.to_string(), status));
    }

    fn log_stream_event(&self, _: &str, _: &StreamEvent) {
        self.stream_events.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn logger_sees_requests_and_stream_events() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/chat/sessions/s1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions/s1/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_string("data: a\n\ndata: [DONE]\n\n"))
        .mount(&server)
        .await;

    let logger = Arc::new(RecordingLogger::default());
    let (client, _) = client_for(&server, Some("t"));
    let client = client.with_logger(logger.clone());

    assert!(client.delete_session("s1").await.unwrap_err().is_server_error());
    let mut stream = client
        .open_stream("s1", &MessageCreateParams::text("hi"))
        .await
        .unwrap();
    while stream.next_event().await.is_some() {}

    let requests = logger.requests.lock().unwrap().clone();
    assert_eq!(
        requests,
        vec![
            (Method::DELETE, "/chat/sessions/s1".to_string(), Some(500)),
            (Method::GET, "/chat/sessions/s1/stream".to_string(), Some(200)),
        ]
    );
    assert_eq!(logger.stream_events.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn chat_client_recreates_when_the_backend_refuses_a_patch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"alias": "qwen-plus"}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [session_json("s1", "qwen-plus")],
            "total": 1,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions/s1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/chat/sessions/s1"))
        .respond_with(ResponseTemplate::new(405))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json("s2", "deepseek-chat")))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client_for(&server, Some("t"));
    let mut chat = ChatClient::new(
        client,
        &ClientSettings::default(),
        SessionConfig::new("qwen-plus"),
    );
    chat.bootstrap().await.unwrap();
    assert_eq!(chat.active_id(), Some("s1"));

    let reconciled = chat
        .set_config(ConfigOverride::model("deepseek-chat"))
        .await
        .unwrap();
    assert!(reconciled.is_created());
    assert_eq!(chat.active_id(), Some("s2"));
    assert_eq!(chat.snapshot().model_alias, "deepseek-chat");
    let ids: Vec<_> = chat.sessions().iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s2", "s1"]);
}
