use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::backend::Backend;
use crate::client_logger::ClientLogger;
use crate::config::ClientSettings;
use crate::credentials::{CredentialStore, MemoryCredentials};
use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_AUTH_FAILURES, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS,
    STREAM_OPENED,
};
use crate::sse::{TokenStream, process_sse};
use crate::types::{
    ChatResult, MessageCreateParams, MessagePage, MessageRecord, ModelInfo, Session,
    SessionCreateParams, SessionList, SessionPatchParams, TokenResponse, UserProfile,
};

/// Base URL used when neither the caller nor `PARLEY_BASE_URL` provide one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/";
/// Environment variable consulted for the base URL.
pub const BASE_URL_ENV: &str = "PARLEY_BASE_URL";
/// Overall timeout for unary requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Page size used when listing sessions; the backend caps it at 200.
const SESSION_PAGE_SIZE: usize = 200;

/// Notified when the backend rejects the stored credential.
///
/// This is the signal to send the user back to the login view.
pub trait AuthObserver: Send + Sync {
    /// Called after the stored credential has been cleared.
    fn on_auth_failure(&self);
}

impl<F> AuthObserver for F
where
    F: Fn() + Send + Sync,
{
    fn on_auth_failure(&self) {
        self()
    }
}

/// HTTP client for the chat backend.
///
/// Every request carries the stored bearer token, if any.  A 401 answer
/// outside of [`login`](Client::login) clears the token, notifies the
/// [`AuthObserver`], and still fails the call with
/// [`Error::Authentication`].  Nothing is retried.
#[derive(Clone)]
pub struct Client {
    http: ReqwestClient,
    stream_http: ReqwestClient,
    base_url: Url,
    timeout: Duration,
    credentials: Arc<dyn CredentialStore>,
    auth_observer: Option<Arc<dyn AuthObserver>>,
    logger: Option<Arc<dyn ClientLogger>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl Client {
    /// Create a new client.
    ///
    /// The base URL can be provided directly or read from the
    /// `PARLEY_BASE_URL` environment variable; it defaults to a local backend.
    /// The token is kept in memory only.
    pub fn new(base_url: Option<String>) -> Result<Self> {
        Self::with_options(base_url, None, Arc::new(MemoryCredentials::new()))
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        base_url: Option<String>,
        timeout: Option<Duration>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let base_url = base_url
            .or_else(|| env::var(BASE_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::url(
                format!("{base_url} cannot be used as a base URL"),
                None,
            ));
        }

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let http = ReqwestClient::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        // Answer streams may legitimately stay open longer than any unary
        // request, so only the connect phase is bounded.
        let stream_http = ReqwestClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            http,
            stream_http,
            base_url,
            timeout,
            credentials,
            auth_observer: None,
            logger: None,
        })
    }

    /// Create a client from loaded settings and a credential store.
    pub fn from_settings(
        settings: &ClientSettings,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        Self::with_options(
            settings.base_url.clone(),
            Some(Duration::from_secs(settings.timeout_secs)),
            credentials,
        )
    }

    /// Registers the observer notified on authentication failure.
    pub fn with_auth_observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.auth_observer = Some(observer);
        self
    }

    /// Registers a traffic logger.
    pub fn with_logger(mut self, logger: Arc<dyn ClientLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns true if a bearer token is stored.
    pub fn is_authenticated(&self) -> bool {
        self.credentials.load().is_some()
    }

    /// Resolves `segments` against the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::url("base URL cannot carry a path", None))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = self.credentials.load() {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => tracing::warn!("stored token is not a valid header value; sending none"),
            }
        }
        headers
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    /// Issues a request and maps failure statuses to errors.  A 401 counts
    /// as a lost login.
    async fn execute(&self, method: Method, path: &str, request: RequestBuilder) -> Result<Response> {
        let result = self.dispatch(method, path, request).await;
        if let Err(err) = &result
            && err.is_authentication()
        {
            self.handle_auth_failure();
        }
        result
    }

    /// Issues a request and maps failure statuses to errors, leaving the
    /// stored credential alone.
    async fn dispatch(&self, method: Method, path: &str, request: RequestBuilder) -> Result<Response> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let result = request.send().await;
        let elapsed = start.elapsed();
        CLIENT_REQUEST_DURATION.add(elapsed.as_secs_f64());

        let status = result.as_ref().ok().map(|response| response.status().as_u16());
        if let Some(logger) = &self.logger {
            logger.log_request(&method, path, status, elapsed);
        }

        let response = result.map_err(|e| {
            CLIENT_REQUEST_ERRORS.click();
            self.transport_error(e)
        })?;

        if response.status().is_success() {
            return Ok(response);
        }
        CLIENT_REQUEST_ERRORS.click();
        Err(Self::process_error_response(response).await)
    }

    fn handle_auth_failure(&self) {
        CLIENT_AUTH_FAILURES.click();
        if let Err(err) = self.credentials.clear() {
            tracing::warn!(error = %err, "failed to clear stored credential");
        }
        if let Some(observer) = &self.auth_observer {
            observer.on_auth_failure();
        }
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        #[derive(Deserialize)]
        struct ErrorResponse {
            detail: Option<Value>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };

        let error_message = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.detail)
            .map(describe_detail)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| error_body.clone());

        match status_code {
            400 | 422 => Error::bad_request(error_message),
            401 => Error::authentication(error_message),
            403 => Error::permission(error_message),
            404 => Error::not_found(error_message, None, None),
            408 => Error::timeout(error_message, None),
            429 => Error::rate_limit(error_message, retry_after),
            500 => Error::internal_server(error_message),
            502..=504 => Error::service_unavailable(error_message, retry_after),
            _ => Error::api(status_code, error_message),
        }
    }

    /// Sends a request with an optional JSON body and query string.
    ///
    /// This is the transport primitive the typed methods build on.
    pub async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<Response> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let mut request = self
            .http
            .request(method.clone(), url)
            .headers(self.default_headers());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(method, &path, request).await
    }

    /// Sends a request and decodes the JSON response body.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.send(method, segments, body, query).await?;
        response.json::<T>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {e}"),
                Some(Box::new(e)),
            )
        })
    }

    /// Logs in with a password and stores the returned token.
    ///
    /// Rejected credentials fail with [`Error::Authentication`] but keep any
    /// stored token and do not notify the [`AuthObserver`].
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let url = self.endpoint(&["auth", "login"])?;
        let path = url.path().to_string();
        let request = self
            .http
            .post(url)
            .headers(self.default_headers())
            .form(&[
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
            ]);
        let response = self.dispatch(Method::POST, &path, request).await?;
        let token = response.json::<TokenResponse>().await.map_err(|e| {
            Error::serialization(format!("Failed to parse token: {e}"), Some(Box::new(e)))
        })?;
        if let Err(err) = self.credentials.store(&token.access_token) {
            tracing::warn!(error = %err, "failed to persist credential; keeping session-only login");
        }
        Ok(token)
    }

    /// Forgets the stored token.
    pub fn logout(&self) -> Result<()> {
        self.credentials.clear()
    }

    /// Returns the logged-in user.
    pub async fn me(&self) -> Result<UserProfile> {
        self.request_json(Method::GET, &["auth", "me"], None, &[]).await
    }

    /// Fetches one session.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.request_json(Method::GET, &["chat", "sessions", session_id], None, &[])
            .await
    }
}

/// Flattens FastAPI's `detail`, which is a string or a list of validation
/// errors.
fn describe_detail(detail: Value) -> String {
    match detail {
        Value::String(message) => message,
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.get("msg")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| item.to_string())
            })
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

#[async_trait]
impl Backend for Client {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.request_json(
            Method::GET,
            &["models"],
            None,
            &[("enabled", "true".to_string())],
        )
        .await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let list: SessionList = self
            .request_json(
                Method::GET,
                &["chat", "sessions"],
                None,
                &[
                    ("limit", SESSION_PAGE_SIZE.to_string()),
                    ("offset", "0".to_string()),
                ],
            )
            .await?;
        Ok(list.items)
    }

    async fn create_session(&self, params: &SessionCreateParams) -> Result<Session> {
        let body = serde_json::to_value(params)?;
        self.request_json(Method::POST, &["chat", "sessions"], Some(&body), &[])
            .await
    }

    async fn patch_session(
        &self,
        session_id: &str,
        params: &SessionPatchParams,
    ) -> Result<Session> {
        let body = serde_json::to_value(params)?;
        self.request_json(
            Method::PATCH,
            &["chat", "sessions", session_id],
            Some(&body),
            &[],
        )
        .await
        .map_err(|err| match err.status_code() {
            Some(code @ (403 | 404 | 405 | 409)) => {
                Error::config_update_rejected(session_id, code, err.to_string())
            }
            _ => err,
        })
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.send(
            Method::DELETE,
            &["chat", "sessions", session_id],
            None,
            &[],
        )
        .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRecord>> {
        let page: MessagePage = self
            .request_json(
                Method::GET,
                &["chat", "sessions", session_id, "messages"],
                None,
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await?;
        Ok(page.into_records())
    }

    async fn post_message(
        &self,
        session_id: &str,
        params: &MessageCreateParams,
    ) -> Result<ChatResult> {
        let body = serde_json::to_value(params)?;
        self.request_json(
            Method::POST,
            &["chat", "sessions", session_id, "messages"],
            Some(&body),
            &[],
        )
        .await
    }

    async fn open_stream(
        &self,
        session_id: &str,
        params: &MessageCreateParams,
    ) -> Result<TokenStream> {
        let url = self.endpoint(&["chat", "sessions", session_id, "stream"])?;
        let path = url.path().to_string();
        let mut headers = self.default_headers();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        let request = self
            .stream_http
            .get(url)
            .headers(headers)
            .query(&[
                ("content", params.content.as_str()),
                ("message_type", params.message_type.as_str()),
            ]);
        let response = self.execute(Method::GET, &path, request).await?;
        STREAM_OPENED.click();

        let body = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        let events = process_sse(body);
        match self.logger.clone() {
            Some(logger) => {
                let session_id = session_id.to_string();
                Ok(TokenStream::new(events.inspect(move |event| {
                    if let Ok(event) = event {
                        logger.log_stream_event(&session_id, event);
                    }
                })))
            }
            None => Ok(TokenStream::new(events)),
        }
    }
}
