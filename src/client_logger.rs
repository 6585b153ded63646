//! Logging hooks for client traffic.
//!
//! This module provides the [`ClientLogger`] trait that allows users to capture
//! every request the [`Client`](crate::Client) issues and every event of the
//! answer streams it opens.

use std::time::Duration;

use reqwest::Method;

use crate::sse::StreamEvent;

/// A trait for logging client operations.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use parley::{ClientLogger, StreamEvent};
/// use reqwest::Method;
///
/// struct Stderr;
///
/// impl ClientLogger for Stderr {
///     fn log_request(&self, method: &Method, path: &str, status: Option<u16>, elapsed: Duration) {
///         eprintln!("{method} {path} -> {status:?} in {elapsed:?}");
///     }
///
///     fn log_stream_event(&self, session_id: &str, event: &StreamEvent) {
///         eprintln!("[{session_id}] {event:?}");
///     }
/// }
/// ```
pub trait ClientLogger: Send + Sync {
    /// Log a completed request.
    ///
    /// `status` is `None` when the request failed before a response arrived.
    fn log_request(&self, method: &Method, path: &str, status: Option<u16>, elapsed: Duration);

    /// Log one event of an answer stream opened on `session_id`.
    fn log_stream_event(&self, session_id: &str, event: &StreamEvent);
}

/// Forwards client traffic to `tracing` at debug (requests) and trace
/// (stream events) level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ClientLogger for TracingLogger {
    fn log_request(&self, method: &Method, path: &str, status: Option<u16>, elapsed: Duration) {
        tracing::debug!(
            %method,
            path,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "request completed"
        );
    }

    fn log_stream_event(&self, session_id: &str, event: &StreamEvent) {
        match event {
            StreamEvent::Token(token) => {
                tracing::trace!(session_id, bytes = token.len(), "stream token")
            }
            StreamEvent::End => tracing::trace!(session_id, "stream end"),
        }
    }
}
