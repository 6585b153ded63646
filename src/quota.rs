//! Client-side limits checked before any mutating request.
//!
//! Every check is pure and synchronous: a rejection costs no network round
//! trip.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observability::QUOTA_REJECTIONS;

/// Maximum number of sessions a user may hold.
pub const MAX_SESSIONS: usize = 100;

/// Maximum number of messages in one session.
pub const MAX_MESSAGES_PER_SESSION: usize = 1000;

/// Maximum length of one user input, in characters.
pub const MAX_INPUT_CHARS: usize = 4000;

/// The limits enforced by [`QuotaGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    /// Maximum number of sessions.
    pub max_sessions: usize,
    /// Maximum number of messages per session.
    pub max_messages_per_session: usize,
    /// Maximum input length in characters.
    pub max_input_chars: usize,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            max_sessions: MAX_SESSIONS,
            max_messages_per_session: MAX_MESSAGES_PER_SESSION,
            max_input_chars: MAX_INPUT_CHARS,
        }
    }
}

/// Stateless limit checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaGuard {
    limits: QuotaLimits,
}

impl QuotaGuard {
    /// Creates a guard enforcing `limits`.
    pub fn new(limits: QuotaLimits) -> Self {
        Self { limits }
    }

    /// Returns the enforced limits.
    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    /// Rejects creating a session when `session_count` already reaches the cap.
    pub fn check_session_create(&self, session_count: usize) -> Result<()> {
        if session_count >= self.limits.max_sessions {
            return Err(reject(
                format!("{session_count} sessions already exist"),
                "max_sessions",
                self.limits.max_sessions,
            ));
        }
        Ok(())
    }

    /// Rejects sending `text` into a session holding `message_count` messages.
    ///
    /// Length is counted in characters, not bytes.
    pub fn check_message_send(&self, message_count: usize, text: &str) -> Result<()> {
        if message_count >= self.limits.max_messages_per_session {
            return Err(reject(
                format!("session already holds {message_count} messages"),
                "max_messages_per_session",
                self.limits.max_messages_per_session,
            ));
        }
        let chars = text.chars().count();
        if chars > self.limits.max_input_chars {
            return Err(reject(
                format!("input is {chars} characters long"),
                "max_input_chars",
                self.limits.max_input_chars,
            ));
        }
        Ok(())
    }
}

fn reject(message: String, limit: &'static str, max: usize) -> Error {
    QUOTA_REJECTIONS.click();
    Error::quota_exceeded(message, limit, max)
}
