// Public modules
pub mod backend;
pub mod chat;
pub mod client;
pub mod client_logger;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod observability;
pub mod quota;
pub mod reconciler;
pub mod sse;
pub mod types;
pub mod utils;

// Re-exports
pub use backend::Backend;
pub use client::{AuthObserver, Client};
pub use client_logger::{ClientLogger, TracingLogger};
pub use config::ClientSettings;
pub use conversation::Conversation;
pub use credentials::{CredentialStore, FileCredentials, MemoryCredentials};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use quota::{QuotaGuard, QuotaLimits};
pub use reconciler::{Reconciled, SessionReconciler};
pub use sse::{
    CancelHandle, SseDecoder, SseFrame, StreamEvent, StreamObserver, StreamOutcome, StreamTask,
    TokenStream, drive, process_sse, spawn,
};
pub use types::*;
