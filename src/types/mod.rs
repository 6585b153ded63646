// Public modules
pub mod auth;
pub mod chat_result;
pub mod message;
pub mod model_info;
pub mod session;
pub mod session_config;

// Re-exports
pub use auth::{TokenResponse, UserProfile};
pub use chat_result::ChatResult;
pub use message::{Message, MessageCreateParams, MessageId, MessagePage, MessageRecord, Role};
pub use model_info::ModelInfo;
pub use session::{
    META_STREAM_KEY, Session, SessionCreateParams, SessionList, SessionPatchParams,
};
pub use session_config::{ConfigOverride, SessionConfig};
