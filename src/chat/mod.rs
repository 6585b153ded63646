//! Interactive chat on top of the parley client library.
//!
//! # Architecture
//!
//! - [`ChatClient`]: the single state object.  It owns the session reconciler
//!   and the conversation cache and exposes the mutation entry points (send,
//!   switch, reconfigure, delete).
//! - [`config`]: CLI argument parsing and configuration
//! - [`commands`]: Slash command parsing
//! - [`render`]: Output rendering

pub mod commands;
pub mod config;
pub mod render;
mod session;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use render::{PlainTextRenderer, Renderer};
pub use session::{ChatClient, ChatStats, SendOutcome, StreamingTurn};
