//! Slack bot that relays threads to a streaming chat-completion API.
//!
//! Each mention or direct message starts a turn: the bot posts a placeholder,
//! streams the model's answer into it with periodic edits, and offers stop,
//! regenerate and delete buttons that act on the turn while it runs.

pub mod cancel;
pub mod chat;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod metrics;
pub mod slack;
pub mod surface;
pub mod usage;

pub use chat::{Chat, TurnOutcome};
pub use config::{AppConfig, ChatConfig};
pub use error::{ChatError, Result};
