//! Slack Web API adapter
//!
//! Implements [`crate::surface`] on top of `chat.postMessage`, `chat.update`,
//! `chat.delete`, `conversations.replies` and `conversations.info`.

pub mod client;
pub mod message;

pub use client::{ChannelInfo, SlackClient};
pub use message::{
    action_block, parse_custom_instructions, SlackBotMessage, SlackSurface, ACTION_DELETE,
    ACTION_REGENERATE, ACTION_STOP, CUSTOM_INSTRUCTIONS_MARKER,
};
