//! Chat-platform collaborators used by the orchestrator
//!
//! The orchestrator only talks to the platform through these traits. The
//! Slack Web API implementation lives in [`crate::slack`].

use async_trait::async_trait;
use thiserror::Error;

/// Platform call errors
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// One raw message of a thread, in platform order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub user: String,
    pub username: Option<String>,
    pub text: String,
    pub ts: String,
    /// Set for the bot's own control-button posts
    pub is_controller: bool,
}

/// The outgoing message a turn writes into
#[async_trait]
pub trait MessageHandle: Send + Sync {
    /// Overwrite the message text.
    ///
    /// A non-partial update also restores the idle controls (no stop button).
    async fn update(&self, text: &str, is_partial: bool) -> Result<(), SurfaceError>;

    /// Reset the text and show the streaming controls again.
    ///
    /// Returns once the text is reset. The controls are restored in the
    /// background.
    async fn regenerate(&self, text: &str) -> Result<(), SurfaceError>;

    /// Remove the message and its controls. Removal itself is fire-and-forget.
    async fn delete(&self) -> Result<(), SurfaceError>;

    /// Platform identifier of the outgoing message
    fn identifier(&self) -> &str;
}

/// Creates and re-attaches to outgoing messages
#[async_trait]
pub trait MessageSurface: Send + Sync {
    /// Post `text` into the thread and attach streaming controls to it
    async fn create_placeholder(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<Box<dyn MessageHandle>, SurfaceError>;

    /// Handle for a message posted earlier, plus its control post
    async fn take_over(
        &self,
        channel: &str,
        output_ts: &str,
        controller_ts: &str,
    ) -> Result<Box<dyn MessageHandle>, SurfaceError>;
}

/// Thread replies and channel directives
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// All replies of the thread rooted at `thread_ts`, oldest first
    async fn load_replies(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<HistoryMessage>, SurfaceError>;

    /// Custom directive configured for `channel`; empty when none
    async fn load_directive(&self, channel: &str) -> Result<String, SurfaceError>;
}
