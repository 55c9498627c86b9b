//! Streaming chat completions
//!
//! [`CompletionProvider`] is the seam to the model vendor. [`FallbackCompletion`]
//! layers the one-shot fallback model on top of it and hands the orchestrator
//! a [`CompletionStream`] bound to the turn's cancellation token.

pub mod fallback;
pub mod openai;
pub mod stream;

pub use fallback::FallbackCompletion;
pub use openai::OpenAiClient;
pub use stream::{ChunkStream, CompletionStream};

use crate::conversation::ChatMessage;
use async_trait::async_trait;
use thiserror::Error;

/// Completion error types
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Completion cancelled")]
    Cancelled,
}

impl CompletionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompletionError::Cancelled)
    }
}

/// A backend able to open a streaming chat completion
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a completion for `messages` against `model`.
    ///
    /// Errors returned here are "open" failures and are eligible for the
    /// fallback retry; errors yielded by the stream are not.
    async fn open_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream, CompletionError>;
}
