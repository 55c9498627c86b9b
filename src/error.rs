//! Crate-level error type for chat turns

use crate::cancel::RegistryError;
use crate::completion::CompletionError;
use crate::surface::SurfaceError;
use thiserror::Error;

/// Result alias used by the orchestrator and event handlers
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors surfaced by a chat turn or one of its setup steps
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to post acknowledgement message: {0}")]
    Acknowledge(#[source] SurfaceError),

    #[error("failed to take over bot message: {0}")]
    TakeOver(#[source] SurfaceError),

    #[error("failed to load conversation replies: {0}")]
    History(#[source] SurfaceError),

    #[error("failed to register cancellation handle: {0}")]
    Registry(#[from] RegistryError),

    #[error("failed to create chat completion stream: {0}")]
    OpenStream(#[source] CompletionError),

    #[error("error on stream receive: {0}")]
    Stream(#[source] CompletionError),

    #[error("failed to update message: {0}")]
    Flush(#[source] SurfaceError),

    #[error("failed to delete message: {0}")]
    Delete(#[source] SurfaceError),
}
