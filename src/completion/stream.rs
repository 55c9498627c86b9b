//! Cancellable stream of content deltas

use super::CompletionError;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Raw delta stream produced by a provider
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Delta stream tied to one turn's cancellation token
pub struct CompletionStream {
    inner: ChunkStream,
    cancel: CancellationToken,
    model: String,
}

impl CompletionStream {
    pub fn new(inner: ChunkStream, cancel: CancellationToken, model: impl Into<String>) -> Self {
        Self {
            inner,
            cancel,
            model: model.into(),
        }
    }

    /// Model that actually served this stream
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Wait for the next delta.
    ///
    /// `Ok(Some(_))` is a chunk, `Ok(None)` is end-of-data and
    /// `Err(CompletionError::Cancelled)` means this turn was cancelled. A
    /// cancellation wins over a chunk that is ready at the same time.
    pub async fn next_chunk(&mut self) -> Result<Option<String>, CompletionError> {
        if self.cancel.is_cancelled() {
            return Err(CompletionError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CompletionError::Cancelled),
            item = self.inner.next() => item.transpose(),
        }
    }
}
