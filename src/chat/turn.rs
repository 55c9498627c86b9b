//! Relaying one completion stream into a message

use crate::completion::CompletionStream;
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;
use crate::surface::MessageHandle;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// How a turn that did not fail came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream reached end-of-data
    Completed,
    /// The turn's own cancellation handle fired
    Cancelled,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOutcome::Completed => "completed",
            TurnOutcome::Cancelled => "cancelled",
        }
    }
}

/// Accumulates deltas and decides when a partial flush is due
#[derive(Debug)]
pub(crate) struct FlushBuffer {
    text: String,
    interval: Duration,
    deadline: Instant,
    dirty: bool,
}

impl FlushBuffer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            text: String::new(),
            interval,
            deadline: Instant::now() + interval,
            dirty: false,
        }
    }

    pub(crate) fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.dirty = true;
    }

    /// Whether there is unflushed content waiting for the timer
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Mark the buffer flushed and restart the timer
    pub(crate) fn reset(&mut self) {
        self.dirty = false;
        self.deadline = Instant::now() + self.interval;
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn into_text(self) -> String {
        self.text
    }
}

/// Drain `stream` into `message`.
///
/// Partial updates carry `updating_suffix` and happen at most once per
/// `interval`, only when new content arrived since the last one. The final
/// update is written exactly once, for both completion and cancellation. Any
/// failed write aborts the turn without further writes.
pub(crate) async fn relay(
    message: &dyn MessageHandle,
    stream: &mut CompletionStream,
    interval: Duration,
    updating_suffix: &str,
) -> Result<TurnOutcome> {
    let mut buffer = FlushBuffer::new(interval);

    let outcome = loop {
        tokio::select! {
            biased;

            chunk = stream.next_chunk() => match chunk {
                Ok(Some(delta)) => buffer.push(&delta),
                Ok(None) => break TurnOutcome::Completed,
                Err(e) if e.is_cancelled() => break TurnOutcome::Cancelled,
                Err(e) => return Err(ChatError::Stream(e)),
            },

            _ = sleep_until(buffer.deadline()), if buffer.is_dirty() => {
                let partial = format!("{}{}", buffer.text(), updating_suffix);
                message.update(&partial, true).await.map_err(ChatError::Flush)?;
                METRICS.partial_flushes.inc();
                buffer.reset();
            }
        }
    };

    let text = buffer.into_text();
    debug!(
        ts = message.identifier(),
        outcome = outcome.as_str(),
        chars = text.chars().count(),
        "writing final message"
    );
    message.update(&text, false).await.map_err(ChatError::Flush)?;

    Ok(outcome)
}
