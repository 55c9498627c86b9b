//! Turn orchestration
//!
//! [`Chat`] owns the lifecycle of a chat turn: it prepares the outgoing
//! message, builds and trims the conversation, registers a cancellation
//! handle, relays the completion stream and unregisters the handle on every
//! exit path. Stop, regenerate and delete act on turns through the shared
//! [`CancelRegistry`].

pub mod turn;

pub use turn::TurnOutcome;

use crate::cancel::CancelRegistry;
use crate::completion::FallbackCompletion;
use crate::config::ChatConfig;
use crate::conversation::{Conversation, TokenBudgeter};
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;
use crate::surface::{HistorySource, MessageHandle, MessageSurface};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Streaming-response orchestrator
pub struct Chat {
    surface: Arc<dyn MessageSurface>,
    history: Arc<dyn HistorySource>,
    completion: FallbackCompletion,
    budgeter: TokenBudgeter,
    registry: Arc<CancelRegistry>,
    config: ChatConfig,
}

impl Chat {
    pub fn new(
        surface: Arc<dyn MessageSurface>,
        history: Arc<dyn HistorySource>,
        completion: FallbackCompletion,
        budgeter: TokenBudgeter,
        registry: Arc<CancelRegistry>,
        config: ChatConfig,
    ) -> Self {
        Self {
            surface,
            history,
            completion,
            budgeter,
            registry,
            config,
        }
    }

    /// Answer the thread rooted at `thread_ts` in a freshly posted message
    pub async fn start(&self, channel: &str, thread_ts: &str) -> Result<TurnOutcome> {
        let message = self
            .surface
            .create_placeholder(channel, thread_ts, &self.config.ack_message)
            .await
            .map_err(ChatError::Acknowledge)?;

        info!(channel, thread_ts, output_ts = message.identifier(), "starting conversation turn");

        let conversation = self.build_conversation(channel, thread_ts, message.as_ref()).await?;
        self.run_turn(message.as_ref(), conversation).await
    }

    /// Rewrite the answer at `output_ts` from scratch.
    ///
    /// A turn still streaming into that message is cancelled first, and is
    /// given up to one update interval to write its final state so it cannot
    /// overwrite the new turn's placeholder.
    pub async fn regenerate(
        &self,
        channel: &str,
        output_ts: &str,
        thread_ts: &str,
        controller_ts: &str,
    ) -> Result<TurnOutcome> {
        if let Some(prior) = self.registry.cancel(output_ts) {
            if tokio::time::timeout(self.config.update_interval, prior.finished())
                .await
                .is_err()
            {
                warn!(output_ts, "previous turn did not finish in time, regenerating anyway");
            }
        }

        let message = self
            .surface
            .take_over(channel, output_ts, controller_ts)
            .await
            .map_err(ChatError::TakeOver)?;
        if let Err(e) = message.regenerate(&self.config.ack_message).await {
            warn!(output_ts, error = %e, "failed to reset message before regenerating");
        }

        info!(channel, thread_ts, output_ts, "regenerating conversation turn");

        let conversation = self.build_conversation(channel, thread_ts, message.as_ref()).await?;
        self.run_turn(message.as_ref(), conversation).await
    }

    /// Stop the turn writing into `output_ts`, if any.
    ///
    /// The turn itself writes the final text and restores the controls.
    pub async fn stop(&self, channel: &str, output_ts: &str) -> Result<()> {
        match self.registry.cancel(output_ts) {
            Some(_) => info!(channel, output_ts, "stop requested"),
            None => debug!(channel, output_ts, "stop requested for idle message"),
        }
        Ok(())
    }

    /// Cancel any turn on `output_ts` and remove the message with its controls
    pub async fn delete(&self, channel: &str, output_ts: &str, controller_ts: &str) -> Result<()> {
        self.registry.cancel(output_ts);

        let message = self
            .surface
            .take_over(channel, output_ts, controller_ts)
            .await
            .map_err(ChatError::TakeOver)?;

        info!(channel, output_ts, "deleting message");
        message.delete().await.map_err(ChatError::Delete)
    }

    /// Load history and directive, then shape the prompt for `message`
    async fn build_conversation(
        &self,
        channel: &str,
        thread_ts: &str,
        message: &dyn MessageHandle,
    ) -> Result<Conversation> {
        let directive = match self.history.load_directive(channel).await {
            Ok(directive) => directive,
            Err(e) => {
                warn!(channel, error = %e, "failed to load custom instructions");
                String::new()
            }
        };

        let replies = match self.history.load_replies(channel, thread_ts).await {
            Ok(replies) => replies,
            Err(e) => {
                if let Err(update_err) = message.update(&self.config.error_message, false).await {
                    warn!(channel, error = %update_err, "failed to report history error");
                }
                return Err(ChatError::History(e));
            }
        };

        let mut conversation = Conversation::from_history(&replies, &self.config.bot_user_id);
        conversation.set_system(self.config.render_system_prompt(&directive));
        conversation.truncate_at(message.identifier());

        self.budgeter.trim(&mut conversation);
        METRICS.prompt_tokens.observe(self.budgeter.estimate(&conversation) as f64);

        Ok(conversation)
    }

    /// Run the streaming state machine for an already prepared message
    pub async fn run_turn(
        &self,
        message: &dyn MessageHandle,
        conversation: Conversation,
    ) -> Result<TurnOutcome> {
        let started = Instant::now();
        let registration = self.registry.register(message.identifier())?;

        let result = self
            .stream_into(message, &conversation, registration.handle().token())
            .await;

        // Unregister before reporting, whatever the result.
        drop(registration);

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "failed",
        };
        METRICS.record_turn(outcome, started.elapsed().as_secs_f64());

        match &result {
            Ok(o) => info!(output_ts = message.identifier(), outcome = o.as_str(), "turn finished"),
            Err(e) => error!(output_ts = message.identifier(), error = %e, "turn failed"),
        }

        result
    }

    async fn stream_into(
        &self,
        message: &dyn MessageHandle,
        conversation: &Conversation,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<TurnOutcome> {
        let mut stream = match self.completion.open(conversation, cancel).await {
            Ok(stream) => stream,
            Err(e) => {
                let text = format!("{}\n```{}```", self.config.error_message, e);
                if let Err(update_err) = message.update(&text, false).await {
                    warn!(error = %update_err, "failed to report completion error");
                }
                return Err(ChatError::OpenStream(e));
            }
        };

        debug!(
            output_ts = message.identifier(),
            model = stream.model(),
            "completion stream opened"
        );

        turn::relay(
            message,
            &mut stream,
            self.config.update_interval,
            &self.config.updating_suffix,
        )
        .await
    }
}
