//! Routes decoded Slack events to the orchestrator

use super::types::{AppMentionEvent, InteractionPayload, MessageEvent};
use crate::chat::Chat;
use crate::error::Result;
use crate::metrics::METRICS;
use crate::slack::{ACTION_DELETE, ACTION_REGENERATE, ACTION_STOP};
use crate::usage::UsageSink;
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for every inbound event
pub struct EventHandler {
    chat: Arc<Chat>,
    usage: Arc<dyn UsageSink>,
}

impl EventHandler {
    pub fn new(chat: Arc<Chat>, usage: Arc<dyn UsageSink>) -> Self {
        Self { chat, usage }
    }

    /// Mention in a channel: answer in the thread, or start one
    pub async fn handle_app_mention(&self, event: AppMentionEvent) -> Result<()> {
        info!(
            user = %event.user,
            channel = %event.channel,
            "conversation requested by app mention"
        );

        self.usage.record(&event.user);
        self.chat.start(&event.channel, event.thread_root()).await?;
        Ok(())
    }

    /// Direct message from a human; everything else is ignored
    pub async fn handle_message(&self, event: MessageEvent) -> Result<()> {
        if !event.is_human_dm() {
            debug!(channel_type = %event.channel_type, "ignoring message event");
            return Ok(());
        }

        info!(
            user = %event.user,
            channel = %event.channel,
            "conversation requested by direct message"
        );

        self.usage.record(&event.user);
        self.chat.start(&event.channel, event.thread_root()).await?;
        Ok(())
    }

    /// Button presses on a control post.
    ///
    /// The button's block id is the output message timestamp and the container
    /// message is the control post itself. Only the first known action is
    /// handled.
    pub async fn handle_block_actions(&self, payload: InteractionPayload) -> Result<()> {
        if !payload.is_block_actions() {
            debug!(kind = %payload.kind, "ignoring interaction");
            return Ok(());
        }

        let channel = payload.channel_id();
        let controller_ts = payload.container.message_ts.as_str();

        for action in &payload.actions {
            let output_ts = action.block_id.as_str();

            match action.action_id.as_str() {
                ACTION_REGENERATE => {
                    info!(user = payload.user_id(), output_ts, "regenerate requested");
                    METRICS.record_action(ACTION_REGENERATE);
                    let thread_ts = payload.container.thread_ts.as_str();
                    self.chat.regenerate(channel, output_ts, thread_ts, controller_ts).await?;
                    return Ok(());
                }
                ACTION_STOP => {
                    info!(user = payload.user_id(), output_ts, "stop requested");
                    METRICS.record_action(ACTION_STOP);
                    return self.chat.stop(channel, output_ts).await;
                }
                ACTION_DELETE => {
                    info!(user = payload.user_id(), output_ts, "delete requested");
                    METRICS.record_action(ACTION_DELETE);
                    return self.chat.delete(channel, output_ts, controller_ts).await;
                }
                other => info!(action = other, "unknown action"),
            }
        }

        Ok(())
    }
}
