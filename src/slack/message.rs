//! Outgoing bot messages and their control posts

use super::client::SlackClient;
use crate::surface::{HistoryMessage, HistorySource, MessageHandle, MessageSurface, SurfaceError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Marker that introduces a directive in a channel's purpose or topic
pub const CUSTOM_INSTRUCTIONS_MARKER: &str = "SlackBot:";

pub const ACTION_STOP: &str = "stop";
pub const ACTION_REGENERATE: &str = "regenerate";
pub const ACTION_DELETE: &str = "delete";

/// Control buttons for the message at `target_ts`.
///
/// The block id carries the output message timestamp so button presses can be
/// routed back to the right turn.
pub fn action_block(with_stop: bool, target_ts: &str) -> Value {
    let button = |action: &str, label: &str| {
        json!({
            "type": "button",
            "action_id": action,
            "value": action,
            "text": { "type": "plain_text", "text": label, "emoji": true }
        })
    };

    let mut elements = Vec::with_capacity(3);
    if with_stop {
        elements.push(button(ACTION_STOP, ":x: Stop"));
    }
    elements.push(button(ACTION_REGENERATE, ":recycle: Regenerate"));
    elements.push(button(ACTION_DELETE, ":fire: Delete"));

    json!([{ "type": "actions", "block_id": target_ts, "elements": elements }])
}

/// Extract the directive from a purpose or topic text.
///
/// The first line containing [`CUSTOM_INSTRUCTIONS_MARKER`] wins; the rest of
/// that line, trimmed, is the directive.
pub fn parse_custom_instructions(input: &str) -> String {
    input
        .lines()
        .find_map(|line| line.split_once(CUSTOM_INSTRUCTIONS_MARKER))
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_default()
}

/// A bot reply plus the separate post holding its buttons
pub struct SlackBotMessage {
    client: Arc<SlackClient>,
    channel: String,
    output_ts: String,
    controller_ts: String,
}

impl SlackBotMessage {
    fn spawn_update(&self, ts: &str, text: Option<String>, blocks: Option<Value>) {
        let client = Arc::clone(&self.client);
        let channel = self.channel.clone();
        let ts = ts.to_string();

        tokio::spawn(async move {
            if let Err(e) = client.update_message(&channel, &ts, text.as_deref(), blocks).await {
                warn!(channel = %channel, ts = %ts, error = %e, "background message update failed");
            }
        });
    }

    fn spawn_delete(&self, ts: &str) {
        let client = Arc::clone(&self.client);
        let channel = self.channel.clone();
        let ts = ts.to_string();

        tokio::spawn(async move {
            if let Err(e) = client.delete_message(&channel, &ts).await {
                warn!(channel = %channel, ts = %ts, error = %e, "background message delete failed");
            }
        });
    }
}

#[async_trait]
impl MessageHandle for SlackBotMessage {
    async fn update(&self, text: &str, is_partial: bool) -> Result<(), SurfaceError> {
        if !is_partial {
            let controls = action_block(false, &self.output_ts);
            self.spawn_update(&self.controller_ts, None, Some(controls));
        }

        // Plain text, since long mrkdwn sections get collapsed behind "See more".
        self.client
            .update_message(&self.channel, &self.output_ts, Some(text), None)
            .await
    }

    async fn regenerate(&self, text: &str) -> Result<(), SurfaceError> {
        self.spawn_update(&self.controller_ts, None, Some(action_block(true, &self.output_ts)));
        self.client
            .update_message(&self.channel, &self.output_ts, Some(text), None)
            .await
    }

    async fn delete(&self) -> Result<(), SurfaceError> {
        self.spawn_delete(&self.output_ts);
        self.spawn_delete(&self.controller_ts);
        Ok(())
    }

    fn identifier(&self) -> &str {
        &self.output_ts
    }
}

/// Slack implementation of the platform collaborators
#[derive(Clone)]
pub struct SlackSurface {
    client: Arc<SlackClient>,
}

impl SlackSurface {
    pub fn new(client: Arc<SlackClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageSurface for SlackSurface {
    async fn create_placeholder(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<Box<dyn MessageHandle>, SurfaceError> {
        let output_ts = self.client.post_message(channel, thread_ts, Some(text), None).await?;

        // Buttons live in their own post so long replies stay fully expanded.
        let controller_ts = self
            .client
            .post_message(channel, thread_ts, None, Some(action_block(true, &output_ts)))
            .await?;

        Ok(Box::new(SlackBotMessage {
            client: Arc::clone(&self.client),
            channel: channel.to_string(),
            output_ts,
            controller_ts,
        }))
    }

    async fn take_over(
        &self,
        channel: &str,
        output_ts: &str,
        controller_ts: &str,
    ) -> Result<Box<dyn MessageHandle>, SurfaceError> {
        Ok(Box::new(SlackBotMessage {
            client: Arc::clone(&self.client),
            channel: channel.to_string(),
            output_ts: output_ts.to_string(),
            controller_ts: controller_ts.to_string(),
        }))
    }
}

#[async_trait]
impl HistorySource for SlackSurface {
    async fn load_replies(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<HistoryMessage>, SurfaceError> {
        self.client.conversation_replies(channel, thread_ts).await
    }

    async fn load_directive(&self, channel: &str) -> Result<String, SurfaceError> {
        let info = self.client.conversation_info(channel).await?;

        let directive = parse_custom_instructions(&info.purpose);
        if !directive.is_empty() {
            return Ok(directive);
        }
        Ok(parse_custom_instructions(&info.topic))
    }
}
