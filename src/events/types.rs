//! Inbound Slack payloads

use serde::Deserialize;
use serde_json::Value;

/// Top level body of an Events API request
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        event_id: Option<String>,
        event: Value,
    },
    #[serde(other)]
    Other,
}

/// Events the bot reacts to
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InnerEvent {
    AppMention(AppMentionEvent),
    Message(MessageEvent),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppMentionEvent {
    #[serde(default)]
    pub user: String,
    pub channel: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl AppMentionEvent {
    /// Root of the thread to answer in
    pub fn thread_root(&self) -> &str {
        root_ts(self.thread_ts.as_deref(), &self.ts)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub channel_type: String,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl MessageEvent {
    pub fn thread_root(&self) -> &str {
        root_ts(self.thread_ts.as_deref(), &self.ts)
    }

    /// Direct message written by a human
    pub fn is_human_dm(&self) -> bool {
        self.channel_type == "im"
            && !self.user.is_empty()
            && self.bot_id.as_deref().map_or(true, str::is_empty)
    }
}

fn root_ts<'a>(thread_ts: Option<&'a str>, ts: &'a str) -> &'a str {
    match thread_ts {
        Some(t) if !t.is_empty() => t,
        _ => ts,
    }
}

/// Form body of an interactivity request
#[derive(Debug, Deserialize)]
pub struct InteractionForm {
    pub payload: String,
}

/// Interactivity payload; only block actions are acted on
#[derive(Debug, Clone, Deserialize)]
pub struct InteractionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user: Option<IdRef>,
    #[serde(default)]
    pub channel: Option<IdRef>,
    #[serde(default)]
    pub container: Container,
    #[serde(default)]
    pub actions: Vec<BlockAction>,
}

impl InteractionPayload {
    pub fn is_block_actions(&self) -> bool {
        self.kind == "block_actions"
    }

    pub fn user_id(&self) -> &str {
        self.user.as_ref().map(|u| u.id.as_str()).unwrap_or_default()
    }

    pub fn channel_id(&self) -> &str {
        self.channel
            .as_ref()
            .map(|c| c.id.as_str())
            .or(self.container.channel_id.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub message_ts: String,
    #[serde(default)]
    pub thread_ts: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockAction {
    pub action_id: String,
    #[serde(default)]
    pub block_id: String,
}
