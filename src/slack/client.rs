//! Minimal Slack Web API client

use crate::surface::{HistoryMessage, SurfaceError};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Thin wrapper over the handful of Web API methods the bot needs
pub struct SlackClient {
    http: Client,
    api_base: String,
    token: SecretString,
}

/// Purpose and topic of a conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub purpose: String,
    pub topic: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ts: String,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    text: String,
    ts: String,
    #[serde(default)]
    blocks: Vec<Value>,
}

impl RawMessage {
    fn into_history(self) -> HistoryMessage {
        let is_controller = self
            .blocks
            .iter()
            .any(|b| b.get("type").and_then(Value::as_str) == Some("actions"));

        HistoryMessage {
            user: self.user.unwrap_or_default(),
            username: self.username,
            text: self.text,
            ts: self.ts,
            is_controller,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    channel: RawChannel,
}

#[derive(Debug, Default, Deserialize)]
struct RawChannel {
    #[serde(default)]
    purpose: Option<TextValue>,
    #[serde(default)]
    topic: Option<TextValue>,
}

#[derive(Debug, Default, Deserialize)]
struct TextValue {
    #[serde(default)]
    value: String,
}

impl SlackClient {
    /// `api_base` is `https://slack.com/api` in production
    pub fn new(
        api_base: impl Into<String>,
        token: SecretString,
        timeout: Duration,
    ) -> Result<Self, SurfaceError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SurfaceError::RequestFailed(e.to_string()))?;
        let api_base: String = api_base.into();

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Post a message into a thread, returning its timestamp
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: &str,
        text: Option<&str>,
        blocks: Option<Value>,
    ) -> Result<String, SurfaceError> {
        let mut body = json!({ "channel": channel, "thread_ts": thread_ts });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        if let Some(blocks) = blocks {
            body["blocks"] = blocks;
        }

        let resp: PostMessageResponse = self.post_json("chat.postMessage", &body).await?;
        Ok(resp.ts)
    }

    /// Replace the text or blocks of an existing message
    pub async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: Option<&str>,
        blocks: Option<Value>,
    ) -> Result<(), SurfaceError> {
        let mut body = json!({ "channel": channel, "ts": ts });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        if let Some(blocks) = blocks {
            body["blocks"] = blocks;
        }

        self.post_json::<Value>("chat.update", &body).await?;
        Ok(())
    }

    pub async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), SurfaceError> {
        let body = json!({ "channel": channel, "ts": ts });
        self.post_json::<Value>("chat.delete", &body).await?;
        Ok(())
    }

    /// Every reply of a thread, following pagination cursors
    pub async fn conversation_replies(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<Vec<HistoryMessage>, SurfaceError> {
        let mut messages = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut query = vec![("channel", channel), ("ts", ts)];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }

            let page: RepliesResponse = self.get("conversations.replies", &query).await?;
            messages.extend(page.messages.into_iter().map(RawMessage::into_history));

            let next = page.response_metadata.map(|m| m.next_cursor).unwrap_or_default();
            if !page.has_more || next.is_empty() {
                break;
            }
            cursor = next;
        }

        debug!(channel, thread_ts = ts, count = messages.len(), "loaded conversation replies");
        Ok(messages)
    }

    pub async fn conversation_info(&self, channel: &str) -> Result<ChannelInfo, SurfaceError> {
        let resp: InfoResponse = self.get("conversations.info", &[("channel", channel)]).await?;

        Ok(ChannelInfo {
            purpose: resp.channel.purpose.map(|p| p.value).unwrap_or_default(),
            topic: resp.channel.topic.map(|t| t.value).unwrap_or_default(),
        })
    }

    /// User id the bot token belongs to
    pub async fn auth_test(&self) -> Result<String, SurfaceError> {
        let resp: AuthTestResponse = self.post_json("auth.test", &json!({})).await?;
        Ok(resp.user_id)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<T, SurfaceError> {
        let response = self
            .http
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| SurfaceError::RequestFailed(format!("{}: {}", method, e)))?;

        Self::decode(method, response).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SurfaceError> {
        let response = self
            .http
            .get(format!("{}/{}", self.api_base, method))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| SurfaceError::RequestFailed(format!("{}: {}", method, e)))?;

        Self::decode(method, response).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, SurfaceError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SurfaceError::Platform(format!("{}: status {}", method, status)));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| SurfaceError::InvalidResponse(format!("{}: {}", method, e)))?;

        let envelope: Envelope = serde_json::from_value(value.clone())
            .map_err(|e| SurfaceError::InvalidResponse(format!("{}: {}", method, e)))?;
        if !envelope.ok {
            return Err(SurfaceError::Platform(format!(
                "{}: {}",
                method,
                envelope.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        serde_json::from_value(value)
            .map_err(|e| SurfaceError::InvalidResponse(format!("{}: {}", method, e)))
    }
}
