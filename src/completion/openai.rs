//! OpenAI-compatible chat completion client with SSE streaming

use super::{ChunkStream, CompletionError, CompletionProvider};
use crate::conversation::ChatMessage;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client for `POST {api_base}/chat/completions`
///
/// `open_timeout` bounds connecting and receiving the response head. Reading
/// the streamed body has no deadline.
pub struct OpenAiClient {
    http: Client,
    open_timeout: Duration,
    api_base: String,
    api_key: String,
    organization: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        organization: Option<String>,
        open_timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let http = Client::builder()
            .connect_timeout(open_timeout)
            .build()
            .map_err(|e| CompletionError::RequestFailed(e.to_string()))?;
        let api_base: String = api_base.into();

        Ok(Self {
            http,
            open_timeout,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            organization: organization.filter(|o| !o.is_empty()),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn open_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream, CompletionError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = ChatCompletionRequest {
            model,
            messages,
            stream: true,
        };

        debug!(model, messages = messages.len(), "opening chat completion stream");

        let mut req = self.http.post(&url).bearer_auth(&self.api_key).json(&body);
        if let Some(org) = &self.organization {
            req = req.header("OpenAI-Organization", org);
        }

        let response = tokio::time::timeout(self.open_timeout, req.send())
            .await
            .map_err(|_| {
                CompletionError::Timeout(format!(
                    "no response within {}s",
                    self.open_timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout(e.to_string())
                } else {
                    CompletionError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CompletionError::UpstreamError(format!(
                "Status {}: {}",
                status, error_text
            )));
        }

        Ok(sse_deltas(response))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamFailure>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamFailure {
    message: String,
}

/// Map one server-sent event to a content delta.
///
/// Role-only and empty deltas yield `None`.
fn delta_from_event(data: &str) -> Option<Result<String, CompletionError>> {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(failure) = chunk.error {
                return Some(Err(CompletionError::Stream(failure.message)));
            }
            chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty())
                .map(Ok)
        }
        Err(e) => Some(Err(CompletionError::Stream(format!(
            "malformed stream chunk: {}",
            e
        )))),
    }
}

/// Turn a response body into a stream of content deltas, ending at `[DONE]`
fn sse_deltas(response: reqwest::Response) -> ChunkStream {
    let stream = response
        .bytes_stream()
        .eventsource()
        .take_while(|event| {
            let done = matches!(event, Ok(event) if event.data == "[DONE]");
            future::ready(!done)
        })
        .filter_map(|event| async move {
            match event {
                Ok(event) => delta_from_event(&event.data),
                Err(e) => Some(Err(CompletionError::Stream(e.to_string()))),
            }
        });

    Box::pin(stream)
}
