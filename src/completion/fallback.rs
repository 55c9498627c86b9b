//! Primary-model completion with a single fallback attempt

use super::{CompletionError, CompletionProvider, CompletionStream};
use crate::conversation::Conversation;
use crate::metrics::METRICS;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Opens completion streams, retrying once on a fallback model
#[derive(Clone)]
pub struct FallbackCompletion {
    provider: Arc<dyn CompletionProvider>,
    primary_model: String,
    fallback_model: String,
}

impl FallbackCompletion {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        primary_model: impl Into<String>,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            primary_model: primary_model.into(),
            fallback_model: fallback_model.into(),
        }
    }

    /// Open a stream for `conversation` bound to `cancel`.
    ///
    /// If the primary model cannot be opened the fallback model is tried
    /// exactly once; its error, if any, is returned as-is.
    pub async fn open(
        &self,
        conversation: &Conversation,
        cancel: CancellationToken,
    ) -> Result<CompletionStream, CompletionError> {
        let messages = conversation.to_chat_messages();

        match self.provider.open_stream(&self.primary_model, &messages).await {
            Ok(inner) => Ok(CompletionStream::new(inner, cancel, self.primary_model.as_str())),
            Err(e) => {
                warn!(
                    model = %self.primary_model,
                    fallback = %self.fallback_model,
                    error = %e,
                    "failed to create chat completion stream, trying fallback model"
                );
                METRICS.completion_fallbacks.inc();

                let inner = self.provider.open_stream(&self.fallback_model, &messages).await?;
                info!(model = %self.fallback_model, "fallback completion stream opened");
                Ok(CompletionStream::new(inner, cancel, self.fallback_model.as_str()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ChunkStream;
    use crate::conversation::{ChatMessage, Message, Role};
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    /// Fails for every model listed in `failing`, records all attempts
    struct ScriptedProvider {
        failing: Vec<&'static str>,
        attempts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(failing: Vec<&'static str>) -> Self {
            Self {
                failing,
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn open_stream(
            &self,
            model: &str,
            _messages: &[ChatMessage],
        ) -> Result<ChunkStream, CompletionError> {
            self.attempts.lock().unwrap().push(model.to_string());
            if self.failing.contains(&model) {
                return Err(CompletionError::UpstreamError(format!("{} unavailable", model)));
            }
            Ok(Box::pin(stream::iter(vec![Ok(model.to_string())])))
        }
    }

    fn conversation() -> Conversation {
        Conversation::new(vec![Message::new(Role::User, "hi", None, "1.0")])
    }

    #[tokio::test]
    async fn test_primary_success_does_not_touch_fallback() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let completion = FallbackCompletion::new(provider.clone(), "primary", "fallback");

        let mut s = completion.open(&conversation(), CancellationToken::new()).await.unwrap();
        assert_eq!(s.model(), "primary");
        assert_eq!(s.next_chunk().await.unwrap(), Some("primary".to_string()));
        assert_eq!(provider.attempts(), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_falls_back_once() {
        let provider = Arc::new(ScriptedProvider::new(vec!["primary"]));
        let completion = FallbackCompletion::new(provider.clone(), "primary", "fallback");

        let s = completion.open(&conversation(), CancellationToken::new()).await.unwrap();
        assert_eq!(s.model(), "fallback");
        assert_eq!(provider.attempts(), vec!["primary", "fallback"]);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec!["primary", "fallback"]));
        let completion = FallbackCompletion::new(provider.clone(), "primary", "fallback");

        let err = match completion.open(&conversation(), CancellationToken::new()).await {
            Err(e) => e,
            Ok(_) => panic!("expected failure"),
        };
        assert!(err.to_string().contains("fallback unavailable"));
        assert_eq!(provider.attempts(), vec!["primary", "fallback"]);
    }
}
