//! Token budget enforcement for outgoing prompts
//!
//! The oldest messages are redacted first: their content is replaced with a
//! short placeholder so the thread keeps its shape while shedding tokens.

use super::models::{Conversation, REDACTED_CONTENT};
use super::token_estimator::{TiktokenEstimator, TokenEstimator};
use crate::metrics::METRICS;
use std::sync::Arc;
use tracing::{debug, warn};

/// Trims conversations to a model's prompt budget
#[derive(Clone)]
pub struct TokenBudgeter {
    estimator: Option<Arc<dyn TokenEstimator>>,
    max_tokens: usize,
}

impl TokenBudgeter {
    /// Create a budgeter using an explicit estimator
    pub fn new(estimator: Arc<dyn TokenEstimator>, max_tokens: usize) -> Self {
        Self {
            estimator: Some(estimator),
            max_tokens,
        }
    }

    /// Create a budgeter for `model`. Unknown models get a budgeter that
    /// estimates every conversation at zero tokens and never trims.
    pub fn for_model(model: &str, max_tokens: usize) -> Self {
        let estimator = TiktokenEstimator::for_model(model)
            .map(|e| Arc::new(e) as Arc<dyn TokenEstimator>);
        if estimator.is_none() {
            warn!(model, "unknown tokenizer, prompt budgeting disabled");
        }
        Self { estimator, max_tokens }
    }

    /// Estimated prompt tokens, or 0 when no tokenizer is available
    pub fn estimate(&self, conversation: &Conversation) -> usize {
        match &self.estimator {
            Some(estimator) => conversation.tokens(estimator.as_ref()),
            None => 0,
        }
    }

    /// Redact messages oldest-first until the estimate fits the budget or no
    /// message is left to redact. Returns how many messages were redacted.
    ///
    /// Messages already cheaper than the placeholder are left alone so that
    /// trimming never grows the prompt.
    pub fn trim(&self, conversation: &mut Conversation) -> usize {
        let Some(estimator) = &self.estimator else {
            return 0;
        };
        let placeholder_tokens = estimator.estimate(REDACTED_CONTENT);
        let mut redacted = 0;

        for i in 0..conversation.len() {
            if conversation.tokens(estimator.as_ref()) <= self.max_tokens {
                break;
            }
            let message = &mut conversation.messages_mut()[i];
            if message.is_redacted() || estimator.estimate(message.content()) < placeholder_tokens {
                continue;
            }
            message.redact();
            redacted += 1;
        }

        if redacted > 0 {
            METRICS.prompt_messages_redacted.inc_by(redacted as f64);
            debug!(
                redacted,
                remaining_tokens = self.estimate(conversation),
                max_tokens = self.max_tokens,
                "trimmed conversation to fit token budget"
            );
        }

        redacted
    }
}
