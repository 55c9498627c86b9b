//! Token estimation using tiktoken

use std::sync::Arc;
use tiktoken_rs::{get_bpe_from_model, CoreBPE};
use tracing::debug;

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;
}

/// Tiktoken-based estimator bound to one model's encoding
#[derive(Clone)]
pub struct TiktokenEstimator {
    model: String,
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Load the encoding for `model`.
    ///
    /// Returns `None` when tiktoken does not know the model; callers treat
    /// that as "cannot budget" rather than as an error.
    pub fn for_model(model: &str) -> Option<Self> {
        match get_bpe_from_model(model) {
            Ok(bpe) => Some(Self {
                model: model.to_string(),
                bpe: Arc::new(bpe),
            }),
            Err(e) => {
                debug!(model, error = %e, "no tokenizer for model");
                None
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Word-based token estimator (~1.3 tokens per word)
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}
