//! Conversation model and token budgeting
//!
//! A [`Conversation`] is built from a thread's reply history, optionally
//! prefixed with a system directive, and trimmed to fit the model's context
//! window before it is sent to the completion API.

pub mod models;
pub mod token_budget;
pub mod token_estimator;

pub use models::{ChatMessage, Conversation, Message, Role, REDACTED_CONTENT};
pub use token_budget::TokenBudgeter;
pub use token_estimator::{TiktokenEstimator, TokenEstimator, WordBasedEstimator};
