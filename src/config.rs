//! Application configuration
//!
//! Values come from an optional `relay.toml` overlaid by environment
//! variables (`OPENAI_API_KEY`, `SLACK_BOT_TOKEN`, `UPDATE_INTERVAL_MS`, ...).
//! Only variables naming a known setting are read. Settings with generic
//! names such as `host` and `port` are read only as `RELAY_HOST`, `RELAY_PORT`.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Placeholder replaced by the channel directive in the system prompt
pub const CUSTOM_INSTRUCTIONS_PLACEHOLDER: &str = "{{custom_instructions}}";

/// Directive used when a channel has none configured
pub const NO_CUSTOM_INSTRUCTIONS: &str = "no custom instructions";

/// Every setting that may come from the environment
const ENV_KEYS: &[&str] = &[
    "log_level",
    "log_format",
    "host",
    "port",
    "max_body_bytes",
    "openai_api_key",
    "openai_organization_id",
    "openai_api_base",
    "openai_model",
    "openai_fallback_model",
    "openai_timeout_secs",
    "slack_bot_token",
    "slack_signing_secret",
    "slack_api_base",
    "slack_timeout_secs",
    "update_interval_ms",
    "max_prompt_tokens",
    "system_prompt",
    "ack_message",
    "updating_suffix",
    "error_message",
];

/// Settings whose bare names collide with common deployment variables
const PREFIXED_ONLY_KEYS: &[&str] = &["log_level", "log_format", "host", "port"];

const ENV_PREFIX: &str = "relay_";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Fallback filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted webhook body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    pub openai_api_key: SecretString,

    #[serde(default)]
    pub openai_organization_id: Option<String>,

    #[serde(default = "default_openai_api_base")]
    pub openai_api_base: String,

    #[serde(default = "default_model")]
    pub openai_model: String,

    /// Model tried once when the primary model cannot be opened
    #[serde(default = "default_model")]
    pub openai_fallback_model: String,

    /// Bound on connecting and receiving response headers. The streamed
    /// body is read without a deadline.
    #[serde(default = "default_openai_timeout_secs")]
    pub openai_timeout_secs: u64,

    pub slack_bot_token: SecretString,

    pub slack_signing_secret: SecretString,

    #[serde(default = "default_slack_api_base")]
    pub slack_api_base: String,

    #[serde(default = "default_slack_timeout_secs")]
    pub slack_timeout_secs: u64,

    /// Minimum time between in-progress message updates
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Prompt budget enforced before each completion
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,

    /// System prompt template, see [`CUSTOM_INSTRUCTIONS_PLACEHOLDER`]
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Text posted while waiting for the first flush
    #[serde(default = "default_ack_message")]
    pub ack_message: String,

    /// Marker appended to in-progress updates
    #[serde(default = "default_updating_suffix")]
    pub updating_suffix: String,

    /// Text shown when the completion API cannot be reached
    #[serde(default = "default_error_message")]
    pub error_message: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_openai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_openai_timeout_secs() -> u64 {
    300
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_slack_timeout_secs() -> u64 {
    30
}

fn default_update_interval_ms() -> u64 {
    3000
}

fn default_max_prompt_tokens() -> usize {
    6000
}

fn default_system_prompt() -> String {
    "You are a helpful assistant taking part in a Slack thread. \
     Each user message ends with the author's Slack mention; address people by it when useful. \
     Answer in the language of the latest message.\n\
     Custom instructions for this channel: {{custom_instructions}}"
        .to_string()
}

fn default_ack_message() -> String {
    "...".to_string()
}

fn default_updating_suffix() -> String {
    "...".to_string()
}

fn default_error_message() -> String {
    "An error occurred while calling the API. Please wait a while and try again.".to_string()
}

impl AppConfig {
    /// Load from `relay.toml` (optional) and the process environment.
    ///
    /// A `.env` file is read first when present.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::load_with_env(std::env::vars())
    }

    fn load_with_env(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("relay").required(false))
            .add_source(config::Environment::default().source(Some(env_overrides(vars))))
            .build()?;

        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without touching the environment
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, secret) in [
            ("openai_api_key", &self.openai_api_key),
            ("slack_bot_token", &self.slack_bot_token),
            ("slack_signing_secret", &self.slack_signing_secret),
        ] {
            if secret.expose_secret().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
            }
        }
        if self.update_interval_ms == 0 {
            return Err(ConfigError::Invalid("update_interval_ms must be positive".into()));
        }
        if !self.system_prompt.contains(CUSTOM_INSTRUCTIONS_PLACEHOLDER) {
            tracing::warn!(
                placeholder = CUSTOM_INSTRUCTIONS_PLACEHOLDER,
                "system prompt has no placeholder, channel directives will be ignored"
            );
        }
        Ok(())
    }

    pub fn openai_timeout(&self) -> Duration {
        Duration::from_secs(self.openai_timeout_secs)
    }

    pub fn slack_timeout(&self) -> Duration {
        Duration::from_secs(self.slack_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Orchestrator settings once the bot user id is known
    pub fn chat_config(&self, bot_user_id: impl Into<String>) -> ChatConfig {
        ChatConfig {
            bot_user_id: bot_user_id.into(),
            system_prompt: self.system_prompt.clone(),
            update_interval: Duration::from_millis(self.update_interval_ms),
            ack_message: self.ack_message.clone(),
            updating_suffix: self.updating_suffix.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

/// Keep only variables that name a known setting, keyed by field name
fn env_overrides(vars: impl IntoIterator<Item = (String, String)>) -> config::Map<String, String> {
    let mut overrides = config::Map::new();
    for (key, value) in vars {
        let key = key.to_ascii_lowercase();
        let name = match key.strip_prefix(ENV_PREFIX) {
            Some(name) => name,
            None if PREFIXED_ONLY_KEYS.contains(&key.as_str()) => continue,
            None => key.as_str(),
        };
        if ENV_KEYS.contains(&name) {
            overrides.insert(name.to_string(), value);
        }
    }
    overrides
}

/// Settings used by each chat turn
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub bot_user_id: String,
    pub system_prompt: String,
    pub update_interval: Duration,
    pub ack_message: String,
    pub updating_suffix: String,
    pub error_message: String,
}

impl ChatConfig {
    pub fn new(bot_user_id: impl Into<String>) -> Self {
        Self {
            bot_user_id: bot_user_id.into(),
            system_prompt: default_system_prompt(),
            update_interval: Duration::from_millis(default_update_interval_ms()),
            ack_message: default_ack_message(),
            updating_suffix: default_updating_suffix(),
            error_message: default_error_message(),
        }
    }

    /// System prompt with the channel directive substituted in.
    ///
    /// An empty directive renders as [`NO_CUSTOM_INSTRUCTIONS`].
    pub fn render_system_prompt(&self, directive: &str) -> String {
        let directive = if directive.is_empty() {
            NO_CUSTOM_INSTRUCTIONS
        } else {
            directive
        };
        self.system_prompt.replacen(CUSTOM_INSTRUCTIONS_PLACEHOLDER, directive, 1)
    }
}
