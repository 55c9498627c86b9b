use anyhow::Context;
use secrecy::ExposeSecret;
use slack_gpt_relay::cancel::CancelRegistry;
use slack_gpt_relay::completion::{FallbackCompletion, OpenAiClient};
use slack_gpt_relay::conversation::TokenBudgeter;
use slack_gpt_relay::events::{build_router, AppState, EventHandler, SignatureVerifier};
use slack_gpt_relay::slack::{SlackClient, SlackSurface};
use slack_gpt_relay::usage::{InMemoryUsageRepository, Statistics};
use slack_gpt_relay::{AppConfig, Chat};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.as_str().into());

    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config);

    info!(
        model = %config.openai_model,
        fallback = %config.openai_fallback_model,
        "starting slack-gpt-relay"
    );

    let slack = Arc::new(SlackClient::new(
        config.slack_api_base.as_str(),
        config.slack_bot_token.clone(),
        config.slack_timeout(),
    )?);
    let bot_user_id = slack.auth_test().await.context("auth.test failed")?;
    info!(bot_user_id = %bot_user_id, "resolved bot user");

    let provider = Arc::new(OpenAiClient::new(
        config.openai_api_base.as_str(),
        config.openai_api_key.expose_secret().as_str(),
        config.openai_organization_id.clone(),
        config.openai_timeout(),
    )?);
    let completion = FallbackCompletion::new(
        provider,
        config.openai_model.as_str(),
        config.openai_fallback_model.as_str(),
    );
    let budgeter = TokenBudgeter::for_model(&config.openai_model, config.max_prompt_tokens);

    let surface = Arc::new(SlackSurface::new(slack));
    let chat = Arc::new(Chat::new(
        surface.clone(),
        surface,
        completion,
        budgeter,
        Arc::new(CancelRegistry::new()),
        config.chat_config(bot_user_id),
    ));

    let statistics = Arc::new(Statistics::new(Arc::new(InMemoryUsageRepository::new())));
    let state = AppState {
        handler: Arc::new(EventHandler::new(chat, statistics)),
        verifier: SignatureVerifier::new(config.slack_signing_secret.clone()),
    };
    let app = build_router(state, config.max_body_bytes);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "listening for Slack events");

    axum::serve(listener, app).await?;
    Ok(())
}
