//! Askbot CLI entry point.

use anyhow::Context as _;
use askbot::analytics::AnalyticsRecorder;
use askbot::discord::{Handler, SerenityTransport};
use askbot::gateway::{AgentGateway, HttpBackend, WebhookClient};
use askbot::orchestrator::Orchestrator;
use askbot::ratelimit::{RateLimiter, SqliteRateLimitStore};
use clap::Parser;
use serenity::http::Http;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "askbot")]
#[command(about = "Discord support bot that routes questions to an AI agent")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting askbot...");

    let config = Arc::new(
        askbot::config::Config::load()
            .with_context(|| "failed to load configuration from environment")?,
    );

    tracing::info!(data_dir = %config.data_dir.display(), "Configuration loaded");

    let pool = askbot::db::connect(&config.data_dir)
        .await
        .with_context(|| "failed to open the bot database")?;

    let backend = HttpBackend::new(&config.agent.api_url, &config.agent.agent_id)
        .with_context(|| "failed to build the agent HTTP client")?;
    let gateway = AgentGateway::new(backend);

    let webhook = match &config.agent.webhook_url {
        Some(url) => Some(
            WebhookClient::new(url, &config.agent.agent_id)
                .with_context(|| "failed to build the webhook client")?,
        ),
        None => None,
    };

    let limiter = RateLimiter::new(
        SqliteRateLimitStore::new(pool.clone()),
        config.rate_limit.window_ms,
        config.rate_limit.max_requests,
    );
    let recorder = Arc::new(AnalyticsRecorder::new(pool.clone()));

    let http = Arc::new(Http::new(&config.bot_token));
    let transport = Arc::new(SerenityTransport::new(http));

    let orchestrator = Arc::new(Orchestrator::new(
        config.watched_channel.clone(),
        config.resolved_tag.clone(),
        transport,
        gateway,
        webhook,
        limiter,
        recorder,
    ));

    let mut client = serenity::Client::builder(&config.bot_token, askbot::discord::intents())
        .event_handler(Handler::new(orchestrator, config.clone()))
        .await
        .with_context(|| "failed to build the Discord client")?;

    let shard_manager = client.shard_manager.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        shard_manager.shutdown_all().await;
    });

    client
        .start()
        .await
        .with_context(|| "Discord client exited with an error")?;

    pool.close().await;
    tracing::info!("Askbot stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
