//! Configuration loading and validation.

use crate::duration::parse_duration;
use crate::error::{ConfigError, Result};
use anyhow::Context as _;

/// Bot configuration, loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (SQLite database lives here).
    pub data_dir: std::path::PathBuf,

    /// Discord bot token.
    pub bot_token: String,

    /// Agent gateway settings.
    pub agent: AgentConfig,

    /// Channel watching settings.
    pub watched_channel: String,

    /// Forum tag name that marks a post resolved.
    pub resolved_tag: String,

    /// DM rate limiting settings.
    pub rate_limit: RateLimitConfig,
}

/// Agent gateway configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the agent API.
    pub api_url: String,

    /// Agent identifier, used in request paths.
    pub agent_id: String,

    /// Optional webhook base URL for lifecycle notifications.
    pub webhook_url: Option<String>,
}

/// Sliding-window rate limit configuration for DMs.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Maximum requests allowed inside one window.
    pub max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: crate::ratelimit::DEFAULT_WINDOW_MS,
            max_requests: crate::ratelimit::DEFAULT_MAX_REQUESTS,
        }
    }
}

fn required(name: &'static str) -> std::result::Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("askbot"))
            .unwrap_or_else(|| std::path::PathBuf::from("./data"));

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let bot_token = required("DISCORD_BOT_TOKEN")?;
        let agent = AgentConfig {
            api_url: required("AGENT_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            agent_id: required("AGENT_ID")?,
            webhook_url: std::env::var("AGENT_WEBHOOK_URL")
                .ok()
                .map(|url| url.trim_end_matches('/').to_string()),
        };

        let watched_channel =
            std::env::var("WATCHED_CHANNEL").unwrap_or_else(|_| "ask-help".into());
        let resolved_tag = std::env::var("RESOLVED_TAG").unwrap_or_else(|_| "Resolved".into());

        let mut rate_limit = RateLimitConfig::default();
        if let Ok(window) = std::env::var("RATE_LIMIT_WINDOW") {
            rate_limit.window_ms = parse_duration(&window).map_err(|error| ConfigError::Invalid {
                name: "RATE_LIMIT_WINDOW",
                reason: error.to_string(),
            })?;
        }
        if let Ok(max) = std::env::var("RATE_LIMIT_MAX") {
            rate_limit.max_requests = match max.parse() {
                Ok(parsed) if parsed > 0 => parsed,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "RATE_LIMIT_MAX",
                        reason: format!("expected a positive integer, got {max:?}"),
                    }
                    .into());
                }
            };
        }

        Ok(Self {
            data_dir,
            bot_token,
            agent,
            watched_channel,
            resolved_tag,
            rate_limit,
        })
    }
}
