//! Top-level error types for askbot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Duration string parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration: {input:?}")]
pub struct DurationError {
    pub input: String,
}

/// Agent backend call errors.
///
/// Transient variants (network failure, 5xx) are retried by the gateway;
/// client variants (4xx) are surfaced immediately.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("agent backend rejected the request ({status}): {body}")]
    Client { status: u16, body: String },

    #[error("agent backend returned {status}")]
    Server { status: u16 },

    #[error("request to agent backend failed: {0}")]
    Transport(String),

    #[error("agent backend returned an unreadable response: {0}")]
    BadResponse(String),
}

impl GatewayError {
    /// Whether the error is worth retrying. Network failures and 5xx
    /// responses are transient; 4xx and malformed bodies are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Server { .. } | GatewayError::Transport(_))
    }
}

/// Outbound message delivery errors (reply / thread creation).
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to send message to {channel_id}: {reason}")]
    Send { channel_id: String, reason: String },

    #[error("failed to create thread in {channel_id}: {reason}")]
    ThreadCreate { channel_id: String, reason: String },

    #[error("failed to fetch messages from {channel_id}: {reason}")]
    Fetch { channel_id: String, reason: String },
}

/// Rate-limit / usage-log store errors. Never block the pipeline:
/// rate limiting fails open, analytics is fire-and-forget.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}
