//! The boundary call to the hosted agent backend.
//!
//! A formatted message plus routing metadata goes to
//! `POST /chat/generate/{agentId}` with the session id in the
//! `x-session-id` header; the backend keeps per-session conversation
//! history and returns generated text. Transient failures (network, 5xx)
//! are retried a bounded number of times with a fixed delay.

use crate::context::{InteractionContext, TriggerReason};
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempts per generate call, including the first.
pub const MAX_ATTEMPTS: u32 = 3;
/// Fixed delay between attempts. No jitter.
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Per-attempt request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Webhook notification timeout.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Generated text returned by the agent backend. Ephemeral.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub text: String,
}

/// One message in the generate request body.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

/// `envOverride` map: the raw interaction context is exposed to the agent's
/// server-side processors under this exact key.
#[derive(Debug, Clone, Serialize)]
pub struct EnvOverride {
    #[serde(rename = "DISCORD_REQUEST_CONTEXT")]
    pub discord_request_context: String,
}

/// Body of `POST /chat/generate/{agentId}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub messages: Vec<WireMessage>,
    /// JSON-encoded [`RuntimeContext`], passed through as a string.
    pub runtime_context: String,
    pub env_override: EnvOverride,
}

/// Versioned routing/session metadata sent alongside every generate call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContext {
    pub version: u32,
    pub source: &'static str,
    /// Discriminator: "message" for user messages, or the lifecycle event
    /// name ("new_forum_post", "forum_post_resolved").
    pub event_type: String,
    #[serde(flatten)]
    pub context: InteractionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_url: Option<String>,
}

impl RuntimeContext {
    pub fn new(event_type: impl Into<String>, context: InteractionContext) -> Self {
        Self {
            version: 1,
            source: "discord",
            event_type: event_type.into(),
            context,
            thread_url: None,
        }
    }

    pub fn with_thread_url(mut self, url: String) -> Self {
        self.thread_url = Some(url);
        self
    }
}

/// Prefix the raw user text with a bracketed context tag so the agent knows
/// who is talking and from where. The exact prefixes are part of the wire
/// contract with the agent backend.
pub fn format_with_context(
    trigger: TriggerReason,
    author_handle: &str,
    channel_name: &str,
    content: &str,
) -> String {
    match trigger {
        TriggerReason::DirectMessage => format!("[DM from {author_handle}] {content}"),
        TriggerReason::Mention => {
            format!("[@mention in #{channel_name} | {author_handle}] {content}")
        }
        TriggerReason::WatchedChannel | TriggerReason::WatchedChannelThread => {
            format!("[#{channel_name} | {author_handle}] {content}")
        }
        TriggerReason::NewForumPost => format!("[New Forum Post | {author_handle}] {content}"),
        TriggerReason::ForumResolved => format!("[Forum Resolved | {author_handle}] {content}"),
        TriggerReason::Unknown => format!("[{author_handle}] {content}"),
    }
}

/// One attempt against the generate endpoint. The gateway owns retries; a
/// backend only knows how to make a single call.
pub trait GenerateBackend: Send + Sync {
    fn call(
        &self,
        session_id: &str,
        request: &GenerateRequest,
    ) -> impl Future<Output = Result<AgentReply, GatewayError>> + Send;
}

/// reqwest-based backend for the hosted agent API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    agent_id: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, agent_id: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            agent_id: agent_id.into(),
        })
    }
}

impl GenerateBackend for HttpBackend {
    async fn call(
        &self,
        session_id: &str,
        request: &GenerateRequest,
    ) -> Result<AgentReply, GatewayError> {
        let url = format!("{}/chat/generate/{}", self.base_url, self.agent_id);

        let response = self
            .client
            .post(&url)
            .header("x-session-id", session_id)
            .json(request)
            .send()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Client {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(GatewayError::Server {
                status: status.as_u16(),
            });
        }

        response
            .json::<AgentReply>()
            .await
            .map_err(|error| GatewayError::BadResponse(error.to_string()))
    }
}

/// Generate-with-retry wrapper around a backend.
pub struct AgentGateway<B> {
    backend: B,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<B: GenerateBackend> AgentGateway<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Send `formatted_text` to the agent under `session_id`.
    ///
    /// Transient errors are retried up to the attempt budget with a fixed
    /// delay; client (4xx) errors are returned immediately.
    pub async fn generate(
        &self,
        session_id: &str,
        formatted_text: String,
        runtime_context: RuntimeContext,
    ) -> Result<AgentReply, GatewayError> {
        let context_json = serde_json::to_string(&runtime_context.context)
            .map_err(|error| GatewayError::BadResponse(error.to_string()))?;
        let runtime_json = serde_json::to_string(&runtime_context)
            .map_err(|error| GatewayError::BadResponse(error.to_string()))?;

        let request = GenerateRequest {
            messages: vec![WireMessage {
                kind: "text",
                text: formatted_text,
            }],
            runtime_context: runtime_json,
            env_override: EnvOverride {
                discord_request_context: context_json,
            },
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backend.call(session_id, &request).await {
                Ok(reply) => return Ok(reply),
                Err(error) if error.is_transient() && attempt < self.max_attempts => {
                    tracing::info!(
                        session_id,
                        attempt,
                        remaining = self.max_attempts - attempt,
                        %error,
                        "transient agent backend error, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Notifies the agent platform's named webhooks of lifecycle events the
/// generate endpoint does not cover (e.g. member joins).
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    base_url: String,
    agent_id: String,
}

impl WebhookClient {
    pub fn new(base_url: impl Into<String>, agent_id: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            agent_id: agent_id.into(),
        })
    }

    pub async fn notify(
        &self,
        hook: &str,
        payload: &serde_json::Value,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/{}/{}", self.base_url, self.agent_id, hook);

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Client {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(GatewayError::Server {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
