//! Best-effort usage analytics.
//!
//! Every forwarded interaction is recorded with its context, message
//! characteristics, and any detected topics. Recording is fire-and-forget:
//! the orchestrator spawns it and moves on, and nothing in here errors
//! outward.

use crate::context::InteractionContext;
use crate::error::StoreError;
use regex::Regex;
use sqlx::SqlitePool;
use std::sync::LazyLock;

/// Topic keyword patterns matched against message text. Ordered so the
/// detected-topics list is stable.
static TOPIC_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("tools", r"(?i)\b(tool|tools)\b"),
        ("skills", r"(?i)\b(skill|skills)\b"),
        ("webhooks", r"(?i)\b(webhook|webhooks)\b"),
        ("jobs", r"(?i)\b(job|jobs|cron|schedule|reminder)\b"),
        ("search", r"(?i)\b(vector|search|collection)\b"),
        ("profile", r"(?i)\b(profile|account)\b"),
        ("deploy", r"(?i)\b(deploy|push|compile)\b"),
        ("errors", r"(?i)\b(error|bug|issue|broken|not working)\b"),
    ]
    .into_iter()
    .map(|(topic, pattern)| {
        (
            topic,
            Regex::new(pattern).expect("topic pattern should compile"),
        )
    })
    .collect()
});

/// Detect which known topics a message mentions.
pub fn detect_topics(text: &str) -> Vec<&'static str> {
    TOPIC_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(topic, _)| *topic)
        .collect()
}

/// Writes usage rows to the `usage_log` table.
pub struct AnalyticsRecorder {
    pool: SqlitePool,
}

impl AnalyticsRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one interaction. Never errors outward; failures are logged.
    pub async fn record(&self, ctx: &InteractionContext, message_text: &str) {
        if let Err(error) = self.try_record(ctx, message_text).await {
            tracing::warn!(%error, author_id = %ctx.author_id, "failed to record usage");
        }
    }

    async fn try_record(
        &self,
        ctx: &InteractionContext,
        message_text: &str,
    ) -> Result<(), StoreError> {
        let topics = detect_topics(message_text);
        let topics_json = serde_json::to_string(&topics)
            .map_err(|error| StoreError::Corrupt(error.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO usage_log (
                id, recorded_at, channel_id, channel_name, guild_id,
                author_id, author_handle, trigger, is_thread,
                message_len, has_question, has_code_block, topics
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(chrono::Utc::now())
        .bind(&ctx.channel_id)
        .bind(&ctx.channel_name)
        .bind(&ctx.guild_id)
        .bind(&ctx.author_id)
        .bind(&ctx.author_handle)
        .bind(ctx.trigger.as_str())
        .bind(ctx.is_thread)
        .bind(message_text.len() as i64)
        .bind(message_text.contains('?'))
        .bind(message_text.contains("```"))
        .bind(topics_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
