//! Sliding-window rate limiting for direct messages.
//!
//! Timestamps are persisted per user so limits survive restarts. The
//! read-modify-write is not atomic across concurrent messages from the same
//! user; the window is an abuse deterrent, not a hard quota, so one extra
//! admitted message per window is acceptable.

use crate::error::StoreError;
use sqlx::{Row as _, SqlitePool};

/// Messages allowed per window.
pub const DEFAULT_MAX_REQUESTS: usize = 5;
/// Window length in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Per-user storage for rate-limit timestamps (epoch milliseconds,
/// chronological order).
pub trait RateLimitStore: Send + Sync {
    fn load(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<i64>, StoreError>> + Send;

    fn save(
        &self,
        user_id: &str,
        timestamps: &[i64],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// SQLite-backed store: one row per user, timestamps as a JSON array.
#[derive(Debug, Clone)]
pub struct SqliteRateLimitStore {
    pool: SqlitePool,
}

impl SqliteRateLimitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl RateLimitStore for SqliteRateLimitStore {
    async fn load(&self, user_id: &str) -> Result<Vec<i64>, StoreError> {
        let row = sqlx::query("SELECT timestamps FROM rate_limits WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };

        let raw: String = row.try_get("timestamps")?;
        serde_json::from_str(&raw).map_err(|error| StoreError::Corrupt(error.to_string()))
    }

    async fn save(&self, user_id: &str, timestamps: &[i64]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(timestamps)
            .map_err(|error| StoreError::Corrupt(error.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO rate_limits (user_id, timestamps, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(user_id) DO UPDATE SET
                timestamps = excluded.timestamps,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(user_id)
        .bind(raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Blocked { retry_after_secs: u64 },
}

/// Sliding-window limiter keyed by user id.
pub struct RateLimiter<S> {
    store: S,
    window_ms: u64,
    max_requests: usize,
}

impl<S: RateLimitStore> RateLimiter<S> {
    pub fn new(store: S, window_ms: u64, max_requests: usize) -> Self {
        Self {
            store,
            window_ms,
            max_requests,
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Check (and record) one request from `user_id` at `now_ms`.
    ///
    /// Expired timestamps are pruned before the count check. Store failures
    /// fail open: availability wins over strict enforcement for an advisory
    /// control.
    pub async fn check(&self, user_id: &str, now_ms: i64) -> RateLimitDecision {
        let stored = match self.store.load(user_id).await {
            Ok(stored) => stored,
            Err(error) => {
                tracing::warn!(user_id, %error, "rate-limit store read failed, allowing");
                return RateLimitDecision::Allowed;
            }
        };

        let mut timestamps: Vec<i64> = stored
            .into_iter()
            .filter(|ts| now_ms - ts < self.window_ms as i64)
            .collect();

        if timestamps.len() >= self.max_requests {
            // With a zero cap the list is empty; the full window applies.
            let remaining_ms = match timestamps.first() {
                Some(oldest) => (self.window_ms as i64 - (now_ms - oldest)).max(0) as u64,
                None => self.window_ms,
            };
            let retry_after_secs = remaining_ms.div_ceil(1000);
            return RateLimitDecision::Blocked { retry_after_secs };
        }

        timestamps.push(now_ms);
        if let Err(error) = self.store.save(user_id, &timestamps).await {
            tracing::warn!(user_id, %error, "rate-limit store write failed, allowing");
        }

        RateLimitDecision::Allowed
    }
}
