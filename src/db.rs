//! SQLite pool setup and schema bootstrap.

use crate::error::Result;
use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

/// Open (creating if needed) the bot's SQLite database and ensure the
/// rate-limit and usage-log tables exist.
pub async fn connect(data_dir: &Path) -> Result<SqlitePool> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let options = SqliteConnectOptions::new()
        .filename(data_dir.join("askbot.db"))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create the tables used by the rate limiter and the analytics recorder.
/// Also used by tests against `sqlite::memory:`.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rate_limits (
            user_id TEXT PRIMARY KEY,
            timestamps TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_log (
            id TEXT PRIMARY KEY,
            recorded_at TIMESTAMP NOT NULL,
            channel_id TEXT NOT NULL,
            channel_name TEXT NOT NULL,
            guild_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            author_handle TEXT NOT NULL,
            trigger TEXT NOT NULL,
            is_thread INTEGER NOT NULL,
            message_len INTEGER NOT NULL,
            has_question INTEGER NOT NULL,
            has_code_block INTEGER NOT NULL,
            topics TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
