//! # Database Persistence Layer
//!
//! Provides Postgres persistence via SQLx.
//!
//! ## Architecture
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, every
//! state-changing call is written through after it succeeds in memory, and
//! the in-memory stores are rebuilt from the database at startup. When
//! absent, the API operates in in-memory-only mode.
//!
//! ## What is persisted
//!
//! - Snapshot documents: lifecycle, transactions, invoices, exception
//!   queue, washes, gate-check history and transition log
//! - The allocation log, mirrored row by row into an insert-only table
//! - Certification reports
//! - The audit hash chain

pub mod allocations;
pub mod audit;
pub mod certifications;
pub mod snapshots;

use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if no URL is configured (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = database_url else {
        tracing::warn!(
            "DATABASE_URL not set; running in-memory only mode. \
             State will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Serialize `value` for a JSONB column.
fn to_json<T: Serialize>(value: &T, what: &str) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value)
        .map_err(|e| sqlx::Error::Protocol(format!("failed to serialize {what}: {e}")))
}

/// The serde name of a unit enum variant, for TEXT columns.
fn label<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| format!("{value:?}"))
}
