//! Audit chain persistence operations.
//!
//! Entries are insert-only; the chain is re-verified after loading.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use cashlock_state::{AuditEntry, AuditTrail};

/// Append one entry.
pub async fn insert(pool: &PgPool, entry: &AuditEntry) -> Result<(), sqlx::Error> {
    let document = super::to_json(entry, "audit entry")?;

    sqlx::query(
        "INSERT INTO audit_entries
            (sequence, actor, action, resource_type, resource_id, entry, previous_hash, entry_hash, recorded_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(i64::try_from(entry.sequence).unwrap_or(i64::MAX))
    .bind(&entry.record.actor)
    .bind(&entry.record.action)
    .bind(&entry.record.resource_type)
    .bind(&entry.record.resource_id)
    .bind(&document)
    .bind(&entry.previous_hash)
    .bind(&entry.entry_hash)
    .bind(*entry.timestamp.as_datetime())
    .execute(pool)
    .await?;

    Ok(())
}

/// Rebuild the trail from stored entries.
pub async fn load_trail(pool: &PgPool) -> Result<AuditTrail, sqlx::Error> {
    let rows = sqlx::query_as::<_, AuditRow>(
        "SELECT sequence, entry, recorded_at FROM audit_entries ORDER BY sequence",
    )
    .fetch_all(pool)
    .await?;
    let entries: Vec<serde_json::Value> = rows.into_iter().map(|r| r.entry).collect();
    let trail: AuditTrail = serde_json::from_value(serde_json::Value::Array(entries))
        .map_err(|e| sqlx::Error::Protocol(format!("unreadable audit chain: {e}")))?;

    let integrity = trail.verify();
    if integrity.chain_valid {
        tracing::info!(entries = integrity.total_entries, "audit chain loaded and verified");
    } else {
        tracing::error!(
            entries = integrity.total_entries,
            broken_links = ?integrity.broken_links,
            "audit chain loaded with broken links"
        );
    }
    Ok(trail)
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
#[allow(dead_code)]
struct AuditRow {
    sequence: i64,
    entry: serde_json::Value,
    recorded_at: DateTime<Utc>,
}
