//! Snapshot persistence operations.
//!
//! The snapshot aggregate is stored as one JSONB document per row;
//! lifecycle rules are enforced in memory, not in SQL.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use cashlock_state::Snapshot;

/// Insert or replace a snapshot document.
pub async fn upsert(pool: &PgPool, snapshot: &Snapshot) -> Result<(), sqlx::Error> {
    let document = super::to_json(snapshot, "snapshot")?;
    let updated_at = Utc::now();

    sqlx::query(
        "INSERT INTO snapshots (id, name, as_of, status, document, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (id) DO UPDATE
         SET status = EXCLUDED.status, document = EXCLUDED.document, updated_at = EXCLUDED.updated_at",
    )
    .bind(*snapshot.id().as_uuid())
    .bind(snapshot.name())
    .bind(snapshot.as_of())
    .bind(snapshot.status().as_str())
    .bind(&document)
    .bind(*snapshot.created_at().as_datetime())
    .bind(updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load all snapshots into the in-memory store on startup.
pub async fn load_all(pool: &PgPool) -> Result<Vec<Snapshot>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SnapshotRow>(
        "SELECT id, name, as_of, status, document, created_at, updated_at
         FROM snapshots ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(SnapshotRow::into_snapshot).collect())
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
#[allow(dead_code)]
struct SnapshotRow {
    id: Uuid,
    name: String,
    as_of: NaiveDate,
    status: String,
    document: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Option<Snapshot> {
        match serde_json::from_value(self.document) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::error!(id = %self.id, error = %e, "unreadable snapshot document, skipped");
                None
            }
        }
    }
}
