//! Allocation log mirror.
//!
//! Rows are only ever inserted. A reversal is a new row pointing at the
//! allocation it cancels.

use sqlx::PgPool;

use cashlock_core::SnapshotId;
use cashlock_state::AllocationEvent;

/// Insert events not yet mirrored. Already-present sequences are skipped.
pub async fn insert_events(
    pool: &PgPool,
    snapshot_id: SnapshotId,
    events: &[AllocationEvent],
) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;
    for ev in events {
        let result = sqlx::query(
            "INSERT INTO allocation_events
                (id, snapshot_id, sequence, kind, reverses, transaction_id, invoice_id,
                 amount_minor, currency, tier, approver, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (snapshot_id, sequence) DO NOTHING",
        )
        .bind(*ev.id.as_uuid())
        .bind(*snapshot_id.as_uuid())
        .bind(i64::try_from(ev.sequence).unwrap_or(i64::MAX))
        .bind(super::label(&ev.kind))
        .bind(ev.reverses.map(|r| *r.as_uuid()))
        .bind(ev.transaction_id.as_str())
        .bind(ev.invoice_id.as_str())
        .bind(ev.amount_minor)
        .bind(ev.currency.as_str())
        .bind(ev.tier.as_str())
        .bind(&ev.approver)
        .bind(*ev.timestamp.as_datetime())
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

/// Highest mirrored sequence for a snapshot, 0 when none.
pub async fn last_sequence(pool: &PgPool, snapshot_id: SnapshotId) -> Result<u64, sqlx::Error> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(sequence) FROM allocation_events WHERE snapshot_id = $1")
            .bind(*snapshot_id.as_uuid())
            .fetch_one(pool)
            .await?;
    Ok(max.map_or(0, |m| u64::try_from(m).unwrap_or(0)))
}
