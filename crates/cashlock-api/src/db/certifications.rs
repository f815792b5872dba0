//! Certification report persistence operations.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use cashlock_certify::CertificationReport;

/// Insert or replace a report. Stamps only ever get added.
pub async fn upsert(pool: &PgPool, report: &CertificationReport) -> Result<(), sqlx::Error> {
    let document = super::to_json(report, "certification report")?;

    sqlx::query(
        "INSERT INTO certification_reports
            (id, snapshot_id, score, certified_by, supersedes, document, generated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (id) DO UPDATE
         SET certified_by = EXCLUDED.certified_by, document = EXCLUDED.document",
    )
    .bind(*report.report_id.as_uuid())
    .bind(*report.snapshot_id.as_uuid())
    .bind(report.score.to_string())
    .bind(report.certification.as_ref().map(|c| c.certifier.clone()))
    .bind(report.supersedes.map(|s| *s.as_uuid()))
    .bind(&document)
    .bind(*report.generated_at.as_datetime())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load all reports, oldest first, for the in-memory ledger.
pub async fn load_all(pool: &PgPool) -> Result<Vec<CertificationReport>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ReportRow>(
        "SELECT id, document, generated_at FROM certification_reports ORDER BY generated_at, id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row.document) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(id = %row.id, error = %e, "unreadable certification report, skipped");
                None
            }
        })
        .collect())
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
#[allow(dead_code)]
struct ReportRow {
    id: Uuid,
    document: serde_json::Value,
    generated_at: DateTime<Utc>,
}
