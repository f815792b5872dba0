//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI 3.1 spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec for the entire API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cashlock API",
        version = "0.1.0",
        description = "Bank reconciliation and trust certification.\n\nImports bank statements, matches them against ledger invoices, measures how much of the cash position is explained, gates the period lock on those measurements, and certifies external cash-position exports against locked snapshots.\n\nLong operations (bulk imports, matching runs, certification comparisons) return a job to poll at `/v1/jobs/{id}`. Send an `Idempotency-Key` header to make submission safe to retry.",
        license(name = "AGPL-3.0-or-later")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    paths(
        crate::routes::snapshots::create_snapshot,
        crate::routes::snapshots::get_snapshot,
        crate::routes::ledger::load_invoices,
        crate::routes::ledger::update_fx_rates,
        crate::routes::imports::import_statement,
        crate::routes::imports::list_imports,
        crate::routes::imports::bulk_import,
        crate::routes::matching::start_matching_run,
        crate::routes::allocations::list_allocations,
        crate::routes::allocations::allocate,
        crate::routes::allocations::reverse_allocation,
        crate::routes::washes::list_washes,
        crate::routes::washes::confirm_wash,
        crate::routes::exceptions::list_exceptions,
        crate::routes::exceptions::assign_exception,
        crate::routes::exceptions::transition_exception,
        crate::routes::trust::get_trust_report,
        crate::routes::trust::start_invariant_run,
        crate::routes::trust::latest_invariant_run,
        crate::routes::lifecycle::submit,
        crate::routes::lifecycle::reopen,
        crate::routes::lifecycle::lock,
        crate::routes::certifications::start_certification,
        crate::routes::certifications::get_certification,
        crate::routes::certifications::certify,
        crate::routes::certifications::get_artifact,
        crate::routes::policies::get_policy,
        crate::routes::policies::put_policy,
        crate::routes::jobs::get_job,
        crate::routes::audit::list_audit,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::routes::snapshots::CreateSnapshotRequest,
            crate::routes::ledger::LoadInvoicesRequest,
            crate::routes::ledger::FxRatesRequest,
            crate::routes::imports::StatementUpload,
            crate::routes::imports::ImportRequest,
            crate::routes::imports::BulkImportRequest,
            crate::routes::matching::MatchingRunRequest,
            crate::routes::allocations::AllocateRequest,
            crate::routes::allocations::ReverseRequest,
            crate::routes::washes::ConfirmWashRequest,
            crate::routes::exceptions::AssignRequest,
            crate::routes::exceptions::StatusRequest,
            crate::routes::trust::InvariantRunRequest,
            crate::routes::lifecycle::ActorRequest,
            crate::routes::lifecycle::LockBody,
            crate::routes::certifications::CertificationRequest,
            crate::routes::certifications::CertifyRequest,
            crate::routes::policies::PutPolicyRequest,
        )
    ),
    tags(
        (name = "snapshots", description = "Reconciliation snapshots"),
        (name = "ledger", description = "Invoices and FX rates from the upstream ledger"),
        (name = "imports", description = "Bank statement imports (MT940, BAI2, camt.053)"),
        (name = "matching", description = "Tiered matching runs"),
        (name = "allocations", description = "Append-only allocation log"),
        (name = "washes", description = "Intercompany wash pairs"),
        (name = "exceptions", description = "Exception queue and SLA"),
        (name = "trust", description = "Trust reports and invariant runs"),
        (name = "lifecycle", description = "Review, reopen and gated lock"),
        (name = "certifications", description = "External export certification"),
        (name = "policies", description = "Matching policies by entity and currency"),
        (name = "jobs", description = "Background job status"),
        (name = "audit", description = "Hash-chained audit trail"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_documented_route_is_present() {
        let spec = ApiDoc::openapi();
        let paths = &spec.paths.paths;
        for p in [
            "/v1/snapshots",
            "/v1/snapshots/{id}/lock",
            "/v1/snapshots/{id}/matching-runs",
            "/v1/certifications/{rid}/artifact",
            "/v1/policies/{entity_id}",
            "/v1/jobs/{id}",
            "/v1/audit",
        ] {
            assert!(paths.contains_key(p), "missing {p}");
        }
        assert!(paths.len() >= 20, "got {} paths", paths.len());
    }

    #[test]
    fn spec_serializes_with_error_schema() {
        let json = serde_json::to_string(&ApiDoc::openapi()).unwrap();
        assert!(json.contains("\"openapi\""));
        assert!(json.contains("ErrorBody"));
        assert!(json.contains("Cashlock API"));
    }
}
