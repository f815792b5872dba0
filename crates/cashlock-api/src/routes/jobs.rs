//! # Job Routes

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use crate::error::AppError;
use crate::extractors::parse_id;
use crate::jobs::Job;
use crate::state::AppState;

/// Build the jobs router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/jobs/{id}", get(get_job))
}

/// GET /v1/jobs/{id}: Job status and, once finished, its result or error.
#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job found"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, AppError> {
    let id = parse_id("job", &id, |u: Uuid| u)?;
    state
        .jobs
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("job {id} not found")))
}
