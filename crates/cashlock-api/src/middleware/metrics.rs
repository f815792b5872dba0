//! # Prometheus Metrics
//!
//! HTTP-level metrics (request counts, latency) are recorded in
//! [`metrics_middleware`]. Domain events (imports, matching runs, lock
//! attempts, certifications, jobs) are recorded where they happen through
//! the helpers below. Everything goes through the `metrics` facade; the
//! Prometheus recorder installed by [`prometheus_handle`] renders it at
//! `/metrics`.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::jobs::{JobKind, JobStatus};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// The process-wide Prometheus handle, installing the recorder on first
/// use.
///
/// When another recorder is already installed the handle still renders,
/// but only what this recorder sees.
pub fn prometheus_handle() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(e) = ::metrics::set_global_recorder(recorder) {
                tracing::warn!("metrics recorder not installed: {e}");
            }
            handle
        })
        .clone()
}

/// Replace id-like path segments with `{id}` so label cardinality stays
/// bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            // Match standard UUID: 8-4-4-4-12 hex chars with hyphens
            if segment.len() == 36
                && segment.chars().enumerate().all(|(i, c)| {
                    if i == 8 || i == 13 || i == 18 || i == 23 {
                        c == '-'
                    } else {
                        c.is_ascii_hexdigit()
                    }
                })
            {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn record_request(method: String, path: String, status: u16, duration: f64) {
    ::metrics::counter!(
        "cashlock_http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!(
        "cashlock_http_request_duration_seconds",
        "method" => method,
        "path" => path
    )
    .record(duration);
    if status >= 400 {
        ::metrics::counter!("cashlock_http_errors_total", "status" => status.to_string())
            .increment(1);
    }
}

/// Middleware that records HTTP request metrics.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    record_request(
        method,
        path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// A statement import attempt.
pub fn record_import(format: &str, outcome: &'static str, transactions: usize) {
    ::metrics::counter!(
        "cashlock_statement_imports_total",
        "format" => format.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::counter!("cashlock_imported_transactions_total").increment(transactions as u64);
}

/// A committed matching run.
pub fn record_matching_run(allocations: usize, exceptions: usize, elapsed_s: f64) {
    ::metrics::counter!("cashlock_matching_runs_total").increment(1);
    ::metrics::counter!("cashlock_allocations_total", "source" => "matching")
        .increment(allocations as u64);
    ::metrics::counter!("cashlock_exceptions_opened_total").increment(exceptions as u64);
    ::metrics::histogram!("cashlock_matching_run_seconds").record(elapsed_s);
}

/// An invariant run.
pub fn record_invariant_run(passed: bool, elapsed_ms: u64) {
    let outcome = if passed { "passed" } else { "failed" };
    ::metrics::counter!("cashlock_invariant_runs_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("cashlock_invariant_run_seconds").record(elapsed_ms as f64 / 1000.0);
}

/// A lock attempt and its result.
pub fn record_lock_attempt(result: &'static str) {
    ::metrics::counter!("cashlock_lock_attempts_total", "result" => result).increment(1);
}

/// A certification comparison or certify stamp.
pub fn record_certification(event: &'static str) {
    ::metrics::counter!("cashlock_certification_events_total", "event" => event).increment(1);
}

/// A finished background job.
pub fn record_job(kind: JobKind, status: JobStatus, elapsed_s: f64) {
    let status = match status {
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Pending | JobStatus::Running => "unfinished",
    };
    ::metrics::counter!("cashlock_jobs_total", "kind" => kind.as_str(), "status" => status)
        .increment(1);
    ::metrics::histogram!("cashlock_job_seconds", "kind" => kind.as_str()).record(elapsed_s);
}
