//! # Integration Tests for cashlock-api
//!
//! Drives the router end to end with `tower::ServiceExt::oneshot`: health
//! probes, snapshot creation, statement imports, matching jobs, the
//! exception queue, trust reports, the gated lock, certification, policies
//! and the audit chain.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use cashlock_api::AppState;
use cashlock_core::Timestamp;

const MT940: &str = ":20:STMT-0001\n:25:DE89370400440532013000\n:28C:1/1\n:60F:C260330EUR1000,00\n:61:2603310331C250,00NTRFINV-1001//B1\n:86:/NAME/Acme GmbH/REMI/Invoice INV-1001\n:61:2603310331D100,00NCHGNONREF\n:86:Account fee\n:62F:C260331EUR1150,00\n";

/// Same account, plus a 77.00 credit nobody can explain.
const MT940_STRAY: &str = ":20:STMT-0001\n:25:DE89370400440532013000\n:28C:1/1\n:60F:C260330EUR1000,00\n:61:2603310331C250,00NTRFINV-1001//B1\n:86:/NAME/Acme GmbH/REMI/Invoice INV-1001\n:61:2603310331D100,00NCHGNONREF\n:86:Account fee\n:61:2603310331C77,00NTRFNONREF//B3\n:86:/NAME/Nobody Known/REMI/misc\n:62F:C260331EUR1227,00\n";

/// Helper: app state with the clock frozen at 2026-04-01T09:00Z.
fn test_state() -> AppState {
    let state = AppState::new();
    state.freeze_clock(Timestamp::parse("2026-04-01T09:00:00Z").unwrap());
    state
}

/// Helper: read response body as string.
async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Helper: send a request and decode the JSON answer.
async fn call(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    idempotency_key: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = idempotency_key {
        builder = builder.header("idempotency-key", key);
    }
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let text = body_string(response).await;
    let value = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    (status, value)
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    call(app, "GET", uri, None, None).await
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, "POST", uri, Some(body), None).await
}

/// Poll a job until it finishes.
async fn wait_job(app: &axum::Router, job_id: &str) -> Value {
    for _ in 0..400 {
        let (status, job) = get(app, &format!("/v1/jobs/{job_id}")).await;
        assert_eq!(status, StatusCode::OK);
        if job["status"] == "completed" || job["status"] == "failed" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} did not finish");
}

async fn create_snapshot(app: &axum::Router) -> String {
    let (status, body) = post(
        app,
        "/v1/snapshots",
        json!({"name": "W13", "as_of": "2026-03-31", "base_currency": "EUR", "actor": "analyst"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

async fn import(app: &axum::Router, id: &str, content: &str) -> (StatusCode, Value) {
    post(
        app,
        &format!("/v1/snapshots/{id}/imports"),
        json!({"actor": "analyst", "format": "mt940", "entity_id": "ACME-DE", "content": content}),
    )
    .await
}

async fn load_invoice(app: &axum::Router, id: &str) {
    let (status, body) = post(
        app,
        &format!("/v1/snapshots/{id}/invoices"),
        json!({
            "actor": "analyst",
            "invoices": [{
                "id": "INV-1001",
                "entity_id": "ACME-DE",
                "document_number": "INV-1001",
                "customer": "Acme GmbH",
                "kind": "receivable",
                "amount_minor": 25000,
                "currency": "EUR",
                "base_amount_minor": 25000,
                "due_date": "2026-03-31",
                "country": "DE",
                "payment_date": null,
                "on_hold": false
            }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

async fn run_matching(app: &axum::Router, id: &str) -> Value {
    let (status, job) = post(
        app,
        &format!("/v1/snapshots/{id}/matching-runs"),
        json!({"actor": "analyst"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{job}");
    let done = wait_job(app, job["id"].as_str().unwrap()).await;
    assert_eq!(done["status"], "completed", "{done}");
    done
}

/// Snapshot with the MT940 statement and INV-1001 loaded.
async fn loaded(app: &axum::Router) -> String {
    let id = create_snapshot(app).await;
    let (status, body) = import(app, &id, MT940).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    load_invoice(app, &id).await;
    id
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let app = cashlock_api::app(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/liveness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe_without_database() {
    let app = cashlock_api::app(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/readiness")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

#[tokio::test]
async fn test_metrics_endpoint_is_prometheus_text() {
    let app = cashlock_api::app(test_state());
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_openapi_lists_snapshot_routes() {
    let app = cashlock_api::app(test_state());
    let (status, spec) = get(&app, "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(spec["paths"]["/v1/snapshots"].is_object());
    assert!(spec["paths"]["/v1/snapshots/{id}/lock"].is_object());
    assert!(spec["paths"]["/v1/certifications/{rid}/artifact"].is_object());
}

// -- Snapshots and Imports ----------------------------------------------------

#[tokio::test]
async fn test_snapshot_create_and_get() {
    let app = cashlock_api::app(test_state());
    let id = create_snapshot(&app).await;
    let (status, view) = get(&app, &format!("/v1/snapshots/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "DRAFT");
    assert_eq!(view["base_currency"], "EUR");
    assert_eq!(view["as_of"], "2026-03-31");
}

#[tokio::test]
async fn test_unknown_and_malformed_snapshot_ids_are_404() {
    let app = cashlock_api::app(test_state());
    let (status, body) = get(&app, "/v1/snapshots/550e8400-e29b-41d4-a716-446655440000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = get(&app, "/v1/snapshots/not-a-uuid").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_snapshot_without_actor_is_rejected() {
    let app = cashlock_api::app(test_state());
    let (status, body) = post(
        &app,
        "/v1/snapshots",
        json!({"name": "W13", "as_of": "2026-03-31", "base_currency": "EUR", "actor": "  "}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_import_then_byte_identical_reimport_conflicts() {
    let app = cashlock_api::app(test_state());
    let id = create_snapshot(&app).await;

    let (status, summary) = import(&app, &id, MT940).await;
    assert_eq!(status, StatusCode::CREATED, "{summary}");
    assert_eq!(summary["imported"], 2);
    assert_eq!(summary["verified"], true);

    let (status, body) = import(&app, &id, MT940).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, records) = get(&app, &format!("/v1/snapshots/{id}/imports")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(records.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreadable_statement_is_rejected() {
    let app = cashlock_api::app(test_state());
    let id = create_snapshot(&app).await;
    let (status, _) = import(&app, &id, "this is not a bank statement").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Matching, Allocations, Exceptions ---------------------------------------

#[tokio::test]
async fn test_matching_run_allocates_named_invoice() {
    let app = cashlock_api::app(test_state());
    let id = loaded(&app).await;

    let done = run_matching(&app, &id).await;
    assert_eq!(done["kind"], "matching_run");

    let (status, allocations) = get(&app, &format!("/v1/snapshots/{id}/allocations")).await;
    assert_eq!(status, StatusCode::OK);
    let allocations = allocations.as_array().unwrap();
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0]["invoice_id"], "INV-1001");
    assert_eq!(allocations[0]["amount_minor"], 25000);
}

#[tokio::test]
async fn test_idempotency_key_replays_the_same_job() {
    let app = cashlock_api::app(test_state());
    let id = loaded(&app).await;
    let uri = format!("/v1/snapshots/{id}/matching-runs");

    let (first_status, first) =
        call(&app, "POST", &uri, Some(json!({"actor": "analyst"})), Some("run-1")).await;
    assert_eq!(first_status, StatusCode::ACCEPTED);
    wait_job(&app, first["id"].as_str().unwrap()).await;

    let (again_status, again) =
        call(&app, "POST", &uri, Some(json!({"actor": "analyst"})), Some("run-1")).await;
    assert_eq!(again_status, StatusCode::OK);
    assert_eq!(again["id"], first["id"]);

    let (_, allocations) = get(&app, &format!("/v1/snapshots/{id}/allocations")).await;
    assert_eq!(allocations.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let app = cashlock_api::app(test_state());
    let (status, _) = get(&app, "/v1/jobs/550e8400-e29b-41d4-a716-446655440000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unexplained_credit_lands_in_exception_queue() {
    let app = cashlock_api::app(test_state());
    let id = create_snapshot(&app).await;
    let (status, _) = import(&app, &id, MT940_STRAY).await;
    assert_eq!(status, StatusCode::CREATED);
    load_invoice(&app, &id).await;
    run_matching(&app, &id).await;

    let (status, queue) = get(&app, &format!("/v1/snapshots/{id}/exceptions")).await;
    assert_eq!(status, StatusCode::OK);
    let queue = queue.as_array().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0]["amount_minor"], 7700);
    assert_eq!(queue[0]["status"], "NEW");
    let eid = queue[0]["id"].as_str().unwrap().to_string();

    let (status, item) = post(
        &app,
        &format!("/v1/snapshots/{id}/exceptions/{eid}/assign"),
        json!({"actor": "lead", "assignee": "maria"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{item}");
    assert_eq!(item["status"], "ASSIGNED");

    let (_, mine) = get(&app, &format!("/v1/snapshots/{id}/exceptions?assignee=maria")).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let (_, fresh) = get(&app, &format!("/v1/snapshots/{id}/exceptions?status=NEW")).await;
    assert!(fresh.as_array().unwrap().is_empty());

    let (status, _) = get(&app, &format!("/v1/snapshots/{id}/exceptions?status=bogus")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Trust Report and Lock ----------------------------------------------------

#[tokio::test]
async fn test_trust_report_flags_unexplained_cash() {
    let app = cashlock_api::app(test_state());
    let id = loaded(&app).await;

    let (status, report) = get(&app, &format!("/v1/snapshots/{id}/trust-report")).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["score_version"], "trust-score/v1");
    assert_eq!(report["lock_eligible"], false);
    let failing: Vec<&str> = report["gate_failures"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["gate"].as_str().unwrap())
        .collect();
    assert!(failing.contains(&"cash_explained_pct"));
}

#[tokio::test]
async fn test_lock_requires_role_and_acknowledgments() {
    let app = cashlock_api::app(test_state());
    let id = loaded(&app).await;

    let (status, view) = post(
        &app,
        &format!("/v1/snapshots/{id}/submit"),
        json!({"actor": "analyst"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{view}");
    assert_eq!(view["status"], "READY_FOR_REVIEW");

    let lock_uri = format!("/v1/snapshots/{id}/lock");
    let (status, body) = post(&app, &lock_uri, json!({"actor": "ana", "role": "analyst"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "LOCK_REFUSED");

    let (status, body) = post(&app, &lock_uri, json!({"actor": "cfo", "role": "cfo"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let missing = body["error"]["details"]["missing_acknowledgments"]
        .as_array()
        .unwrap();
    assert!(missing.contains(&json!("cash_explained_pct")));

    let (_, report) = get(&app, &format!("/v1/snapshots/{id}/trust-report")).await;
    let acks: Vec<Value> = report["gate_failures"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["required_acknowledgment"].clone())
        .collect();
    let (status, locked) = post(
        &app,
        &lock_uri,
        json!({
            "actor": "cfo",
            "role": "cfo",
            "override_acknowledgments": acks,
            "reason": "bank fee feed late; cleared next period"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{locked}");
    assert_eq!(locked["status"], "LOCKED_WITH_OVERRIDE");
    assert_eq!(locked["outcome"], "locked_with_override");

    let (_, view) = get(&app, &format!("/v1/snapshots/{id}")).await;
    assert_eq!(view["gate_history"].as_array().unwrap().len(), 3);

    let (status, _) = post(
        &app,
        &format!("/v1/snapshots/{id}/matching-runs"),
        json!({"actor": "analyst"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_invariant_run_is_stored_as_latest() {
    let app = cashlock_api::app(test_state());
    let id = loaded(&app).await;

    let (status, _) = get(&app, &format!("/v1/snapshots/{id}/invariant-runs/latest")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, run) = post(
        &app,
        &format!("/v1/snapshots/{id}/invariant-runs"),
        json!({"actor": "analyst"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{run}");

    let (status, latest) = get(&app, &format!("/v1/snapshots/{id}/invariant-runs/latest")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest, run);
}

// -- Certification ------------------------------------------------------------

#[tokio::test]
async fn test_certification_compare_certify_and_artifact() {
    let app = cashlock_api::app(test_state());
    let id = loaded(&app).await;

    let csv = "account_id,currency,balance,as_of\nDE89370400440532013000,EUR,1150.00,2026-03-31\n";
    let compare_uri = format!("/v1/snapshots/{id}/certifications");
    let compare_body = json!({"actor": "controller", "format": "csv", "system": "Kyriba", "content": csv});
    let (status, body) = post(&app, &compare_uri, compare_body.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT, "draft snapshot: {body}");

    let (status, view) = post(
        &app,
        &format!("/v1/snapshots/{id}/submit"),
        json!({"actor": "analyst"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{view}");
    let (status, job) = post(&app, &compare_uri, compare_body).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{job}");
    let done = wait_job(&app, job["id"].as_str().unwrap()).await;
    assert_eq!(done["status"], "completed", "{done}");
    let rid = done["result"]["report_id"].as_str().unwrap().to_string();

    let (status, view) = get(&app, &format!("/v1/certifications/{rid}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["is_certified"], false);
    assert_eq!(view["external_system"], "Kyriba");

    let (status, _) = get(&app, &format!("/v1/certifications/{rid}/artifact")).await;
    assert_eq!(status, StatusCode::OK);

    let certify_uri = format!("/v1/certifications/{rid}/certify");
    let (status, stamped) = post(&app, &certify_uri, json!({"certifier": "cfo@acme.example"})).await;
    assert_eq!(status, StatusCode::OK, "{stamped}");
    assert_eq!(stamped["is_certified"], true);

    let (status, _) = post(&app, &certify_uri, json!({"certifier": "someone-else"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_certification_needs_exactly_one_source() {
    let app = cashlock_api::app(test_state());
    let id = loaded(&app).await;
    let (status, body) = post(
        &app,
        &format!("/v1/snapshots/{id}/certifications"),
        json!({"actor": "controller", "format": "csv"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
}

// -- Policies and Audit -------------------------------------------------------

#[tokio::test]
async fn test_policy_get_put_roundtrip() {
    let app = cashlock_api::app(test_state());
    let (status, view) = get(&app, "/v1/policies/ACME-DE?currency=EUR").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["source"], "default");

    let policy = view["policy"].clone();
    let (status, updated) = call(
        &app,
        "PUT",
        "/v1/policies/ACME-DE?currency=EUR",
        Some(json!({"actor": "treasury-lead", "policy": policy})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{updated}");

    let (_, view) = get(&app, "/v1/policies/ACME-DE?currency=EUR").await;
    assert_eq!(view["source"], "scoped");
    let (_, other) = get(&app, "/v1/policies/ACME-FR").await;
    assert_eq!(other["source"], "default");
}

#[tokio::test]
async fn test_audit_chain_records_state_changes() {
    let app = cashlock_api::app(test_state());
    let id = loaded(&app).await;

    let (status, audit) = get(&app, &format!("/v1/audit?resource_id={id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audit["integrity"]["chain_valid"], true);
    assert!(audit["entries"].as_array().unwrap().len() >= 3);

    let (_, all) = get(&app, "/v1/audit").await;
    assert_eq!(all["integrity"]["broken_links"], json!([]));
}
