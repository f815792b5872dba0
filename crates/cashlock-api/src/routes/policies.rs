//! # Matching Policy Routes
//!
//! Policies are scoped by entity and, optionally, currency. Reads return
//! the policy in force for the scope and where it came from.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use cashlock_core::{Currency, EntityId};
use cashlock_matching::MatchingPolicy;

use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_actor, Validate};
use crate::state::AppState;

/// Scope query.
#[derive(Debug, Default, Deserialize)]
pub struct PolicyQuery {
    pub currency: Option<String>,
}

/// Where a returned policy is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    /// Stored for exactly this scope.
    Scoped,
    /// Stored for the entity without a currency.
    Entity,
    /// The book's default.
    Default,
}

/// A policy with its scope.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyView {
    pub entity_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    pub source: PolicySource,
    pub policy: MatchingPolicy,
}

/// Request to replace a scoped policy.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PutPolicyRequest {
    pub actor: String,
    /// Omitted fields take their defaults.
    #[schema(value_type = Object)]
    pub policy: MatchingPolicy,
}

impl Validate for PutPolicyRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        self.policy.validate().map_err(|e| e.to_string())
    }
}

/// Build the policies router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/policies/{entity_id}", get(get_policy).put(put_policy))
}

fn scope(entity_id: &str, query: &PolicyQuery) -> Result<(EntityId, Option<Currency>), AppError> {
    let entity_id = entity_id.trim();
    if entity_id.is_empty() {
        return Err(AppError::Validation("entity_id must not be empty".to_string()));
    }
    let currency = match query.currency.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => Some(Currency::new(c).map_err(|e| AppError::Validation(format!("currency: {e}")))?),
        None => None,
    };
    Ok((EntityId::new(entity_id), currency))
}

fn lookup(state: &AppState, entity: EntityId, currency: Option<Currency>) -> PolicyView {
    let engine = state.engine.read();
    let book = &engine.policies;
    let (source, policy) = match book.get(&entity, currency.as_ref()) {
        Some(p) => (PolicySource::Scoped, p.clone()),
        None => match currency.as_ref().and_then(|_| book.get(&entity, None)) {
            Some(p) => (PolicySource::Entity, p.clone()),
            None => (PolicySource::Default, book.default.clone()),
        },
    };
    PolicyView {
        entity_id: entity,
        currency,
        source,
        policy,
    }
}

/// Policy JSON with floats written as strings, for the audit chain.
fn audit_form(policy: &MatchingPolicy) -> Option<Value> {
    fn walk(v: Value) -> Value {
        match v {
            Value::Number(n) if n.is_f64() => Value::String(n.to_string()),
            Value::Array(items) => Value::Array(items.into_iter().map(walk).collect()),
            Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, walk(v))).collect()),
            other => other,
        }
    }
    serde_json::to_value(policy).ok().map(walk)
}

/// GET /v1/policies/{entity_id}: Policy in force for a scope.
#[utoipa::path(
    get,
    path = "/v1/policies/{entity_id}",
    params(
        ("entity_id" = String, Path, description = "Entity ID"),
        ("currency" = Option<String>, Query, description = "Currency scope"),
    ),
    responses(
        (status = 200, description = "Policy in force"),
        (status = 422, description = "Invalid scope", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
pub async fn get_policy(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Query(query): Query<PolicyQuery>,
) -> Result<Json<PolicyView>, AppError> {
    let (entity, currency) = scope(&entity_id, &query)?;
    Ok(Json(lookup(&state, entity, currency)))
}

/// PUT /v1/policies/{entity_id}: Replace the policy for a scope.
#[utoipa::path(
    put,
    path = "/v1/policies/{entity_id}",
    params(
        ("entity_id" = String, Path, description = "Entity ID"),
        ("currency" = Option<String>, Query, description = "Currency scope"),
    ),
    request_body = PutPolicyRequest,
    responses(
        (status = 200, description = "Policy stored"),
        (status = 422, description = "Invalid policy", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
pub async fn put_policy(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Query(query): Query<PolicyQuery>,
    body: Result<Json<PutPolicyRequest>, JsonRejection>,
) -> Result<Json<PolicyView>, AppError> {
    let (entity, currency) = scope(&entity_id, &query)?;
    let req = extract_validated_json(body)?;
    let before = {
        let mut engine = state.engine.write();
        let before = engine
            .policies
            .get(&entity, currency.as_ref())
            .and_then(audit_form);
        engine
            .policies
            .set(entity.clone(), currency.clone(), req.policy.clone())?;
        before
    };
    let resource = match &currency {
        Some(c) => format!("{}:{c}", entity.as_str()),
        None => entity.as_str().to_string(),
    };
    state
        .record_audit(
            &req.actor,
            "policy.update",
            "matching_policy",
            resource,
            before,
            audit_form(&req.policy),
        )
        .await?;
    tracing::info!(entity_id = %entity.as_str(), currency = ?currency, "matching policy updated");
    Ok(Json(lookup(&state, entity, currency)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_form_has_no_floats() {
        let value = audit_form(&MatchingPolicy::default()).unwrap();
        let score = &value["suggest_min_score"];
        assert!(score.is_string(), "got {score}");
        assert!(value["amount_tolerance_minor"].is_i64());
    }

    #[test]
    fn currency_scope_is_validated() {
        let bad = PolicyQuery {
            currency: Some("EURO".into()),
        };
        assert!(matches!(scope("ACME-DE", &bad), Err(AppError::Validation(_))));
        let none = PolicyQuery { currency: Some(" ".into()) };
        let (entity, currency) = scope("ACME-DE", &none).unwrap();
        assert_eq!(entity.as_str(), "ACME-DE");
        assert!(currency.is_none());
    }

    #[test]
    fn lookup_reports_the_source() {
        let state = AppState::new();
        let entity = EntityId::new("ACME-DE");
        let eur = Currency::new("EUR").unwrap();
        assert_eq!(lookup(&state, entity.clone(), Some(eur.clone())).source, PolicySource::Default);

        let mut tight = MatchingPolicy::default();
        tight.amount_tolerance_minor = 0;
        state
            .engine
            .write()
            .policies
            .set(entity.clone(), None, tight)
            .unwrap();
        let view = lookup(&state, entity.clone(), Some(eur.clone()));
        assert_eq!(view.source, PolicySource::Entity);
        assert_eq!(view.policy.amount_tolerance_minor, 0);
        assert_eq!(lookup(&state, entity, None).source, PolicySource::Scoped);
    }
}
