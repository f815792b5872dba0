//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for request DTOs, a helper to extract
//! and validate JSON bodies in handlers, and path-id parsing.

use axum::extract::rejection::JsonRejection;
use axum::Json;
use uuid::Uuid;

use crate::error::AppError;

/// Trait for request types that can validate their business rules
/// beyond what serde deserialization checks.
pub trait Validate {
    /// Validate business rules. Returns an error message on failure.
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// Parse a UUID path segment. A malformed id cannot name anything, so it
/// is reported as not found.
pub fn parse_id<T>(kind: &str, raw: &str, wrap: impl FnOnce(Uuid) -> T) -> Result<T, AppError> {
    Uuid::parse_str(raw.trim())
        .map(wrap)
        .map_err(|_| AppError::NotFound(format!("{kind} {raw} not found")))
}

/// Reject an empty actor name.
pub fn require_actor(actor: &str) -> Result<(), String> {
    if actor.trim().is_empty() {
        return Err("actor must not be empty".to_string());
    }
    if actor.len() > 255 {
        return Err("actor must not exceed 255 characters".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashlock_core::SnapshotId;

    #[test]
    fn malformed_id_is_not_found() {
        let err = parse_id("snapshot", "not-a-uuid", SnapshotId::from_uuid).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let id = SnapshotId::new();
        assert_eq!(
            parse_id("snapshot", &id.to_string(), SnapshotId::from_uuid).unwrap(),
            id
        );
    }

    #[test]
    fn actor_rules() {
        assert!(require_actor("  ").is_err());
        assert!(require_actor(&"a".repeat(256)).is_err());
        assert!(require_actor("maria").is_ok());
    }
}
