//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")]
    Load(String),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),
    #[error("duplicate field: {entity}.{field}")]
    DuplicateField { entity: String, field: String },
    #[error("entity {entity} must declare exactly one primary key (found {found})")]
    PrimaryKey { entity: String, found: usize },
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("validation: {0}")]
    Validation(String),
}

/// Failure raised by a storage adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("constraint violated: {0}")]
    Conflict(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("{0}")]
    Backend(String),
}

/// Payload validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown fields: {}", .0.join(", "))]
    UnknownFields(Vec<String>),
    #[error("{0} is required")]
    MissingField(String),
    #[error("{field} must be of type {expected}")]
    TypeMismatch { field: String, expected: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("unsupported operator '{operator}' on field '{field}'")]
    UnsupportedOperator { operator: String, field: String },
    #[error("invalid value for '{operator}' on field '{field}': {reason}")]
    InvalidOperatorValue {
        operator: String,
        field: String,
        reason: String,
    },
    #[error("invalid include: {0}")]
    InvalidInclude(String),
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("validation: {0}")]
    ValidationFailed(#[from] ValidationError),
    #[error("{field} already exists: {}", plain(.value))]
    DuplicateValue { field: String, value: Value },
    #[error("{field} must be unique. '{}' is already taken.", plain(.value))]
    UniqueConstraintViolation { field: String, value: Value },
    #[error("{entity} not found: {key}")]
    RecordNotFound { entity: String, key: String },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("storage: {operation} on {entity} where {predicate}: {source}")]
    Storage {
        entity: String,
        operation: &'static str,
        predicate: String,
        #[source]
        source: StoreError,
    },
    #[error("partial cascade on {entity} {key}: completed [{}], failed at '{failed}': {source}", .completed.join(", "))]
    PartialCascadeFailure {
        entity: String,
        key: String,
        completed: Vec<String>,
        failed: String,
        #[source]
        source: Box<AppError>,
    },
}

/// Strings without JSON quotes, anything else as JSON.
fn plain(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl AppError {
    pub fn storage(
        entity: &str,
        operation: &'static str,
        predicate: impl ToString,
        source: StoreError,
    ) -> Self {
        AppError::Storage {
            entity: entity.to_string(),
            operation,
            predicate: predicate.to_string(),
            source,
        }
    }

    /// Status classification of the failure.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidFilter(_)
            | AppError::UnsupportedOperator { .. }
            | AppError::InvalidOperatorValue { .. }
            | AppError::InvalidInclude(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownEntity(_) | AppError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DuplicateValue { .. } | AppError::UniqueConstraintViolation { .. } => {
                StatusCode::CONFLICT
            }
            AppError::Storage { source, .. } => match source {
                StoreError::Conflict(_) => StatusCode::CONFLICT,
                StoreError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::PartialCascadeFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::InvalidFilter(_) => "invalid_filter",
            AppError::UnsupportedOperator { .. } => "unsupported_operator",
            AppError::InvalidOperatorValue { .. } => "invalid_operator_value",
            AppError::InvalidInclude(_) => "invalid_include",
            AppError::UnknownEntity(_) => "unknown_entity",
            AppError::ValidationFailed(_) => "validation_error",
            AppError::DuplicateValue { .. } => "duplicate_value",
            AppError::UniqueConstraintViolation { .. } => "unique_constraint_violation",
            AppError::RecordNotFound { .. } => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Storage { .. } => "storage_error",
            AppError::PartialCascadeFailure { .. } => "partial_cascade_failure",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::ValidationFailed(ValidationError::UnknownFields(fields)) => {
                Some(serde_json::json!({ "fields": fields }))
            }
            AppError::ValidationFailed(ValidationError::TypeMismatch { field, expected }) => {
                Some(serde_json::json!({ "field": field, "expected": expected }))
            }
            AppError::DuplicateValue { field, value }
            | AppError::UniqueConstraintViolation { field, value } => {
                Some(serde_json::json!({ "field": field, "value": value }))
            }
            AppError::PartialCascadeFailure {
                completed, failed, ..
            } => Some(serde_json::json!({ "completed": completed, "failed": failed })),
            _ => None,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_failures() {
        let dup = AppError::DuplicateValue {
            field: "email".into(),
            value: Value::String("a@b.c".into()),
        };
        assert_eq!(dup.status(), StatusCode::CONFLICT);
        assert_eq!(dup.code(), "duplicate_value");

        let missing = AppError::from(ValidationError::MissingField("title".into()));
        assert_eq!(missing.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(missing.to_string(), "validation: title is required");

        let storage = AppError::storage("Book", "update", "id = 1", StoreError::Backend("down".into()));
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(storage.to_string().contains("update on Book where id = 1"));
    }

    #[test]
    fn unknown_fields_are_listed_together() {
        let err = ValidationError::UnknownFields(vec!["foo".into(), "bar".into()]);
        assert_eq!(err.to_string(), "unknown fields: foo, bar");
    }
}
