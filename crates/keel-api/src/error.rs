//! API error types and JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keel_core::workflow::WorkflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use utoipa::ToSchema;

/// API error type. Every route handler returns `Result<_, ApiError>`;
/// the `IntoResponse` impl turns it into the JSON error body.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (invalid input).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unauthorized (missing or invalid authentication).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Forbidden (authenticated but not allowed).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflict (duplicate resource, state conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Validation error with field-level details.
    #[error("Validation failed")]
    ValidationError(ValidationErrorDetails),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Upstream connector failure.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Service unavailable (e.g., SSO not configured).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid login credentials.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Session expired or invalid.
    #[error("Session expired")]
    SessionExpired,

    /// Account is disabled.
    #[error("Account disabled")]
    AccountDisabled,
}

/// Details for field-level validation errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetails {
    /// Overall validation error message.
    pub message: String,
    /// Field-specific errors.
    pub fields: HashMap<String, Vec<FieldError>>,
}

/// A single field validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    /// Error code (e.g., "required", "length", "range").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ValidationErrorDetails {
    /// Creates a validation error for a single field.
    pub fn field(field: &str, code: &str, message: &str) -> Self {
        let mut fields = HashMap::new();
        fields.insert(
            field.to_string(),
            vec![FieldError {
                code: code.to_string(),
                message: message.to_string(),
            }],
        );
        Self {
            message: format!("Validation failed for field '{}'", field),
            fields,
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Request ID for tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::SessionExpired => StatusCode::UNAUTHORIZED,
            ApiError::AccountDisabled => StatusCode::FORBIDDEN,
        }
    }

    /// Creates a validation error for a single field.
    pub fn validation_field(field: &str, code: &str, message: &str) -> Self {
        ApiError::ValidationError(ValidationErrorDetails::field(field, code, message))
    }

    /// Returns the machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::SessionExpired => "SESSION_EXPIRED",
            ApiError::AccountDisabled => "ACCOUNT_DISABLED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (message, details) = match &self {
            ApiError::ValidationError(details) => (
                details.message.clone(),
                Some(serde_json::to_value(&details.fields).unwrap_or_default()),
            ),
            _ => (self.to_string(), None),
        };

        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message,
            details,
            request_id: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<keel_core::db::DbError> for ApiError {
    fn from(err: keel_core::db::DbError) -> Self {
        match err {
            keel_core::db::DbError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{} with id {} not found", entity, id))
            }
            keel_core::db::DbError::Constraint(msg) => ApiError::Conflict(msg),
            keel_core::db::DbError::Serialization(msg) => ApiError::BadRequest(msg),
            err => ApiError::Database(err.to_string()),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::InvalidStepTransition { .. }
            | WorkflowError::InvalidInstanceTransition { .. }
            | WorkflowError::StepsRemaining(_)
            | WorkflowError::InstanceNotActive(_) => ApiError::Conflict(err.to_string()),
            WorkflowError::MissingBlockReason | WorkflowError::EmptyTemplate => {
                ApiError::BadRequest(err.to_string())
            }
            WorkflowError::Unauthorized { .. } => ApiError::Forbidden(err.to_string()),
            WorkflowError::StepNotFound(id) => {
                ApiError::NotFound(format!("Step {} not found", id))
            }
        }
    }
}

impl From<keel_core::orgchart::OrgChartError> for ApiError {
    fn from(err: keel_core::orgchart::OrgChartError) -> Self {
        match err {
            keel_core::orgchart::OrgChartError::Cycle(_) => ApiError::Conflict(err.to_string()),
            keel_core::orgchart::OrgChartError::PersonNotFound(id) => {
                ApiError::NotFound(format!("Person {} not found", id))
            }
        }
    }
}

impl From<keel_connectors::ConnectorError> for ApiError {
    fn from(err: keel_connectors::ConnectorError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut fields: HashMap<String, Vec<FieldError>> = HashMap::new();

        for (field_name, field_errors) in err.field_errors() {
            let errors: Vec<FieldError> = field_errors
                .iter()
                .map(|e| {
                    let code = e.code.to_string();
                    let message = e.message.clone().map(|m| m.to_string()).unwrap_or_else(|| {
                        format!("Field '{}' failed validation: {}", field_name, code)
                    });
                    FieldError { code, message }
                })
                .collect();
            fields.insert(field_name.to_string(), errors);
        }

        let field_count = fields.len();
        let message = if field_count == 1 {
            let field = fields.keys().next().map(String::as_str).unwrap_or("");
            format!("Validation failed for field '{}'", field)
        } else {
            format!("Validation failed for {} fields", field_count)
        };

        ApiError::ValidationError(ValidationErrorDetails { message, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::workflow::{InstanceStatus, StepStatus};

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::ValidationError(ValidationErrorDetails::field("a", "required", "missing"))
                .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_db_error_mapping() {
        let err: ApiError = keel_core::db::DbError::Constraint("duplicate tag".into()).into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = keel_core::db::DbError::not_found("Asset", "x").into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_workflow_error_mapping() {
        let err: ApiError = WorkflowError::InvalidStepTransition {
            from: StepStatus::Pending,
            to: StepStatus::Completed,
        }
        .into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = WorkflowError::InstanceNotActive(InstanceStatus::Pending).into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = WorkflowError::MissingBlockReason.into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
