//! Gateway error taxonomy and its HTTP representation.
//!
//! Mirrors the code/status/type table in the gateway specification: every
//! variant here maps to exactly one `(code, status, type)` triple. Detailed
//! errors are always logged server-side; only the sanitized message crosses
//! the wire.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("no authentication provided")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("model not allowed")]
    ModelNotAllowed,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("context length exceeded")]
    ContextLengthExceeded { details: Value },

    #[error("vision content on a model that does not support it")]
    VisionNotSupported,

    #[error("budget exceeded")]
    BudgetExceeded { current: Value, budget: Value },

    #[error("no healthy endpoint for model")]
    NoHealthyEndpoint,

    #[error("backend error: {code}")]
    Backend { code: String, message: String },

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("fast store error")]
    Redis(#[from] redis::RedisError),

    #[error("invalid JSON body")]
    Json(#[from] JsonRejection),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

/// `type` discriminant for the error envelope. Spec enumerates exactly these
/// four; budget and rate-limit failures share `rate_limit_error` since both
/// are quota-style, client-retryable conditions.
enum ErrorCategory {
    InvalidRequest,
    Authentication,
    RateLimit,
    Provider,
}

impl ErrorCategory {
    fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidRequest => "invalid_request_error",
            ErrorCategory::Authentication => "authentication_error",
            ErrorCategory::RateLimit => "rate_limit_error",
            ErrorCategory::Provider => "provider_error",
        }
    }
}

impl GatewayError {
    fn code(&self) -> String {
        match self {
            GatewayError::Unauthorized(_) => "unauthorized".to_string(),
            GatewayError::Forbidden(_) => "forbidden".to_string(),
            GatewayError::BadRequest(_) => "bad_request".to_string(),
            GatewayError::NotFound(_) => "not_found".to_string(),
            GatewayError::RateLimitExceeded => "rate_limit_exceeded".to_string(),
            GatewayError::ModelNotAllowed => "model_not_allowed".to_string(),
            GatewayError::ModelNotFound(_) => "model_not_found".to_string(),
            GatewayError::ContextLengthExceeded { .. } => "context_length_exceeded".to_string(),
            GatewayError::VisionNotSupported => "vision_not_supported".to_string(),
            GatewayError::BudgetExceeded { .. } => "budget_exceeded".to_string(),
            GatewayError::NoHealthyEndpoint => "no_healthy_endpoint".to_string(),
            GatewayError::Backend { code, .. } => code.clone(),
            GatewayError::Database(_) | GatewayError::Redis(_) | GatewayError::Internal(_) => {
                "internal_error".to_string()
            }
            GatewayError::Json(_) => "invalid_json".to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::BadRequest(_) | GatewayError::Json(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ModelNotAllowed => StatusCode::FORBIDDEN,
            GatewayError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ContextLengthExceeded { .. } => StatusCode::BAD_REQUEST,
            GatewayError::VisionNotSupported => StatusCode::BAD_REQUEST,
            GatewayError::BudgetExceeded { .. } => StatusCode::FORBIDDEN,
            GatewayError::NoHealthyEndpoint => StatusCode::BAD_GATEWAY,
            GatewayError::Backend { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Database(_) | GatewayError::Redis(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Unauthorized(_) | GatewayError::Forbidden(_) => {
                ErrorCategory::Authentication
            }
            GatewayError::RateLimitExceeded | GatewayError::BudgetExceeded { .. } => {
                ErrorCategory::RateLimit
            }
            GatewayError::NoHealthyEndpoint | GatewayError::Backend { .. } => {
                ErrorCategory::Provider
            }
            GatewayError::Database(_) | GatewayError::Redis(_) | GatewayError::Internal(_) => {
                ErrorCategory::Provider
            }
            _ => ErrorCategory::InvalidRequest,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            GatewayError::ContextLengthExceeded { details } => Some(details.clone()),
            GatewayError::BudgetExceeded { current, budget } => {
                Some(json!({ "current_usage": current, "budget": budget }))
            }
            _ => None,
        }
    }

    fn safe_message(&self) -> String {
        match self {
            GatewayError::Database(e) => {
                tracing::error!(error = ?e, "primary store error");
                "a storage error occurred".to_string()
            }
            GatewayError::Redis(e) => {
                tracing::error!(error = ?e, "fast store error");
                "a storage error occurred".to_string()
            }
            GatewayError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                "an internal error occurred".to_string()
            }
            GatewayError::Backend { message, .. } => {
                crate::services::error_classifier::sanitize(message)
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let category = self.category();
        let code = self.code();
        let details = self.details();
        let message = self.safe_message();

        let mut error = json!({
            "code": code,
            "message": message,
            "type": category.as_str(),
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
