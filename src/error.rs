//! Error taxonomy and the HTTP error envelope.
//!
//! Services return `ServiceError`; the HTTP boundary translates each variant
//! into `{success:false, error:{code, message, correlationId}}` with the
//! mapped status. Internal details never leak past the boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::gateway::GatewayFault;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("{message}")]
    Domain { code: &'static str, message: String },

    #[error(transparent)]
    Gateway(#[from] GatewayFault),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn domain(code: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Domain {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
            ServiceError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Domain { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Gateway(fault) => fault
                .http_status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ServiceError::Database(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> String {
        match self {
            ServiceError::Validation { code, .. } => (*code).to_string(),
            ServiceError::InvalidApiKey => "INVALID_API_KEY".to_string(),
            ServiceError::NotFound { .. } => "NOT_FOUND".to_string(),
            ServiceError::Domain { code, .. } => (*code).to_string(),
            ServiceError::Gateway(fault) => fault
                .provider_code
                .clone()
                .unwrap_or_else(|| "GATEWAY_ERROR".to_string()),
            ServiceError::Database(_) | ServiceError::Internal(_) => "INTERNAL_ERROR".to_string(),
        }
    }

    /// Message safe to surface to the caller.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Database(_) | ServiceError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Error response already bound to a correlation id, ready to serialize.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub correlation_id: String,
}

impl ApiError {
    pub fn from_service(err: ServiceError, correlation_id: &str) -> Self {
        match &err {
            ServiceError::Database(e) => {
                tracing::error!(correlation_id, error = %e, "Database error");
            }
            ServiceError::Internal(e) => {
                tracing::error!(correlation_id, error = %e, "Internal error");
            }
            ServiceError::Gateway(fault) => {
                tracing::warn!(
                    correlation_id,
                    provider_code = fault.provider_code.as_deref().unwrap_or("-"),
                    http_status = fault.http_status.unwrap_or(0),
                    "Gateway fault surfaced to caller"
                );
            }
            _ => {}
        }
        Self {
            status: err.status(),
            code: err.code(),
            message: err.public_message(),
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn new(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            correlation_id: correlation_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
                "correlationId": self.correlation_id,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let err = ServiceError::validation("INVALID_AMOUNT", "amount must be positive");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INVALID_AMOUNT");
        assert_eq!(err.public_message(), "amount must be positive");
    }

    #[test]
    fn auth_maps_to_401() {
        assert_eq!(ServiceError::InvalidApiKey.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServiceError::InvalidApiKey.code(), "INVALID_API_KEY");
    }

    #[test]
    fn gateway_fault_uses_provider_status() {
        let err = ServiceError::Gateway(GatewayFault::api(
            503,
            Some("gateway_unavailable".to_string()),
            "down".to_string(),
        ));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "gateway_unavailable");
    }

    #[test]
    fn gateway_fault_without_status_maps_to_500() {
        let err = ServiceError::Gateway(GatewayFault {
            message: "boom".to_string(),
            provider_code: None,
            http_status: None,
            cause: None,
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "GATEWAY_ERROR");
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let err = ServiceError::Internal(anyhow::anyhow!("secret connection string"));
        assert_eq!(err.public_message(), "An internal error occurred");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
