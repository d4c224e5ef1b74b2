//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use credit_meter_gateway::{CatalogError, GatewayError, LedgerError};
use credit_meter_store::StoreError;
use serde::Serialize;

/// Message shown for every outage; details go to the log only.
const UNAVAILABLE_MESSAGE: &str = "The service is temporarily unavailable. Please try again later.";

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the invocation is still being resolved.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// The service is unknown or deactivated.
    #[error("service not available: {0}")]
    ServiceNotAvailable(String),

    /// A dependency (catalog, ledger) is down. Nothing was charged.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The paid action failed or timed out. The charge was refunded.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Machine-readable error code, as sent in `error.code`.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::ServiceNotAvailable(_) => "service_unavailable",
            Self::Unavailable(_) => "unavailable",
            Self::ActionFailed(_) => "action_failed",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message, details) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "Not enough credits for this service".to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::ServiceNotAvailable(service_code) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "This feature is not available right now".to_string(),
                Some(serde_json::json!({ "service_code": service_code })),
            ),
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Dependency unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    UNAVAILABLE_MESSAGE.to_string(),
                    None,
                )
            }
            Self::ActionFailed(msg) => (
                StatusCode::BAD_GATEWAY,
                "The request could not be completed; no credits were charged".to_string(),
                Some(serde_json::json!({ "reason": msg })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            GatewayError::ServiceUnavailable(code) => Self::ServiceNotAvailable(code.to_string()),
            GatewayError::CatalogUnavailable(msg) | GatewayError::LedgerUnavailable(msg) => {
                Self::Unavailable(msg)
            }
            GatewayError::InvocationPending { .. } => Self::Conflict(err.to_string()),
            GatewayError::Timeout(_) | GatewayError::Action(_) => {
                Self::ActionFailed(err.to_string())
            }
            GatewayError::PreviouslyFailed { message, .. } => Self::ActionFailed(message),
            GatewayError::InvalidRequest(msg) => Self::BadRequest(msg),
            GatewayError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            LedgerError::Unavailable(msg) => Self::Unavailable(msg),
            LedgerError::NotFound { entity, id } => {
                Self::NotFound(format!("{entity} not found: {id}"))
            }
            LedgerError::InvalidRequest(msg) => Self::BadRequest(msg),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Unavailable(msg) => Self::Unavailable(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        LedgerError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn gateway_errors_map_to_statuses() {
        assert_eq!(
            status(GatewayError::InsufficientCredits {
                balance: 30,
                required: 40
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status(GatewayError::CatalogUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(GatewayError::LedgerUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(GatewayError::Timeout(Duration::from_secs(30))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(GatewayError::Action("boom".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(GatewayError::InvalidRequest("bad".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn store_not_found_is_404() {
        assert_eq!(
            status(StoreError::NotFound {
                entity: "entry",
                id: "x".into()
            }),
            StatusCode::NOT_FOUND
        );
    }
}
