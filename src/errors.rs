use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

/// Error payload returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Conflict",
    "message": "Level LEVEL_A1 is already owned",
    "timestamp": "2025-11-03T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Bad Request")
    #[schema(example = "Conflict")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Level LEVEL_A1 is already owned")]
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2025-11-03T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown level: {0}")]
    InvalidProduct(String),

    #[error("Level {0} is already owned")]
    AlreadyOwned(String),

    #[error("Payment gateway request timed out")]
    GatewayTimeout,

    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Payment gateway unreachable: {0}")]
    GatewayUnavailable(String),

    #[error("Callback signature verification failed")]
    InvalidSignature,

    #[error("No account matches the buyer email {0}")]
    UnknownUser(String),

    #[error("No pending order matches the callback: {0}")]
    NoMatchingOrder(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order is not refundable: {0}")]
    NotRefundable(String),

    #[error("Refund period has expired")]
    RefundWindowExpired,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Ledger inconsistency detected: {0}")]
    InternalInconsistency(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error")]
    InternalServerError,

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::InvalidProduct(_) | Self::RefundWindowExpired => {
                StatusCode::BAD_REQUEST
            }
            Self::AlreadyOwned(_) | Self::NotRefundable(_) => StatusCode::CONFLICT,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::GatewayRejected(_) | Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidSignature | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::UnknownUser(_) | Self::NoMatchingOrder(_) | Self::OrderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::DatabaseError(_)
            | Self::InternalInconsistency(_)
            | Self::InternalServerError
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for HTTP responses. Internal variants return generic
    /// text; the signature variant in particular must not act as an HMAC
    /// oracle for the sender.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalInconsistency(_) | Self::InternalServerError | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::InvalidSignature => "Unauthorized".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
