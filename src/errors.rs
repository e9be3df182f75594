use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned to API callers.
///
/// `kind` is a stable machine-readable discriminator; `message` is for humans.
/// Internal failure detail never appears here.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error kind, e.g. "out_of_stock"
    pub kind: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
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

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Cart has already been checked out")]
    CartAlreadyCheckedOut,

    #[error("Unknown variant: {0}")]
    UnknownVariant(Uuid),

    #[error("Variant unavailable: {0}")]
    VariantUnavailable(Uuid),

    #[error("Out of stock: {0}")]
    OutOfStock(String),

    #[error("Price mismatch: server computed {expected}, client declared {declared}")]
    PriceMismatch { expected: Decimal, declared: Decimal },

    #[error("Gateway error: {0}")]
    GatewayError(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

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
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::UnknownVariant(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidInput(_) | Self::EmptyCart => {
                StatusCode::BAD_REQUEST
            }
            Self::CartAlreadyCheckedOut
            | Self::OutOfStock(_)
            | Self::VariantUnavailable(_)
            | Self::InvalidTransition(_)
            | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::PriceMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error kind for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidInput(_) => "invalid_input",
            Self::EmptyCart => "empty_cart",
            Self::CartAlreadyCheckedOut => "cart_already_checked_out",
            Self::UnknownVariant(_) => "unknown_variant",
            Self::VariantUnavailable(_) => "variant_unavailable",
            Self::OutOfStock(_) => "out_of_stock",
            Self::PriceMismatch { .. } => "price_mismatch",
            Self::GatewayError(_) => "gateway_error",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::EventError(_) => "event_error",
            Self::InternalError(_) => "internal_error",
            Self::Other(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::GatewayError(_) => "Payment gateway error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            // User-facing errors carry their actual message
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            kind: self.kind().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn user_facing_errors_keep_their_message() {
        let err = ServiceError::OutOfStock("variant 123".to_string());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.response_message().contains("variant 123"));
    }

    #[test]
    fn internal_errors_are_masked() {
        let err = ServiceError::InternalError("connection pool exhausted".to_string());
        assert_eq!(err.response_message(), "Internal server error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn price_mismatch_maps_to_unprocessable_entity() {
        let err = ServiceError::PriceMismatch {
            expected: dec!(35.00),
            declared: dec!(30.00),
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.kind(), "price_mismatch");
        assert!(err.response_message().contains("35.00"));
    }
}
