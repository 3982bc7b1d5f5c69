//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the mapping
//! from core port errors to HTTP responses.

use crate::config::ConfigError;
use axum::http::StatusCode;
use scribeloop_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failed schema migration at startup.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The status code a port error surfaces as.
pub fn status_for(error: &PortError) -> StatusCode {
    match error {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Invalid(_) => StatusCode::BAD_REQUEST,
        PortError::Forbidden(_) => StatusCode::FORBIDDEN,
        PortError::Unauthorized => StatusCode::UNAUTHORIZED,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Converts a port error into the `(StatusCode, String)` rejection handlers
/// return. Unexpected errors keep their details out of the response body.
pub fn reject(error: PortError) -> (StatusCode, String) {
    let status = status_for(&error);
    let message = match error {
        PortError::NotFound(message)
        | PortError::Invalid(message)
        | PortError::Forbidden(message) => message,
        PortError::Unauthorized => "Unauthorized".to_string(),
        PortError::Unexpected(_) => "Internal server error".to_string(),
    };
    (status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_errors_map_to_statuses() {
        let cases = [
            (PortError::NotFound("Chapter not found".into()), StatusCode::NOT_FOUND),
            (PortError::Invalid("Invalid offsets".into()), StatusCode::BAD_REQUEST),
            (PortError::Forbidden("Not yours".into()), StatusCode::FORBIDDEN),
            (PortError::Unauthorized, StatusCode::UNAUTHORIZED),
            (PortError::Unexpected("pool closed".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(status_for(&error), status);
        }
    }

    #[test]
    fn test_reject_hides_unexpected_details() {
        let (status, message) = reject(PortError::Unexpected("password=hunter2".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Internal server error");

        let (status, message) = reject(PortError::Invalid("Invalid offsets".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "Invalid offsets");
    }
}
