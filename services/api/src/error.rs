//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and how core
//! errors are turned into HTTP rejections.

use crate::config::ConfigError;
use axum::http::StatusCode;
use school_sync_core::ports::PortError;
use tracing::{error, warn};

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

    /// Represents an error related to the WebSocket connection.
    #[error("WebSocket Error: {0}")]
    Websocket(#[from] axum::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The rejection type every handler returns.
pub type Rejection = (StatusCode, String);

/// Logs a port failure and maps it to a status code and a user-facing message.
///
/// Unexpected failures are reported with a generic message; the details only go to the log.
pub fn reject(action: &str, e: PortError) -> Rejection {
    match e {
        PortError::NotFound(what) => {
            warn!("Failed to {}: {}", action, what);
            (StatusCode::NOT_FOUND, what)
        }
        PortError::Conflict(what) => {
            warn!("Failed to {}: {} already exists", action, what);
            (StatusCode::CONFLICT, format!("{} already exists", what))
        }
        PortError::Invalid(reason) => (StatusCode::BAD_REQUEST, reason),
        PortError::Unauthorized => {
            warn!("Refused to {}: not allowed", action);
            (StatusCode::FORBIDDEN, "Not allowed".to_string())
        }
        PortError::Unexpected(details) => {
            error!("Failed to {}: {}", action, details);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to {}", action),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_errors_map_to_status_codes() {
        let cases = [
            (PortError::NotFound("Class".into()), StatusCode::NOT_FOUND),
            (PortError::Conflict("class".into()), StatusCode::CONFLICT),
            (PortError::Invalid("empty".into()), StatusCode::BAD_REQUEST),
            (PortError::Unauthorized, StatusCode::FORBIDDEN),
            (PortError::Unexpected("db down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(reject("test", error).0, expected);
        }
    }

    #[test]
    fn test_unexpected_details_are_not_leaked() {
        let (_, message) = reject("send message", PortError::Unexpected("password=hunter2".into()));
        assert_eq!(message, "Failed to send message");
    }
}
