//! Application error model with in-band tool error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error
//! handling. Tool handlers never surface these as JSON-RPC errors; each
//! variant carries a stable `code` that is reported inside an error tool
//! result instead.

use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers every failure the mailbox driver, the composer, and the tool layer
/// can report. Variants map one-to-one onto the error codes returned to
/// clients.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (missing argument, malformed value, foreign id)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested message is absent from the selected mailbox
    #[error("not found: {0}")]
    NotFound(String),
    /// Login rejected by the mail store
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Session unusable (TCP, TLS, greeting, or closed connection)
    #[error("connection error: {0}")]
    Connection(String),
    /// A select/search/fetch/store/move/expunge command failed
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Outbound relay rejected or failed to accept the message
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// A transport-level timeout elapsed
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Unexpected failure (serialization, invariant breach)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::AuthFailed(_) => "auth_failed",
            Self::Connection(_) => "connection",
            Self::Protocol(_) => "protocol",
            Self::Delivery(_) => "delivery",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Structured payload for an in-band error tool result
    pub fn to_payload(&self) -> serde_json::Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }

    /// Prefix the message with the operation that failed
    ///
    /// Keeps the variant intact so callers still see the original category.
    pub fn context(self, operation: &str) -> Self {
        match self {
            Self::InvalidInput(m) => Self::InvalidInput(format!("{operation}: {m}")),
            Self::NotFound(m) => Self::NotFound(format!("{operation}: {m}")),
            Self::AuthFailed(m) => Self::AuthFailed(format!("{operation}: {m}")),
            Self::Connection(m) => Self::Connection(format!("{operation}: {m}")),
            Self::Protocol(m) => Self::Protocol(format!("{operation}: {m}")),
            Self::Delivery(m) => Self::Delivery(format!("{operation}: {m}")),
            Self::Timeout(m) => Self::Timeout(format!("{operation}: {m}")),
            Self::Internal(m) => Self::Internal(format!("{operation}: {m}")),
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn payload_carries_code_and_message() {
        let payload = AppError::NotFound("message 7 not found".to_owned()).to_payload();
        assert_eq!(payload["code"], "not_found");
        assert_eq!(payload["message"], "not found: message 7 not found");
    }

    #[test]
    fn context_keeps_variant() {
        let err = AppError::Protocol("NO [TRYCREATE]".to_owned()).context("move message");
        assert_eq!(err.code(), "protocol");
        assert!(err.to_string().contains("move message: NO [TRYCREATE]"));
    }
}
