//! Error types for the gateway.
//!
//! Transport-level variants map to an HTTP status (simple requests) or to a
//! WebSocket close code (sessions). Engine failures never appear here: they
//! travel inside an `ExecutionResult` and leave the connection open.

use axum::http::StatusCode;

use super::close_code;

/// Gateway error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Wrong method, disallowed content type, unreadable body, failed CSRF check
    #[error("{0}")]
    TransportRejected(String),

    /// Body parsed but named no operation
    #[error("no operation provided: the request body must contain a non-empty `query`")]
    OperationMissing,

    /// CSRF check failed during the WebSocket handshake
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Malformed, out-of-sequence or late frame; `code` is the close code
    #[error("{reason}")]
    ProtocolViolation { code: u16, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        GatewayError::TransportRejected(reason.into())
    }

    pub fn violation(code: u16, reason: impl Into<String>) -> Self {
        GatewayError::ProtocolViolation {
            code,
            reason: reason.into(),
        }
    }

    /// HTTP status for errors surfaced on the simple-request path.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::TransportRejected(_) | GatewayError::ProtocolViolation { .. } => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::OperationMissing => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::HandshakeRejected(_) => StatusCode::FORBIDDEN,
            GatewayError::InvalidConfig(_) | GatewayError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable code placed in `errors[].extensions.code`.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::TransportRejected(_) => "BAD_REQUEST",
            GatewayError::OperationMissing => "OPERATION_MISSING",
            GatewayError::HandshakeRejected(_) => "FORBIDDEN",
            GatewayError::ProtocolViolation { .. } => "PROTOCOL_VIOLATION",
            GatewayError::InvalidConfig(_) | GatewayError::Io(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// WebSocket close code when this error ends a session.
    pub fn close_code(&self) -> u16 {
        match self {
            GatewayError::HandshakeRejected(_) => close_code::FORBIDDEN,
            GatewayError::ProtocolViolation { code, .. } => *code,
            _ => close_code::INTERNAL_ERROR,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
