//! HTTP error responses.
//!
//! Errors on the simple-request path use the GraphQL response shape so that
//! clients parse one format whatever went wrong:
//!
//! ```json
//! {"errors": [{"message": "...", "extensions": {"code": "BAD_REQUEST"}}]}
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::protocol::classify::Rejection;
use crate::protocol::error::GatewayError;

/// One entry of the `errors` array
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub extensions: ApiErrorExtensions,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorExtensions {
    pub code: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: ApiErrorExtensions { code: code.into() },
        }
    }
}

/// Error returned from HTTP handlers
#[derive(Debug)]
pub struct RestError {
    pub status: StatusCode,
    pub error: ApiError,
}

impl RestError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new("BAD_REQUEST", message),
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "errors": [self.error] }));
        (self.status, body).into_response()
    }
}

impl From<GatewayError> for RestError {
    fn from(err: GatewayError) -> Self {
        Self {
            status: err.status(),
            error: ApiError::new(err.code(), err.to_string()),
        }
    }
}

impl From<Rejection> for RestError {
    fn from(rejection: Rejection) -> Self {
        Self {
            status: rejection.status,
            error: ApiError::new("BAD_REQUEST", rejection.reason),
        }
    }
}
