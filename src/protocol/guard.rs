//! Simple-request guard.
//!
//! A browser can submit a cross-site form with a form-encoded body and no
//! preflight. Requiring a non-form content type forces the preflight, which is
//! the CSRF defence on this transport; the optional token check runs on top.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method};
use tracing::debug;

use super::csrf::{cookie_value, header_value, CsrfContext, TokenSource};
use super::error::{GatewayError, GatewayResult};
use super::gateway::Gateway;
use super::wire::{Operation, RawOperation};

/// Only POST, and GET routed here by the classifier, may reach the engine.
pub fn check_method(method: &Method) -> GatewayResult<()> {
    if method == Method::POST || method == Method::GET {
        Ok(())
    } else {
        Err(GatewayError::rejected(format!(
            "Method {method} is not accepted on this route"
        )))
    }
}

/// Media type of the request, lowercased, without parameters.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next()?.trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence.to_ascii_lowercase())
    }
}

/// The content type must be one of `allowed`.
pub fn check_content_type(headers: &HeaderMap, allowed: &[String]) -> GatewayResult<()> {
    match media_type(headers) {
        Some(media) if allowed.iter().any(|a| a.eq_ignore_ascii_case(&media)) => Ok(()),
        Some(media) => Err(GatewayError::rejected(format!(
            "Content-Type '{media}' is not accepted; send one of: {}",
            allowed.join(", ")
        ))),
        None => Err(GatewayError::rejected(format!(
            "Missing Content-Type; send one of: {}",
            allowed.join(", ")
        ))),
    }
}

/// Parse the body into an operation. Malformed JSON is a transport error;
/// a well-formed body without a query is `OperationMissing`.
pub fn parse_operation(body: &[u8]) -> GatewayResult<Operation> {
    if body.is_empty() {
        return Err(GatewayError::rejected("Request body is empty"));
    }
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::rejected(format!("Request body is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(GatewayError::rejected("Request body must be a JSON object"));
    }
    let raw: RawOperation = serde_json::from_value(value)
        .map_err(|e| GatewayError::rejected(format!("Malformed operation: {e}")))?;
    raw.into_operation()
}

/// Run every check for a simple request and return the operation to execute.
///
/// Order matters: nothing about the body is looked at until the content type
/// and CSRF checks pass. GET never carries an operation in its body, so a GET
/// that gets this far is always `OperationMissing`.
pub async fn admit(
    gateway: &Gateway,
    method: &Method,
    headers: &HeaderMap,
    body: &Bytes,
) -> GatewayResult<Operation> {
    check_method(method)?;
    check_content_type(headers, &gateway.config().http.allowed_content_types)?;

    if gateway.csrf_enabled() {
        let csrf = &gateway.config().csrf;
        let ctx = CsrfContext {
            source: TokenSource::Header,
            session_id: cookie_value(headers, &csrf.session_cookie),
            token: header_value(headers, &csrf.header_name),
            origin: header_value(headers, header::ORIGIN.as_str()),
        };
        if !gateway.csrf_decision(&ctx).await.permits() {
            debug!(origin = ?ctx.origin, "csrf_rejected_simple_request");
            return Err(GatewayError::rejected(
                "CSRF token missing or invalid for this session",
            ));
        }
    }

    if method == Method::GET {
        debug!(body_bytes = body.len(), "get_body_ignored");
        return Err(GatewayError::OperationMissing);
    }

    parse_operation(body)
}
