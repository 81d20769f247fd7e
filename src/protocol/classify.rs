//! Transport classification.
//!
//! Decides from the method and headers alone whether a request on the gateway
//! route is a WebSocket upgrade, a simple request, or something to refuse.
//! No body is read and no socket is touched.

use axum::http::{header, HeaderMap, Method, StatusCode};

use super::wire::SubProtocol;

/// Why a request was refused before reaching any handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub reason: &'static str,
}

impl Rejection {
    const fn bad_request(reason: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            reason,
        }
    }
}

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Upgrade(SubProtocol),
    SimplePost,
    Rejected(Rejection),
}

/// Classify a request on the gateway route.
///
/// - WebSocket upgrade headers with a supported sub-protocol: `Upgrade`, whatever the method
/// - upgrade headers with no supported sub-protocol: rejected
/// - `POST`: `SimplePost`
/// - `GET` carrying a content type and a non-empty body: `SimplePost`, so it goes
///   through the guard and fails there for lack of an operation
/// - anything else: rejected with 400
pub fn classify(method: &Method, headers: &HeaderMap) -> Transport {
    if is_websocket_upgrade(headers) {
        let offered = headers
            .get_all(header::SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|v| v.to_str().ok());
        return match SubProtocol::negotiate(offered) {
            Some(protocol) => Transport::Upgrade(protocol),
            None => Transport::Rejected(Rejection::bad_request(
                "WebSocket upgrade requires the graphql-transport-ws or graphql-ws sub-protocol",
            )),
        };
    }

    if method == Method::POST || (method == Method::GET && carries_body(headers)) {
        return Transport::SimplePost;
    }

    Transport::Rejected(Rejection::bad_request(
        "Queries and mutations must be sent as POST requests; subscriptions over WebSocket",
    ))
}

/// `Connection` lists `upgrade` and `Upgrade` names `websocket` (both case-insensitive).
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let upgrade_websocket = headers
        .get_all(header::UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("websocket"));
    connection_upgrade && upgrade_websocket
}

fn carries_body(headers: &HeaderMap) -> bool {
    if !headers.contains_key(header::CONTENT_TYPE) {
        return false;
    }
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0);
    declared_length || headers.contains_key(header::TRANSFER_ENCODING)
}
