//! Gateway Route Handler
//!
//! Every method on the GraphQL path lands here. The classifier decides which
//! transport handles the request before anything is read from it.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{FromRequestParts, WebSocketUpgrade},
    http::{header, Request},
    response::{IntoResponse, Response},
    Extension, Json,
};
use tracing::{debug, info_span, Instrument};

use super::ws::{self, UpgradeContext};
use crate::protocol::classify::{classify, Transport};
use crate::protocol::csrf::{cookie_value, header_value};
use crate::protocol::error::GatewayError;
use crate::protocol::gateway::Gateway;
use crate::protocol::guard;
use crate::protocol::rest::error::RestError;
use crate::protocol::wire::SubProtocol;

/// Dispatch a request on the gateway route to the right transport.
pub async fn entry(Extension(gateway): Extension<Arc<Gateway>>, req: Request<Body>) -> Response {
    match classify(req.method(), req.headers()) {
        Transport::Rejected(rejection) => {
            debug!(method = %req.method(), reason = rejection.reason, "request_rejected");
            RestError::from(rejection).into_response()
        }
        Transport::SimplePost => simple_request(gateway, req).await,
        Transport::Upgrade(protocol) => upgrade(gateway, protocol, req).await,
    }
}

/// Queries and mutations: guard, execute, return the engine's result as-is.
async fn simple_request(gateway: Arc<Gateway>, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();
    let limit = gateway.config().http.max_body_bytes;
    let bytes = match to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, limit, "request_body_unreadable");
            let err = GatewayError::rejected(format!("Request body could not be read: {e}"));
            return RestError::from(err).into_response();
        }
    };

    let operation = match guard::admit(&gateway, &parts.method, &parts.headers, &bytes).await {
        Ok(operation) => operation,
        Err(e) => {
            debug!(error = %e, status = e.status().as_u16(), "simple_request_refused");
            return RestError::from(e).into_response();
        }
    };

    let result = gateway.adapter().execute_single(operation).await;
    Json(result).into_response()
}

/// Subscriptions: capture what the handshake needs, then switch protocols.
async fn upgrade(gateway: Arc<Gateway>, protocol: SubProtocol, req: Request<Body>) -> Response {
    let (mut parts, _body) = req.into_parts();

    let csrf = &gateway.config().csrf;
    let context = UpgradeContext {
        origin: header_value(&parts.headers, header::ORIGIN.as_str()).map(str::to_string),
        header_token: header_value(&parts.headers, &csrf.header_name).map(str::to_string),
        session_id: cookie_value(&parts.headers, &csrf.session_cookie).map(str::to_string),
    };

    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(reason = %rejection.body_text(), "ws_upgrade_rejected");
            return RestError::bad_request(rejection.body_text()).into_response();
        }
    };

    let connection_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("ws_session", connection_id = %connection_id, protocol = %protocol);
    let max_message_size = gateway.config().websocket.max_message_size;

    ws.protocols([protocol.as_str()])
        .max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| ws::run_session(socket, gateway, protocol, context).instrument(span))
}
