//! WebSocket Session Driver
//!
//! Runs one upgraded connection through the session state machine. Speaks
//! both `graphql-transport-ws` and the legacy `graphql-ws` sub-protocol; the
//! differences are confined to result frame naming and keepalive.
//!
//! ## Frames
//!
//! **Client → Server:**
//! - `{"type": "connection_init", "payload": {"csrfToken": "..."}}`
//! - `{"type": "start" | "subscribe", "id": "1", "payload": {"query": "subscription { ... }"}}`
//! - `{"type": "stop" | "complete", "id": "1"}`
//! - `{"type": "ping"}`, `{"type": "pong"}`
//! - `{"type": "connection_terminate"}`
//!
//! **Server → Client:**
//! - `{"type": "connection_ack"}`
//! - `{"type": "connection_error", "payload": {"message": "..."}}`
//! - `{"type": "next" | "data", "id": "1", "payload": {"data": {...}}}`
//! - `{"type": "error", "id": "1", "payload": [{"message": "..."}]}`
//! - `{"type": "complete", "id": "1"}`
//! - `{"type": "pong"}`, `{"type": "ka"}`
//!
//! All outbound frames go through one writer task, so `connection_ack` is
//! always written before the first result, and the close frame is always last.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::protocol::close_code;
use crate::protocol::csrf::{CsrfContext, TokenSource};
use crate::protocol::engine::SubscriptionEvent;
use crate::protocol::error::GatewayError;
use crate::protocol::gateway::Gateway;
use crate::protocol::state::{SessionEvent, SessionState};
use crate::protocol::wire::{
    ClientMessage, Decoded, ErrorPayload, GraphQlError, RawOperation, ServerMessage, SubProtocol,
};

/// Close reasons are limited to 123 bytes by RFC 6455.
const MAX_CLOSE_REASON: usize = 123;

/// How long teardown waits for the writer to flush the close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Request details captured before the upgrade, consulted at `connection_init`.
#[derive(Debug, Clone, Default)]
pub struct UpgradeContext {
    pub origin: Option<String>,
    /// CSRF token from the upgrade request header
    pub header_token: Option<String>,
    /// Session id from the upgrade request cookie
    pub session_id: Option<String>,
}

enum Outbound {
    Frame(ServerMessage),
    Close { code: u16, reason: String },
}

struct ActiveSubscription {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Session {
    gateway: Arc<Gateway>,
    protocol: SubProtocol,
    upgrade: UpgradeContext,
    state: SessionState,
    out: mpsc::Sender<Outbound>,
    events: mpsc::Sender<SubscriptionEvent>,
    subscriptions: HashMap<String, ActiveSubscription>,
    next_generation: u64,
    close: Option<(u16, String)>,
}

/// Drive an upgraded connection until it closes.
pub async fn run_session(
    socket: WebSocket,
    gateway: Arc<Gateway>,
    protocol: SubProtocol,
    upgrade: UpgradeContext,
) {
    let ws_config = gateway.config().websocket.clone();
    let (sink, mut stream) = socket.split();

    let (out_tx, out_rx) = mpsc::channel(ws_config.outbound_buffer);
    let mut writer = tokio::spawn(write_loop(sink, out_rx));
    let (events_tx, mut events_rx) = mpsc::channel(ws_config.outbound_buffer);

    gateway.session_opened();
    info!(origin = ?upgrade.origin, "ws_session_opened");

    let mut session = Session {
        gateway: Arc::clone(&gateway),
        protocol,
        upgrade,
        state: SessionState::Connecting.next(SessionEvent::Upgraded),
        out: out_tx,
        events: events_tx,
        subscriptions: HashMap::new(),
        next_generation: 0,
        close: None,
    };

    let handshake_timeout = millis(ws_config.handshake_timeout_ms);
    let handshake_deadline = Instant::now() + handshake_timeout.unwrap_or_default();
    let idle_timeout = millis(ws_config.idle_timeout_ms);
    let mut last_activity = Instant::now();

    // Legacy clients expect `ka` frames once acknowledged
    let keepalive_period = millis(ws_config.keepalive_interval_ms)
        .filter(|_| protocol == SubProtocol::GraphqlWs);
    let mut keepalive =
        tokio::time::interval(keepalive_period.unwrap_or(Duration::from_secs(3600)));
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await;

    while session.state.is_live() {
        let awaiting_init =
            handshake_timeout.is_some() && session.state == SessionState::Handshaking;
        let send_keepalive = keepalive_period.is_some() && session.state.can_emit_data();

        let idle_sleep: Pin<Box<dyn Future<Output = ()> + Send>> = match idle_timeout {
            Some(dur) => Box::pin(tokio::time::sleep_until(last_activity + dur)),
            None => Box::pin(std::future::pending()),
        };

        tokio::select! {
            () = tokio::time::sleep_until(handshake_deadline), if awaiting_init => {
                info!(timeout_ms = ws_config.handshake_timeout_ms, "ws_handshake_timeout");
                session.fail(
                    SessionEvent::HandshakeTimeout,
                    GatewayError::violation(
                        close_code::HANDSHAKE_TIMEOUT,
                        "Connection initialisation timeout",
                    ),
                );
            }
            () = idle_sleep => {
                info!(idle_ms = ws_config.idle_timeout_ms, "ws_idle_timeout");
                session.state = session.state.next(SessionEvent::IdleTimeout);
                session.close = Some((close_code::NORMAL, "Idle timeout".to_string()));
            }
            _ = keepalive.tick(), if send_keepalive => {
                session.send(ServerMessage::KeepAlive).await;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        session.on_text(&text).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_activity = Instant::now();
                        session
                            .on_malformed(None, "Binary frames are not supported".to_string())
                            .await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("ws_close_frame_received");
                        session.state = session.state.next(SessionEvent::PeerClosed);
                    }
                    None => {
                        debug!("ws_stream_ended");
                        session.state = session.state.next(SessionEvent::PeerClosed);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "ws_protocol_error");
                        session.state = session.state.next(SessionEvent::PeerClosed);
                    }
                }
            }
            Some(event) = events_rx.recv() => {
                // A result reaching the client counts as activity
                if session.on_event(event).await {
                    last_activity = Instant::now();
                }
            }
        }
    }

    // Teardown consumes the session, dropping the last outbound sender
    let (cancelled, final_code) = session.teardown().await;
    drop(events_rx);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!("ws_writer_drain_timeout");
        writer.abort();
    }

    gateway.session_closed();
    info!(
        subscriptions_cancelled = cancelled,
        close_code = ?final_code,
        "ws_session_closed"
    );
}

impl Session {
    /// Queue a frame for the writer. A closed writer means the peer is gone.
    async fn send(&mut self, frame: ServerMessage) {
        if self.out.send(Outbound::Frame(frame)).await.is_err() {
            self.state = self.state.next(SessionEvent::PeerClosed);
        }
    }

    /// Apply `event` and remember the close frame `err` maps to.
    fn fail(&mut self, event: SessionEvent, err: GatewayError) {
        self.state = self.state.next(event);
        self.close = Some((err.close_code(), err.to_string()));
    }

    /// Handshake failure: `connection_error` carrying the message, then close.
    async fn reject_handshake(&mut self, event: SessionEvent, err: GatewayError) {
        self.state = self.state.next(event);
        self.send(ServerMessage::ConnectionError {
            payload: ErrorPayload {
                message: err.to_string(),
            },
        })
        .await;
        self.close = Some((err.close_code(), err.to_string()));
    }

    async fn on_text(&mut self, text: &str) {
        let message = match ClientMessage::decode(text) {
            Decoded::Message(message) => message,
            Decoded::Malformed { id, reason } => return self.on_malformed(id, reason).await,
        };

        match message {
            ClientMessage::ConnectionInit { payload } => self.on_init(payload).await,
            ClientMessage::Start { id, payload } => self.on_start(id, payload).await,
            ClientMessage::Stop { id } => self.on_stop(&id),
            ClientMessage::Ping { payload } => {
                self.state = self.state.next(SessionEvent::Heartbeat);
                self.send(ServerMessage::Pong { payload }).await;
            }
            ClientMessage::Pong { .. } => {
                self.state = self.state.next(SessionEvent::Heartbeat);
            }
            ClientMessage::ConnectionTerminate => {
                debug!("ws_connection_terminate");
                self.state = self.state.next(SessionEvent::CloseRequested);
                self.close = Some((close_code::NORMAL, "Normal Closure".to_string()));
            }
        }
    }

    /// An undecodable frame naming a subscription is reported against it once
    /// acknowledged. During the handshake it fails the handshake. Anything
    /// else ends the session.
    async fn on_malformed(&mut self, id: Option<String>, reason: String) {
        debug!(id = ?id, reason = %reason, "ws_malformed_frame");
        let event = SessionEvent::Malformed {
            attributable: id.is_some(),
        };
        if self.state == SessionState::Handshaking {
            let err = GatewayError::violation(close_code::BAD_REQUEST, reason);
            return self.reject_handshake(event, err).await;
        }
        let next = self.state.next(event);
        match id {
            Some(id) if next.can_emit_data() => {
                self.state = next;
                let payload = vec![GraphQlError::with_code(reason, "BAD_REQUEST")];
                self.send(ServerMessage::Error { id, payload }).await;
            }
            _ => self.fail(event, GatewayError::violation(close_code::BAD_REQUEST, reason)),
        }
    }

    async fn on_init(&mut self, payload: Option<Value>) {
        if self.state != SessionState::Handshaking {
            warn!("ws_duplicate_connection_init");
            self.fail(
                SessionEvent::Init { authorized: true },
                GatewayError::violation(
                    close_code::TOO_MANY_INIT,
                    "Too many initialisation requests",
                ),
            );
            return;
        }

        let authorized = self.authorize(payload.as_ref()).await;
        let event = SessionEvent::Init { authorized };

        if authorized {
            self.state = self.state.next(event);
            info!("ws_connection_ack");
            self.send(ServerMessage::ConnectionAck { payload: None }).await;
        } else {
            warn!(origin = ?self.upgrade.origin, "ws_handshake_rejected");
            let err = GatewayError::HandshakeRejected("CSRF token missing or invalid".to_string());
            self.reject_handshake(event, err).await;
        }
    }

    /// CSRF check for the handshake. The token is read from the init payload
    /// first and the upgrade request header second; the session id from the
    /// payload's `sessionId` first and the upgrade cookie second.
    async fn authorize(&self, payload: Option<&Value>) -> bool {
        if !self.gateway.csrf_enabled() {
            return true;
        }
        let csrf = &self.gateway.config().csrf;
        let payload_str =
            |key: &str| payload.and_then(|p| p.get(key)).and_then(Value::as_str);

        let (source, token) = match payload_str(&csrf.init_payload_key) {
            Some(token) => (TokenSource::InitPayload, Some(token)),
            None => (TokenSource::Header, self.upgrade.header_token.as_deref()),
        };
        let ctx = CsrfContext {
            source,
            session_id: payload_str("sessionId").or(self.upgrade.session_id.as_deref()),
            token,
            origin: self.upgrade.origin.as_deref(),
        };
        self.gateway.csrf_decision(&ctx).await.permits()
    }

    async fn on_start(&mut self, id: String, raw: RawOperation) {
        if self.state != SessionState::Acknowledged {
            debug!(id = %id, "ws_subscribe_before_ack");
            self.fail(SessionEvent::Subscribe, unauthorized());
            return;
        }
        if self.subscriptions.contains_key(&id) {
            warn!(id = %id, "ws_duplicate_subscription_id");
            let reason = format!("Subscriber for {id} already exists");
            self.fail(
                SessionEvent::Violation,
                GatewayError::violation(close_code::DUPLICATE_SUBSCRIPTION, reason),
            );
            return;
        }
        self.state = self.state.next(SessionEvent::Subscribe);

        let operation = match raw.into_operation() {
            Ok(operation) => operation,
            Err(e) => {
                let payload = vec![GraphQlError::with_code(e.to_string(), e.code())];
                self.send(ServerMessage::Error { id, payload }).await;
                return;
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let handle = self.gateway.adapter().spawn_subscription(
            id.clone(),
            generation,
            operation,
            self.events.clone(),
        );
        debug!(id = %id, generation, "ws_subscription_started");
        self.subscriptions
            .insert(id, ActiveSubscription { generation, handle });
        self.gateway.subscription_started();
    }

    /// Stopping an unknown id is a no-op. No `complete` is sent for a stop.
    fn on_stop(&mut self, id: &str) {
        if self.state != SessionState::Acknowledged {
            self.fail(SessionEvent::Stop, unauthorized());
            return;
        }
        self.state = self.state.next(SessionEvent::Stop);
        if let Some(subscription) = self.subscriptions.remove(id) {
            subscription.handle.abort();
            self.gateway.subscriptions_ended(1);
            debug!(id = %id, "ws_subscription_stopped");
        }
    }

    fn is_current(&self, id: &str, generation: u64) -> bool {
        self.subscriptions
            .get(id)
            .is_some_and(|s| s.generation == generation)
    }

    /// Returns whether a frame was queued for the client.
    async fn on_event(&mut self, event: SubscriptionEvent) -> bool {
        match event {
            SubscriptionEvent::Next {
                id,
                generation,
                result,
            } => {
                if !self.is_current(&id, generation) || !self.state.can_emit_data() {
                    return false;
                }
                let frame = self.protocol.result_frame(id, result);
                self.send(frame).await;
                true
            }
            SubscriptionEvent::Complete { id, generation } => {
                if !self.is_current(&id, generation) {
                    return false;
                }
                self.subscriptions.remove(&id);
                self.gateway.subscriptions_ended(1);
                debug!(id = %id, "ws_subscription_completed");
                if !self.state.can_emit_data() {
                    return false;
                }
                self.send(ServerMessage::Complete { id }).await;
                true
            }
        }
    }

    /// Cancel every subscription, queue the close frame, and release the
    /// outbound channel. Returns how many subscriptions were cancelled and
    /// the close code sent, if any.
    async fn teardown(mut self) -> (usize, Option<u16>) {
        let cancelled = self.subscriptions.len();
        for (_, subscription) in self.subscriptions.drain() {
            subscription.handle.abort();
            let _ = subscription.handle.await;
        }
        self.gateway.subscriptions_ended(cancelled);

        let close = self.close.take();
        let sent_code = close.as_ref().map(|(code, _)| *code);
        if let Some((code, reason)) = close {
            // A full queue means the writer is stuck on the peer; run_session
            // aborts it after the drain timeout.
            let frame = Outbound::Close {
                code,
                reason: close_reason(reason),
            };
            if let Err(mpsc::error::TrySendError::Full(_)) = self.out.try_send(frame) {
                warn!(code, "ws_close_frame_dropped");
            }
        }
        self.state = self.state.next(SessionEvent::Drained);
        (cancelled, sent_code)
    }
}

/// Single writer for the socket. Ends after a close frame or when every
/// sender is gone.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        let message = match outbound {
            Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                Ok(json) => Message::Text(json),
                Err(e) => {
                    warn!(error = %e, "ws_frame_serialize_failed");
                    continue;
                }
            },
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return;
            }
        };
        if sink.send(message).await.is_err() {
            return;
        }
    }
    let _ = sink.close().await;
}

fn unauthorized() -> GatewayError {
    GatewayError::violation(close_code::UNAUTHORIZED, "Unauthorized")
}

/// Zero disables a timer.
fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn close_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}
