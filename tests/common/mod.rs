//! Shared helpers for gateway integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use futures_util::SinkExt;
use graphgate::protocol::{EngineError, ResultStream};
use graphgate::{
    Config, ExecutionResult, Gateway, InMemorySessionStore, Operation, QueryEngine,
    StoreCsrfValidator,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const SESSION_ID: &str = "sess-1";
pub const CSRF_TOKEN: &str = "tok-3f9a";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Decrements the live-stream counter when the engine's stream is dropped.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(live))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Deterministic engine that records what it is asked to do.
///
/// - documents containing `fail`: refused with `GRAPHQL_VALIDATION_FAILED`
/// - `subscription` documents: `{"tick": n}` every `interval`, up to
///   `variables.limit` when given, forever otherwise
/// - anything else: `{"ok": true, "operationName": ...}`
pub struct TestEngine {
    pub executions: Arc<AtomicUsize>,
    pub live_streams: Arc<AtomicUsize>,
    pub interval: Duration,
}

impl TestEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executions: Arc::new(AtomicUsize::new(0)),
            live_streams: Arc::new(AtomicUsize::new(0)),
            interval: Duration::from_millis(20),
        })
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }
}

impl QueryEngine for TestEngine {
    fn execute(&self, operation: Operation) -> Result<ResultStream, EngineError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if operation.query.contains("fail") {
            return Err(EngineError::with_code(
                "Cannot query field \"fail\"",
                "GRAPHQL_VALIDATION_FAILED",
            ));
        }
        if operation.query.trim_start().starts_with("subscription") {
            let limit = operation.variables.get("limit").and_then(Value::as_u64);
            let interval = self.interval;
            let guard = LiveGuard::new(&self.live_streams);
            let ticks = stream::unfold((0u64, guard), move |(n, guard)| async move {
                if limit.is_some_and(|limit| n >= limit) {
                    return None;
                }
                tokio::time::sleep(interval).await;
                Some((ExecutionResult::data(json!({ "tick": n })), (n + 1, guard)))
            });
            return Ok(ticks.boxed());
        }
        let result = ExecutionResult::data(json!({
            "ok": true,
            "operationName": operation.operation_name,
        }));
        Ok(stream::once(async move { result }).boxed())
    }
}

pub fn gateway(config: Config, engine: Arc<TestEngine>) -> Arc<Gateway> {
    Arc::new(Gateway::new(config, engine).unwrap())
}

/// Gateway with CSRF enabled and one session (`SESSION_ID` / `CSRF_TOKEN`).
pub fn csrf_gateway(mut config: Config, engine: Arc<TestEngine>) -> Arc<Gateway> {
    config.csrf.enabled = true;
    let store = Arc::new(InMemorySessionStore::new());
    store.insert(SESSION_ID, CSRF_TOKEN);
    Arc::new(
        Gateway::new(config, engine)
            .unwrap()
            .with_csrf_validator(Arc::new(StoreCsrfValidator::new(store))),
    )
}

/// Serve the gateway on an ephemeral port for the rest of the test.
pub async fn spawn_server(gateway: Arc<Gateway>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(graphgate::protocol::rest::serve(
        listener,
        gateway,
        std::future::pending(),
    ));
    addr
}

/// Open a WebSocket on `/graphql` offering `protocol`, with extra request headers.
pub async fn try_connect(
    addr: SocketAddr,
    protocol: &str,
    headers: &[(&'static str, &str)],
) -> Result<(WsStream, String), tokio_tungstenite::tungstenite::Error> {
    let mut request = format!("ws://{addr}/graphql").into_client_request()?;
    request
        .headers_mut()
        .insert("sec-websocket-protocol", HeaderValue::from_str(protocol).unwrap());
    for (name, value) in headers {
        request
            .headers_mut()
            .insert(*name, HeaderValue::from_str(value).unwrap());
    }
    let (stream, response) = connect_async(request).await?;
    let selected = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Ok((stream, selected))
}

pub async fn connect(addr: SocketAddr, protocol: &str, headers: &[(&'static str, &str)]) -> WsStream {
    try_connect(addr, protocol, headers).await.unwrap().0
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// What the server sent next.
#[derive(Debug)]
pub enum Frame {
    Json(Value),
    Closed(Option<u16>),
}

/// Next text or close frame, skipping transport pings.
pub async fn next_raw(ws: &mut WsStream) -> Frame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame");
        match msg {
            Some(Ok(Message::Text(text))) => return Frame::Json(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(frame))) => return Frame::Closed(frame.map(|f| u16::from(f.code))),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return Frame::Closed(None),
        }
    }
}

/// Next frame, skipping `ka` keepalives.
pub async fn next_frame(ws: &mut WsStream) -> Frame {
    loop {
        match next_raw(ws).await {
            Frame::Json(v) if v["type"] == "ka" => continue,
            other => return other,
        }
    }
}

pub async fn expect_json(ws: &mut WsStream) -> Value {
    match next_frame(ws).await {
        Frame::Json(v) => v,
        Frame::Closed(code) => panic!("expected a frame, connection closed with {code:?}"),
    }
}

pub async fn expect_close(ws: &mut WsStream) -> Option<u16> {
    match next_frame(ws).await {
        Frame::Closed(code) => code,
        Frame::Json(v) => panic!("expected close, got {v}"),
    }
}

/// `connection_init` then `connection_ack`.
pub async fn init(ws: &mut WsStream, payload: Value) {
    send_json(ws, json!({"type": "connection_init", "payload": payload})).await;
    let ack = expect_json(ws).await;
    assert_eq!(ack["type"], "connection_ack", "unexpected handshake reply: {ack}");
}

/// Poll until `check` holds, panicking after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
