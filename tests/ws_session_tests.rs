//! WebSocket sessions against a real listener.
//!
//! Handshake and CSRF, subscription lifecycle, protocol violations, and
//! teardown cancelling engine streams.

mod common;

use std::time::Duration;

use graphgate::protocol::close_code;
use graphgate::Config;
use serde_json::json;

use common::*;

const TRANSPORT_WS: &str = "graphql-transport-ws";
const LEGACY_WS: &str = "graphql-ws";

fn subscribe(id: &str, limit: Option<u64>) -> serde_json::Value {
    let variables = match limit {
        Some(limit) => json!({ "limit": limit }),
        None => json!({}),
    };
    json!({
        "type": "subscribe",
        "id": id,
        "payload": {"query": "subscription { tick }", "variables": variables}
    })
}

// === Handshake ===

#[tokio::test]
async fn test_negotiates_transport_ws_and_acks() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let (mut ws, selected) = try_connect(addr, TRANSPORT_WS, &[]).await.unwrap();
    assert_eq!(selected, TRANSPORT_WS);
    init(&mut ws, json!({})).await;
}

/// Client order decides when several supported sub-protocols are offered.
#[tokio::test]
async fn test_first_offered_protocol_wins() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let (_ws, selected) = try_connect(addr, "graphql-ws, graphql-transport-ws", &[])
        .await
        .unwrap();
    assert_eq!(selected, LEGACY_WS);
}

#[tokio::test]
async fn test_unsupported_subprotocol_refused() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    match try_connect(addr, "mqtt", &[]).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
            assert_eq!(resp.status(), 400);
        }
        other => panic!("expected HTTP 400, got {:?}", other.map(|(_, p)| p)),
    }
}

/// With CSRF disabled a cross-origin upgrade is acknowledged.
#[tokio::test]
async fn test_cross_origin_acked_when_csrf_disabled() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[("origin", "https://elsewhere.example")]).await;
    init(&mut ws, json!({})).await;
}

#[tokio::test]
async fn test_handshake_timeout_closes_4408() {
    let engine = TestEngine::new();
    let mut config = Config::default();
    config.websocket.handshake_timeout_ms = 100;
    let addr = spawn_server(gateway(config, engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    assert_eq!(expect_close(&mut ws).await, Some(close_code::HANDSHAKE_TIMEOUT));
}

#[tokio::test]
async fn test_subscribe_before_ack_closes_4401() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine.clone())).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    send_json(&mut ws, subscribe("1", None)).await;
    assert_eq!(expect_close(&mut ws).await, Some(close_code::UNAUTHORIZED));
    assert_eq!(engine.executions(), 0);
}

#[tokio::test]
async fn test_second_init_closes_4429() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;
    send_json(&mut ws, json!({"type": "connection_init"})).await;
    assert_eq!(expect_close(&mut ws).await, Some(close_code::TOO_MANY_INIT));
}

/// Garbage before `connection_init` is a failed handshake, not a bare close.
#[tokio::test]
async fn test_malformed_frame_during_handshake_sends_connection_error() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine.clone())).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;

    use futures_util::SinkExt;
    ws.send(tokio_tungstenite::tungstenite::Message::Text("not json".to_string()))
        .await
        .unwrap();

    let reply = expect_json(&mut ws).await;
    assert_eq!(reply["type"], "connection_error");
    assert!(reply["payload"]["message"].as_str().is_some());
    assert_eq!(expect_close(&mut ws).await, Some(close_code::BAD_REQUEST));
    assert_eq!(engine.executions(), 0);
}

// === CSRF on the handshake ===

#[tokio::test]
async fn test_csrf_token_in_init_payload_acked() {
    let engine = TestEngine::new();
    let addr = spawn_server(csrf_gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({"csrfToken": CSRF_TOKEN, "sessionId": SESSION_ID})).await;
}

/// Token from the upgrade header, session from the upgrade cookie.
#[tokio::test]
async fn test_csrf_token_from_upgrade_headers_acked() {
    let engine = TestEngine::new();
    let addr = spawn_server(csrf_gateway(Config::default(), engine)).await;
    let cookie = format!("session_id={SESSION_ID}");
    let mut ws = connect(
        addr,
        TRANSPORT_WS,
        &[("cookie", &cookie), ("x-csrf-token", CSRF_TOKEN)],
    )
    .await;
    init(&mut ws, json!({})).await;
}

/// A rejected handshake yields `connection_error` then 4403, and a subscribe
/// pipelined behind the init never reaches the engine.
#[tokio::test]
async fn test_csrf_missing_token_rejected_without_data() {
    let engine = TestEngine::new();
    let addr = spawn_server(csrf_gateway(Config::default(), engine.clone())).await;
    let cookie = format!("session_id={SESSION_ID}");
    let mut ws = connect(addr, TRANSPORT_WS, &[("cookie", &cookie)]).await;

    send_json(&mut ws, json!({"type": "connection_init", "payload": {}})).await;
    send_json(&mut ws, subscribe("1", None)).await;

    let reply = expect_json(&mut ws).await;
    assert_eq!(reply["type"], "connection_error");
    assert!(reply["payload"]["message"].as_str().is_some());
    assert_eq!(expect_close(&mut ws).await, Some(close_code::FORBIDDEN));
    assert_eq!(engine.executions(), 0);
}

#[tokio::test]
async fn test_csrf_wrong_token_rejected() {
    let engine = TestEngine::new();
    let addr = spawn_server(csrf_gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    send_json(
        &mut ws,
        json!({"type": "connection_init", "payload": {"csrfToken": "forged", "sessionId": SESSION_ID}}),
    )
    .await;
    assert_eq!(expect_json(&mut ws).await["type"], "connection_error");
    assert_eq!(expect_close(&mut ws).await, Some(close_code::FORBIDDEN));
}

// === Subscriptions ===

#[tokio::test]
async fn test_subscription_streams_then_completes() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;

    send_json(&mut ws, subscribe("s1", Some(2))).await;
    for n in 0..2 {
        let frame = expect_json(&mut ws).await;
        assert_eq!(frame, json!({"type": "next", "id": "s1", "payload": {"data": {"tick": n}}}));
    }
    assert_eq!(expect_json(&mut ws).await, json!({"type": "complete", "id": "s1"}));
}

#[tokio::test]
async fn test_legacy_protocol_uses_data_frames_and_keepalive() {
    let engine = TestEngine::new();
    let mut config = Config::default();
    config.websocket.keepalive_interval_ms = 50;
    let addr = spawn_server(gateway(config, engine)).await;
    let mut ws = connect(addr, LEGACY_WS, &[]).await;
    init(&mut ws, json!({})).await;

    match next_raw(&mut ws).await {
        Frame::Json(v) => assert_eq!(v, json!({"type": "ka"})),
        Frame::Closed(code) => panic!("closed with {code:?}"),
    }

    send_json(
        &mut ws,
        json!({"type": "start", "id": "1", "payload": {"query": "subscription { tick }", "variables": {"limit": 1}}}),
    )
    .await;
    let frame = expect_json(&mut ws).await;
    assert_eq!(frame["type"], "data");
    assert_eq!(frame["payload"]["data"]["tick"], 0);
    assert_eq!(expect_json(&mut ws).await["type"], "complete");

    send_json(&mut ws, json!({"type": "connection_terminate"})).await;
    assert_eq!(expect_close(&mut ws).await, Some(close_code::NORMAL));
}

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;
    send_json(&mut ws, json!({"type": "ping", "payload": {"t": 1}})).await;
    assert_eq!(expect_json(&mut ws).await, json!({"type": "pong", "payload": {"t": 1}}));
}

#[tokio::test]
async fn test_stop_unknown_id_is_noop() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;

    send_json(&mut ws, json!({"type": "complete", "id": "never-started"})).await;
    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(expect_json(&mut ws).await["type"], "pong");
}

/// After `stop` is processed no further results are sent for the id, and the
/// engine's stream is dropped.
#[tokio::test]
async fn test_stop_cancels_engine_stream() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine.clone())).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;

    send_json(&mut ws, subscribe("s1", None)).await;
    assert_eq!(expect_json(&mut ws).await["type"], "next");
    send_json(&mut ws, json!({"type": "complete", "id": "s1"})).await;
    send_json(&mut ws, json!({"type": "ping"})).await;

    loop {
        let frame = expect_json(&mut ws).await;
        if frame["type"] == "pong" {
            break;
        }
        assert_eq!(frame["type"], "next", "unexpected frame before pong: {frame}");
    }
    eventually(|| engine.live_streams() == 0, "stream cancellation").await;

    // Nothing else arrives for the stopped id
    send_json(&mut ws, json!({"type": "ping"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(expect_json(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn test_id_reusable_after_complete() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;

    for _ in 0..2 {
        send_json(&mut ws, subscribe("again", Some(1))).await;
        assert_eq!(expect_json(&mut ws).await["type"], "next");
        assert_eq!(expect_json(&mut ws).await["type"], "complete");
    }
}

#[tokio::test]
async fn test_duplicate_active_id_closes_4409() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine.clone())).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;

    send_json(&mut ws, subscribe("dup", None)).await;
    send_json(&mut ws, subscribe("dup", None)).await;
    loop {
        match next_frame(&mut ws).await {
            Frame::Json(v) => assert_eq!(v["type"], "next"),
            Frame::Closed(code) => {
                assert_eq!(code, Some(close_code::DUPLICATE_SUBSCRIPTION));
                break;
            }
        }
    }
    assert_eq!(engine.executions(), 1);
    eventually(|| engine.live_streams() == 0, "stream cancellation").await;
}

/// Engine refusals arrive inside a result frame; the session stays up.
#[tokio::test]
async fn test_engine_error_delivered_as_result() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;

    send_json(
        &mut ws,
        json!({"type": "subscribe", "id": "bad", "payload": {"query": "subscription { fail }"}}),
    )
    .await;
    let frame = expect_json(&mut ws).await;
    assert_eq!(frame["type"], "next");
    assert_eq!(
        frame["payload"]["errors"][0]["extensions"]["code"],
        "GRAPHQL_VALIDATION_FAILED"
    );
    assert_eq!(expect_json(&mut ws).await["type"], "complete");
}

// === Malformed frames ===

#[tokio::test]
async fn test_attributable_malformed_frame_reported_on_id() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;

    // Missing payload
    send_json(&mut ws, json!({"type": "subscribe", "id": "x"})).await;
    let frame = expect_json(&mut ws).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["id"], "x");

    // Payload without a query
    send_json(&mut ws, json!({"type": "subscribe", "id": "y", "payload": {}})).await;
    let frame = expect_json(&mut ws).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["payload"][0]["extensions"]["code"], "OPERATION_MISSING");

    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(expect_json(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn test_unattributable_malformed_frame_closes_4400() {
    let engine = TestEngine::new();
    let addr = spawn_server(gateway(Config::default(), engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;

    use futures_util::SinkExt;
    ws.send(tokio_tungstenite::tungstenite::Message::Text("not json".to_string()))
        .await
        .unwrap();
    assert_eq!(expect_close(&mut ws).await, Some(close_code::BAD_REQUEST));
}

// === Idle timeout ===

#[tokio::test]
async fn test_quiet_session_closes_on_idle_timeout() {
    let engine = TestEngine::new();
    let mut config = Config::default();
    config.websocket.idle_timeout_ms = 150;
    let addr = spawn_server(gateway(config, engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;
    assert_eq!(expect_close(&mut ws).await, Some(close_code::NORMAL));
}

/// Results flowing to a client that sends nothing keep the session open.
#[tokio::test]
async fn test_streaming_subscription_outlives_idle_timeout() {
    let engine = TestEngine::new();
    let mut config = Config::default();
    config.websocket.idle_timeout_ms = 200;
    let addr = spawn_server(gateway(config, engine)).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;
    send_json(&mut ws, subscribe("live", None)).await;

    let until = tokio::time::Instant::now() + Duration::from_millis(700);
    let mut received = 0;
    while tokio::time::Instant::now() < until {
        let frame = expect_json(&mut ws).await;
        assert_eq!(frame["type"], "next", "unexpected frame: {frame}");
        received += 1;
    }
    assert!(received > 10, "only {received} results before the deadline");
}

// === Teardown ===

#[tokio::test]
async fn test_disconnect_cancels_all_subscriptions() {
    let engine = TestEngine::new();
    let gw = gateway(Config::default(), engine.clone());
    let addr = spawn_server(gw.clone()).await;
    let mut ws = connect(addr, TRANSPORT_WS, &[]).await;
    init(&mut ws, json!({})).await;

    send_json(&mut ws, subscribe("a", None)).await;
    send_json(&mut ws, subscribe("b", None)).await;
    eventually(|| engine.live_streams() == 2, "both streams live").await;
    assert_eq!(gw.session_stats().active_subscriptions, 2);

    drop(ws);

    eventually(|| engine.live_streams() == 0, "streams dropped after disconnect").await;
    eventually(|| gw.session_stats().active_sessions == 0, "session closed").await;
    let stats = gw.session_stats();
    assert_eq!(stats.active_subscriptions, 0);
    assert_eq!(stats.total_sessions, 1);
}
