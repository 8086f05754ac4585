//! Ticks, server-initiated closes, broadcast and shutdown.

mod common;

use common::{start_server, test_config, Event, Recorder, TestClient};
use socket_engine::{Callbacks, CloseCode, ConnectionId, EngineConfig, Opcode};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_tick_fires_at_configured_cadence() {
    let config = EngineConfig {
        tick_ms: 20,
        ..test_config()
    };
    let (recorder, mut events) = Recorder::new(false);
    let server = start_server(config, recorder).await;

    let ticks = events.count_ticks(Duration::from_millis(500)).await;
    assert!((10..=26).contains(&ticks), "{ticks} ticks in 500ms");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_tick_handler_skips_missed_ticks() {
    let seen = Arc::new(Mutex::new(0usize));
    let counter = seen.clone();
    let callbacks = Callbacks::new().on_tick(move |_ctx| {
        let mut count = counter.lock().unwrap();
        *count += 1;
        if *count == 1 {
            // Blocks the loop for five intervals.
            std::thread::sleep(Duration::from_millis(100));
        }
    });
    let server = start_server(test_config(), callbacks).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let count = *seen.lock().unwrap();
    // Roughly 300ms of 20ms ticks minus the five swallowed by the stall.
    assert!(count <= 12, "{count} ticks");
    assert!(count >= 3, "{count} ticks");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_context_introspection_in_on_open() {
    let config = EngineConfig {
        subprotocols: vec!["cartographica.v1".into()],
        ..test_config()
    };
    let callbacks = Callbacks::new().on_open(|ctx, id, info| {
        assert!(ctx.is_open(id));
        assert_eq!(ctx.protocol(id), info.protocol.as_deref());
        assert_eq!(ctx.peer_addr(id), Some(info.peer_addr));
        assert!(ctx.connection_ids().contains(&id));
        let welcome = format!("welcome {} of {}", id, ctx.connection_count());
        assert!(ctx.send(id, welcome));
    });
    let server = start_server(config, callbacks).await;

    let (mut client, _) =
        TestClient::open(server.addr, "/", &[("Sec-WebSocket-Protocol", "cartographica.v1")]).await;
    let welcome = client.read_frame().await;
    assert_eq!(welcome.opcode, Opcode::Text);
    assert_eq!(welcome.payload, b"welcome 1 of 1");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connection_ids_are_never_reused() {
    let (recorder, mut events) = Recorder::new(false);
    let server = start_server(test_config(), recorder).await;

    let (first, _) = TestClient::open(server.addr, "/", &[]).await;
    let first_id = events.opened().await;
    let (_second, _) = TestClient::open(server.addr, "/", &[]).await;
    let second_id = events.opened().await;
    assert!(second_id > first_id);

    drop(first);
    assert_eq!(events.next().await, Event::Close(first_id, None, None));

    let (_third, _) = TestClient::open(server.addr, "/", &[]).await;
    let third_id = events.opened().await;
    assert!(third_id > second_id);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_close_from_callback() {
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let callbacks = Callbacks::new()
        .on_message(|ctx, id, _opcode, payload| {
            if payload == b"kick me" {
                ctx.close(id, CloseCode::POLICY_VIOLATION, "kicked");
                assert!(!ctx.is_open(id));
                assert!(!ctx.send(id, "too late"));
            }
        })
        .on_close(move |_ctx, id, code, reason| {
            let _ = closed_tx.send((id, code, reason.map(str::to_string)));
        });
    let server = start_server(test_config(), callbacks).await;
    let (mut client, _) = TestClient::open(server.addr, "/", &[]).await;

    client.send_text("kick me").await;
    let close = client.read_close().await;
    assert_eq!(close.code, Some(CloseCode::POLICY_VIOLATION));
    assert_eq!(close.reason.as_deref(), Some("kicked"));
    assert!(client.closed_by_server().await);

    let (_, code, reason) = tokio::time::timeout(common::IO_TIMEOUT, closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, Some(CloseCode::POLICY_VIOLATION));
    assert_eq!(reason.as_deref(), Some("kicked"));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_broadcast_skips_excluded_sender() {
    let callbacks = Callbacks::new().on_message(|ctx, id, _opcode, payload| {
        let text = String::from_utf8_lossy(payload).into_owned();
        let delivered = ctx.broadcast(text, Some(id));
        ctx.send(id, format!("delivered {delivered}"));
    });
    let server = start_server(test_config(), callbacks).await;

    let (mut sender, _) = TestClient::open(server.addr, "/", &[]).await;
    let (mut second, _) = TestClient::open(server.addr, "/", &[]).await;
    let (mut third, _) = TestClient::open(server.addr, "/", &[]).await;

    sender.send_text("land ho").await;
    assert_eq!(sender.read_frame().await.payload, b"delivered 2");
    assert_eq!(second.read_frame().await.payload, b"land ho");
    assert_eq!(third.read_frame().await.payload, b"land ho");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_sends_going_away() {
    let (recorder, mut events) = Recorder::new(false);
    let server = start_server(test_config(), recorder).await;

    let (mut first, _) = TestClient::open(server.addr, "/", &[]).await;
    let (mut second, _) = TestClient::open(server.addr, "/", &[]).await;
    let mut ids: Vec<ConnectionId> = vec![events.opened().await, events.opened().await];

    server.stop().await;

    for client in [&mut first, &mut second] {
        let close = client.read_close().await;
        assert_eq!(close.code, Some(CloseCode::GOING_AWAY));
        assert!(client.closed_by_server().await);
    }

    let mut closed = Vec::new();
    for _ in 0..2 {
        match events.next().await {
            Event::Close(id, Some(1001), _) => closed.push(id),
            other => panic!("expected close, got {other:?}"),
        }
    }
    ids.sort_unstable();
    closed.sort_unstable();
    assert_eq!(closed, ids);
}
