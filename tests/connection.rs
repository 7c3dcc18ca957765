#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockEngine, next_event, registry_with_consumer, unreachable_url, wait_for_event};
use engine_relay::types::OutboundMessage;
use engine_relay::ws::{Config, Connection, Phase, ReconnectConfig};
use tokio::time::{sleep, timeout};

fn config(reconnect_delay: Duration) -> Config {
    let mut config = Config::default();
    config.reconnect = ReconnectConfig::fixed(reconnect_delay);
    config
}

#[tokio::test]
async fn handshake_is_sent_in_order_then_connected() {
    let mut engine = MockEngine::start().await;
    let (registry, _channels, mut events) = registry_with_consumer();
    let connection = Connection::new(Config::default(), registry);

    connection.connect(Some(engine.url())).unwrap();

    engine.expect_handshake().await;
    assert_eq!(next_event(&mut events).await, OutboundMessage::Connected);

    let status = connection.status().await.unwrap();
    assert!(status.connected);
    assert!(!status.ready);
    assert_eq!(status.endpoint, engine.url());
}

#[tokio::test]
async fn ready_and_engine_output_are_broadcast() {
    let mut engine = MockEngine::start().await;
    let (registry, _channels, mut events) = registry_with_consumer();
    let connection = Connection::new(Config::default(), registry);

    connection.connect(Some(engine.url())).unwrap();
    engine.expect_handshake().await;
    assert_eq!(next_event(&mut events).await, OutboundMessage::Connected);

    engine.send("iam relay-server");
    engine.send("engine Stockfish 16");
    engine.send("subok");
    engine.send("readyok");
    assert_eq!(next_event(&mut events).await, OutboundMessage::Ready);

    let status = connection.status().await.unwrap();
    assert!(status.ready);
    assert_eq!(status.phase, Phase::Ready);

    engine.send("info depth 14 score cp 31");
    engine.send("bestmove e2e4 ponder e7e5\n");
    assert_eq!(
        next_event(&mut events).await,
        OutboundMessage::Data("info depth 14 score cp 31".to_owned())
    );
    assert_eq!(
        next_event(&mut events).await,
        OutboundMessage::Data("bestmove e2e4 ponder e7e5\n".to_owned())
    );
}

#[tokio::test]
async fn repeated_connect_opens_one_socket() {
    let mut engine = MockEngine::start().await;
    let (registry, _channels, mut events) = registry_with_consumer();
    let connection = Connection::new(Config::default(), registry);

    connection.connect(Some(engine.url())).unwrap();
    connection.connect(Some(engine.url())).unwrap();
    engine.expect_handshake().await;
    assert_eq!(next_event(&mut events).await, OutboundMessage::Connected);

    connection.connect(None).unwrap();
    // Drain the status round-trip so the third connect has been processed
    connection.status().await.unwrap();

    assert!(engine.commands_within(Duration::from_millis(300)).await.is_empty());
    assert_eq!(engine.accepted(), 1);
}

#[tokio::test]
async fn send_requires_an_open_socket() {
    let mut engine = MockEngine::start().await;
    let (registry, _channels, mut events) = registry_with_consumer();
    let connection = Connection::new(Config::default(), registry);

    assert!(!connection.send("go depth 1").await.unwrap());

    connection.connect(Some(engine.url())).unwrap();
    engine.expect_handshake().await;
    assert_eq!(next_event(&mut events).await, OutboundMessage::Connected);

    assert!(connection.send("position startpos moves e2e4").await.unwrap());
    assert_eq!(
        engine.recv_command().await.as_deref(),
        Some("position startpos moves e2e4")
    );

    connection.disconnect().unwrap();
    assert!(!connection.send("go depth 1").await.unwrap());
}

#[tokio::test]
async fn reconnects_after_remote_close() {
    let mut engine = MockEngine::start().await;
    let (registry, _channels, mut events) = registry_with_consumer();
    let connection = Connection::new(config(Duration::from_millis(100)), registry);

    connection.connect(Some(engine.url())).unwrap();
    engine.expect_handshake().await;
    assert_eq!(next_event(&mut events).await, OutboundMessage::Connected);

    engine.close_all();
    assert_eq!(next_event(&mut events).await, OutboundMessage::Disconnected);

    // Same endpoint, full handshake again
    engine.expect_handshake().await;
    assert_eq!(
        wait_for_event(&mut events, |event| *event == OutboundMessage::Connected).await,
        OutboundMessage::Connected
    );
    assert_eq!(engine.accepted(), 2);
    assert_eq!(connection.status().await.unwrap().endpoint, engine.url());
}

#[tokio::test]
async fn explicit_disconnect_does_not_reconnect() {
    let mut engine = MockEngine::start().await;
    let (registry, _channels, mut events) = registry_with_consumer();
    let connection = Connection::new(config(Duration::from_millis(50)), registry);

    connection.connect(Some(engine.url())).unwrap();
    engine.expect_handshake().await;
    assert_eq!(next_event(&mut events).await, OutboundMessage::Connected);

    connection.disconnect().unwrap();
    assert_eq!(next_event(&mut events).await, OutboundMessage::Disconnected);

    sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.accepted(), 1);

    let status = connection.status().await.unwrap();
    assert!(!status.connected);
    assert_eq!(status.phase, Phase::Closed);

    // Nothing else was broadcast
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn unreachable_endpoint_reports_error_then_disconnected() {
    let (registry, _channels, mut events) = registry_with_consumer();
    let connection = Connection::new(config(Duration::from_secs(30)), registry);
    let url = unreachable_url().await;

    connection.connect(Some(url.clone())).unwrap();

    let OutboundMessage::Error(reason) = next_event(&mut events).await else {
        panic!("expected an error event");
    };
    assert!(!reason.is_empty());
    assert_eq!(next_event(&mut events).await, OutboundMessage::Disconnected);

    let status = connection.status().await.unwrap();
    assert!(!status.connected);
    assert!(!status.ready);
    assert_eq!(status.phase, Phase::Closed);
    assert_eq!(status.endpoint, url);
}

#[tokio::test(start_paused = true)]
async fn unreachable_endpoint_retries_once_per_delay() {
    let (registry, _channels, mut events) = registry_with_consumer();
    let delay = Config::default().reconnect.initial_backoff;
    let connection = Connection::new(Config::default(), registry);

    connection.connect(Some(unreachable_url().await)).unwrap();

    let mut failures = 0;
    for _ in 0..3 {
        assert!(matches!(next_event(&mut events).await, OutboundMessage::Error(_)));
        assert_eq!(next_event(&mut events).await, OutboundMessage::Disconnected);
        failures += 1;

        // Nothing happens until the delay has fully elapsed
        sleep(delay - Duration::from_millis(10)).await;
        assert!(events.try_recv().is_err(), "reconnect fired early");
    }
    assert_eq!(failures, 3);

    connection.disconnect().unwrap();
    assert_eq!(next_event(&mut events).await, OutboundMessage::Disconnected);
    sleep(delay * 3).await;
    assert!(events.try_recv().is_err(), "reconnect after disconnect");
}

#[tokio::test]
async fn close_before_settle_skips_engine_setup() {
    let mut engine = MockEngine::start().await;
    let (registry, _channels, mut events) = registry_with_consumer();
    let mut config = Config::default();
    config.settle_delay = Duration::from_millis(300);
    let connection = Connection::new(config, registry);

    connection.connect(Some(engine.url())).unwrap();
    assert_eq!(
        engine.recv_commands(3).await,
        ["sub", "whoareyou", "whatengine"]
    );
    assert_eq!(next_event(&mut events).await, OutboundMessage::Connected);

    engine.close_all();
    assert_eq!(next_event(&mut events).await, OutboundMessage::Disconnected);

    // The settle timer belonged to the closed socket; the reconnect is 3 s out
    assert!(
        engine
            .commands_within(Duration::from_millis(600))
            .await
            .is_empty()
    );
    assert_eq!(engine.accepted(), 1);
    assert_eq!(connection.status().await.unwrap().phase, Phase::Closed);
}

#[tokio::test]
async fn failing_consumer_does_not_affect_others() {
    let mut engine = MockEngine::start().await;
    let (registry, channels, mut events) = registry_with_consumer();
    let (gone, gone_events) = channels.open();
    registry.add(gone);
    drop(gone_events);

    let connection = Connection::new(Config::default(), Arc::clone(&registry));
    connection.connect(Some(engine.url())).unwrap();
    engine.expect_handshake().await;

    assert_eq!(next_event(&mut events).await, OutboundMessage::Connected);

    engine.send("bestmove d2d4");
    assert_eq!(
        next_event(&mut events).await,
        OutboundMessage::Data("bestmove d2d4".to_owned())
    );

    // Removed at the end of the first broadcast
    assert!(!registry.contains(gone));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn status_updates_are_published() {
    let mut engine = MockEngine::start().await;
    let (registry, _channels, _events) = registry_with_consumer();
    let connection = Connection::new(Config::default(), registry);
    let mut status = connection.status_receiver();

    assert_eq!(connection.current_status().phase, Phase::Idle);

    connection.connect(Some(engine.url())).unwrap();
    engine.expect_handshake().await;
    engine.send("readyok");

    timeout(Duration::from_secs(2), status.wait_for(|status| status.ready))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connection.current_status().phase, Phase::Ready);
}

#[tokio::test]
async fn set_endpoint_applies_to_next_connect() {
    let mut engine = MockEngine::start().await;
    let (registry, _channels, mut events) = registry_with_consumer();
    let connection = Connection::new(Config::default(), registry);

    connection.set_endpoint(engine.url()).unwrap();
    assert_eq!(connection.status().await.unwrap().phase, Phase::Idle);
    assert_eq!(engine.accepted(), 0);

    connection.connect(None).unwrap();
    engine.expect_handshake().await;
    assert_eq!(next_event(&mut events).await, OutboundMessage::Connected);
}
