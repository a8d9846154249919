//! Session Streaming Integration Tests
//!
//! Handshake subscription, payload delivery and fault isolation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use market_stream::application::services::{
    DiagnosticsHub, SessionContext, StreamSession, SubscribeError,
};
use market_stream::infrastructure::binance;
use market_stream::{
    CanonicalField, ConnectionSupervisor, Diagnostic, NormalizeError, NormalizedEvent,
    SessionConfig, SessionError, SessionId, SessionState, StaticSymbolSource, StreamKind,
    SubscribeMode, Symbol,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use support::{
    MockPeer, MockTransport, WAIT, collector, config, next_event, next_peer, tick,
    wait_for_diagnostic,
};

// =============================================================================
// Handshake
// =============================================================================

struct Opening {
    peer: MockPeer,
    session: tokio::task::JoinHandle<Result<StreamSession, SessionError>>,
}

async fn open_handshake(subscribe_timeout: Duration) -> Opening {
    let (transport, mut peers) = MockTransport::new();
    let profile = Arc::new(binance::profile_with_mode(SubscribeMode::Handshake).unwrap());
    let address = profile
        .address(StreamKind::Tick, &[Symbol::parse("BTCUSDT").unwrap()], None)
        .unwrap();
    let context = SessionContext {
        profile,
        transport,
        config: SessionConfig {
            subscribe_timeout,
            idle_timeout: None,
            max_decode_failures: 3,
        },
        diagnostics: DiagnosticsHub::default(),
    };

    let session = tokio::spawn(async move {
        StreamSession::open(SessionId::new(7), &context, StreamKind::Tick, &address).await
    });
    let mut peer = next_peer(&mut peers).await;
    assert_eq!(
        peer.next_sent().await,
        json!({"method": "SUBSCRIBE", "params": ["btcusdt@ticker"], "id": 7})
    );
    Opening { peer, session }
}

#[tokio::test]
async fn handshake_delivers_frames_buffered_before_ack() {
    let Opening { peer, session } = open_handshake(Duration::from_secs(2)).await;

    peer.push(&tick("BTCUSDT", 1));
    peer.push(&json!({"result": null, "id": 99}));
    peer.push(&json!({"result": null, "id": 7}));

    let session = timeout(WAIT, session).await.unwrap().unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Subscribed);

    let (handler, mut events) = collector();
    let drain = CancellationToken::new();
    let mut state = session.watch_state();
    let running = tokio::spawn(session.run(Arc::new(handler), drain.clone()));

    assert_eq!(next_event(&mut events).await.timestamp(), 1);
    peer.push(&tick("BTCUSDT", 2));
    assert_eq!(next_event(&mut events).await.timestamp(), 2);

    drain.cancel();
    assert_eq!(timeout(WAIT, running).await.unwrap().unwrap(), Ok(()));
    assert_eq!(*state.borrow_and_update(), SessionState::Closed);
    assert!(peer.is_closed());
}

#[tokio::test]
async fn handshake_rejection_closes_connection() {
    let Opening { peer, session } = open_handshake(Duration::from_secs(2)).await;

    peer.push(&json!({"error": {"code": 2, "msg": "Invalid symbol"}, "id": 7}));

    let err = timeout(WAIT, session).await.unwrap().unwrap().unwrap_err();
    assert_eq!(
        err,
        SessionError::Subscribe(SubscribeError::Rejected("Invalid symbol".to_string()))
    );
    assert!(peer.is_closed());
}

#[tokio::test]
async fn handshake_times_out_without_ack() {
    let Opening { peer, session } = open_handshake(Duration::from_millis(100)).await;

    let err = timeout(WAIT, session).await.unwrap().unwrap().unwrap_err();
    assert_eq!(
        err,
        SessionError::Subscribe(SubscribeError::Timeout(Duration::from_millis(100)))
    );
    assert!(peer.is_closed());
}

#[tokio::test]
async fn handshake_fails_when_peer_hangs_up() {
    let Opening { mut peer, session } = open_handshake(Duration::from_secs(2)).await;

    peer.hang_up();

    let err = timeout(WAIT, session).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err, SessionError::Subscribe(SubscribeError::ConnectionClosed));
}

// =============================================================================
// Delivery
// =============================================================================

fn supervisor(transport: Arc<MockTransport>) -> ConnectionSupervisor {
    ConnectionSupervisor::new(
        binance::profile().unwrap(),
        transport,
        Arc::new(StaticSymbolSource::new(["BTCUSDT", "ETHUSDT"])),
        config(None),
    )
}

fn btcusdt() -> Option<Vec<Symbol>> {
    Some(vec![Symbol::parse("BTCUSDT").unwrap()])
}

#[tokio::test]
async fn handler_errors_and_panics_do_not_stop_the_stream() {
    let (transport, mut peers) = MockTransport::new();
    let supervisor = supervisor(Arc::clone(&transport));
    let mut diagnostics = supervisor.diagnostics();

    let (tx, mut events) = mpsc::unbounded_channel();
    let handler = move |event: NormalizedEvent| -> anyhow::Result<()> {
        match event.timestamp() {
            1 => anyhow::bail!("cannot store {}", event.symbol()),
            2 => panic!("handler exploded"),
            _ => {
                let _ = tx.send(event);
                Ok(())
            }
        }
    };

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();
    let peer = next_peer(&mut peers).await;

    for timestamp in 1..=3 {
        peer.push(&tick("BTCUSDT", timestamp));
    }
    assert_eq!(
        timeout(WAIT, events.recv()).await.unwrap().unwrap().timestamp(),
        3
    );

    let mut seen = Vec::new();
    wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
        matches!(d, Diagnostic::HandlerFailed { error, .. } if error.contains("panicked"))
    })
    .await;
    let failures: Vec<&str> = seen
        .iter()
        .filter_map(|d| match d {
            Diagnostic::HandlerFailed { error, .. } => Some(error.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        failures,
        vec!["cannot store BTCUSDT", "handler panicked: handler exploded"]
    );

    assert_eq!(transport.attempts(), 1);
    handle.cancel().await;
}

#[tokio::test]
async fn malformed_payload_is_reported_and_skipped() {
    let (transport, mut peers) = MockTransport::new();
    let supervisor = supervisor(Arc::clone(&transport));
    let mut diagnostics = supervisor.diagnostics();
    let (handler, mut events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push(&json!({"E": 1, "s": "BTCUSDT", "b": "0.05"}));
    peer.push(&tick("BTCUSDT", 2));

    let event = next_event(&mut events).await;
    assert_eq!(event.timestamp(), 2);
    assert_eq!(event.exchange(), "binance");

    let mut seen = Vec::new();
    wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
        matches!(d, Diagnostic::PayloadRejected { .. })
    })
    .await;
    let Some(Diagnostic::PayloadRejected { error, .. }) = seen.last() else {
        unreachable!()
    };
    assert!(matches!(
        error,
        NormalizeError::MalformedPayload {
            field: CanonicalField::Ask,
            ..
        }
    ));

    assert_eq!(transport.attempts(), 1);
    handle.cancel().await;
}

#[tokio::test]
async fn combined_envelope_and_aggregate_arrays_are_unwrapped() {
    let (transport, mut peers) = MockTransport::new();
    let supervisor = supervisor(transport);
    let (handler, mut events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, None, handler)
        .await
        .unwrap();
    let peer = next_peer(&mut peers).await;
    assert_eq!(
        peer.url,
        "wss://stream.binance.com:9443/stream?streams=!ticker@arr"
    );

    peer.push(&json!({
        "stream": "!ticker@arr",
        "data": [tick("BTCUSDT", 1), tick("ETHUSDT", 2)]
    }));
    peer.push(&json!({"stream": "btcusdt@ticker", "data": tick("BTCUSDT", 3)}));

    let delivered: Vec<(String, i64)> = [
        next_event(&mut events).await,
        next_event(&mut events).await,
        next_event(&mut events).await,
    ]
    .iter()
    .map(|e| (e.symbol().to_string(), e.timestamp()))
    .collect();
    assert_eq!(
        delivered,
        vec![
            ("BTCUSDT".to_string(), 1),
            ("ETHUSDT".to_string(), 2),
            ("BTCUSDT".to_string(), 3),
        ]
    );

    handle.cancel().await;
}

#[tokio::test]
async fn sporadic_garbage_is_tolerated() {
    let (transport, mut peers) = MockTransport::new();
    let supervisor = supervisor(Arc::clone(&transport));
    let (handler, mut events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push_raw(b"not json");
    peer.push_raw(b"42");
    peer.push(&tick("BTCUSDT", 1));
    peer.push_raw(b"{truncated");
    peer.push_raw(b"\"text\"");
    peer.push(&tick("BTCUSDT", 2));

    assert_eq!(next_event(&mut events).await.timestamp(), 1);
    assert_eq!(next_event(&mut events).await.timestamp(), 2);
    assert_eq!(transport.attempts(), 1);

    handle.cancel().await;
}

#[tokio::test]
async fn undecodable_storm_replaces_the_session() {
    let (transport, mut peers) = MockTransport::new();
    let supervisor = supervisor(Arc::clone(&transport));
    let mut diagnostics = supervisor.diagnostics();
    let (handler, mut events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();
    let first = next_peer(&mut peers).await;

    for _ in 0..3 {
        first.push_raw(b"<html>rate limited</html>");
    }

    let mut seen = Vec::new();
    wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
        matches!(d, Diagnostic::SessionFailed { .. })
    })
    .await;
    assert_eq!(
        seen.iter()
            .filter(|d| matches!(d, Diagnostic::FrameUndecodable { .. }))
            .count(),
        3
    );
    assert_eq!(
        seen.last(),
        Some(&Diagnostic::SessionFailed {
            session: SessionId::new(1),
            error: "3 consecutive undecodable frames".to_string(),
        })
    );
    assert!(first.is_closed());

    let second = next_peer(&mut peers).await;
    second.push(&tick("BTCUSDT", 5));
    assert_eq!(next_event(&mut events).await.timestamp(), 5);
    assert_eq!(transport.attempts(), 2);

    handle.cancel().await;
}
