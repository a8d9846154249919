//! Supervisor Lifecycle Integration Tests
//!
//! Renewal ordering, reconnection backoff and cancellation against an
//! in-memory transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use market_stream::infrastructure::binance;
use market_stream::{
    ConnectionSupervisor, Diagnostic, SessionId, SessionState, StaticSymbolSource, StreamKind,
    SubscribeMode, SupervisorConfig, SupervisorState, Symbol,
};
use serde_json::json;
use tokio::time::timeout;

use support::{
    MockTransport, WAIT, collector, config, next_event, next_peer, tick, wait_for_diagnostic,
};

fn supervisor(
    transport: Arc<MockTransport>,
    mode: SubscribeMode,
    config: SupervisorConfig,
) -> ConnectionSupervisor {
    ConnectionSupervisor::new(
        binance::profile_with_mode(mode).unwrap(),
        transport,
        Arc::new(StaticSymbolSource::new(["BTCUSDT", "ETHUSDT"])),
        config,
    )
}

fn btcusdt() -> Option<Vec<Symbol>> {
    Some(vec![Symbol::parse("BTC/USDT").unwrap()])
}

const fn session(n: u64) -> SessionId {
    SessionId::new(n)
}

fn position(seen: &[Diagnostic], wanted: &Diagnostic) -> usize {
    seen.iter()
        .position(|d| d == wanted)
        .unwrap_or_else(|| panic!("{wanted:?} not in {seen:#?}"))
}

#[tokio::test]
async fn renewal_streams_successor_before_predecessor_closes() {
    let (transport, mut peers) = MockTransport::new();
    let supervisor = supervisor(
        transport,
        SubscribeMode::Combined,
        config(Some(Duration::from_millis(150))),
    );
    let mut diagnostics = supervisor.diagnostics();
    let (handler, mut events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();

    let first = next_peer(&mut peers).await;
    assert_eq!(
        first.url,
        "wss://stream.binance.com:9443/stream?streams=btcusdt@ticker"
    );
    first.push(&tick("BTCUSDT", 1));
    assert_eq!(next_event(&mut events).await.timestamp(), 1);

    let second = next_peer(&mut peers).await;
    assert_eq!(second.url, first.url);

    let mut seen = Vec::new();
    wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
        matches!(d, Diagnostic::Renewed { .. })
    })
    .await;

    let successor_streaming = position(
        &seen,
        &Diagnostic::SessionState {
            session: session(2),
            state: SessionState::Streaming,
        },
    );
    let predecessor_draining = position(
        &seen,
        &Diagnostic::SessionState {
            session: session(1),
            state: SessionState::Draining,
        },
    );
    let predecessor_closed = position(
        &seen,
        &Diagnostic::SessionState {
            session: session(1),
            state: SessionState::Closed,
        },
    );
    assert!(successor_streaming < predecessor_draining);
    assert!(predecessor_draining < predecessor_closed);
    assert_eq!(
        seen.last(),
        Some(&Diagnostic::Renewed {
            predecessor: session(1),
            successor: session(2),
        })
    );
    assert!(first.is_closed());
    assert!(!second.is_closed());

    second.push(&tick("BTCUSDT", 2));
    assert_eq!(next_event(&mut events).await.timestamp(), 2);

    handle.cancel().await;
    assert_eq!(handle.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn failed_renewal_keeps_current_session() {
    let (transport, mut peers) = MockTransport::new();
    let supervisor = supervisor(
        transport,
        SubscribeMode::Handshake,
        config(Some(Duration::from_millis(150))),
    );
    let mut diagnostics = supervisor.diagnostics();
    let (handler, mut events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();

    let mut first = next_peer(&mut peers).await;
    assert_eq!(first.url, "wss://stream.binance.com:9443/ws");
    assert_eq!(
        first.next_sent().await,
        json!({"method": "SUBSCRIBE", "params": ["btcusdt@ticker"], "id": 1})
    );
    first.push(&json!({"result": null, "id": 1}));

    // Renewal attempt: the exchange rejects the successor's subscription.
    let mut second = next_peer(&mut peers).await;
    assert_eq!(second.next_sent().await["id"], 2);
    second.push(&json!({"error": {"code": 2, "msg": "Invalid request"}, "id": 2}));

    let mut seen = Vec::new();
    wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
        matches!(d, Diagnostic::RenewalAbandoned { .. })
    })
    .await;
    let Some(Diagnostic::RenewalAbandoned { retained, error }) = seen.last() else {
        unreachable!()
    };
    assert_eq!(*retained, session(1));
    assert!(error.contains("Invalid request"), "{error}");
    assert!(second.is_closed());
    assert!(!first.is_closed());

    // The predecessor never stopped delivering.
    first.push(&tick("BTCUSDT", 7));
    assert_eq!(next_event(&mut events).await.timestamp(), 7);

    // Retried after backoff; this time the successor is accepted.
    let mut third = next_peer(&mut peers).await;
    assert_eq!(third.next_sent().await["id"], 3);
    third.push(&json!({"result": null, "id": 3}));

    wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
        matches!(d, Diagnostic::Renewed { .. })
    })
    .await;
    assert_eq!(
        seen.last(),
        Some(&Diagnostic::Renewed {
            predecessor: session(1),
            successor: session(3),
        })
    );
    assert!(first.is_closed());

    handle.cancel().await;
}

fn reconnect_delays(seen: &[Diagnostic]) -> Vec<(u32, Duration)> {
    seen.iter()
        .filter_map(|d| match d {
            Diagnostic::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect()
}

fn doubling_to_ceiling() -> Vec<(u32, Duration)> {
    vec![
        (1, Duration::from_millis(10)),
        (2, Duration::from_millis(20)),
        (3, Duration::from_millis(40)),
        (4, Duration::from_millis(40)),
    ]
}

#[tokio::test]
async fn reconnect_delays_double_up_to_ceiling_and_reset() {
    let (transport, mut peers) = MockTransport::new();
    transport.refuse_next(4);
    let supervisor = supervisor(
        Arc::clone(&transport),
        SubscribeMode::Combined,
        config(None),
    );
    let mut diagnostics = supervisor.diagnostics();
    let (handler, mut events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();

    let mut peer = next_peer(&mut peers).await;
    let mut seen = Vec::new();
    wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
        matches!(
            d,
            Diagnostic::SessionState {
                state: SessionState::Streaming,
                ..
            }
        )
    })
    .await;

    assert_eq!(reconnect_delays(&seen), doubling_to_ceiling());
    assert_eq!(transport.attempts(), 5);
    assert_eq!(
        seen.iter()
            .filter(|d| matches!(d, Diagnostic::SessionFailed { .. }))
            .count(),
        4
    );

    // A drop after the session carried data starts over from the initial delay.
    peer.push(&tick("BTCUSDT", 1));
    assert_eq!(next_event(&mut events).await.timestamp(), 1);
    peer.hang_up();
    seen.clear();
    wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
        matches!(d, Diagnostic::Reconnecting { .. })
    })
    .await;
    assert_eq!(
        seen.last(),
        Some(&Diagnostic::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(10),
        })
    );
    assert!(seen.iter().any(|d| matches!(
        d,
        Diagnostic::SessionFailed { session: s, error } if *s == session(5) && error.contains("closed by remote")
    )));

    let replacement = next_peer(&mut peers).await;
    assert_eq!(replacement.url, peer.url);
    replacement.push(&tick("BTCUSDT", 2));
    assert_eq!(next_event(&mut events).await.timestamp(), 2);

    handle.cancel().await;
    assert!(replacement.is_closed());
}

#[tokio::test]
async fn connections_dropped_before_any_data_keep_backing_off() {
    let (transport, mut peers) = MockTransport::new();
    let supervisor = supervisor(
        Arc::clone(&transport),
        SubscribeMode::Combined,
        config(None),
    );
    let mut diagnostics = supervisor.diagnostics();
    let (handler, mut events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();

    // The exchange accepts every connection and hangs up straight away.
    let mut seen = Vec::new();
    for _ in 0..4 {
        let mut peer = next_peer(&mut peers).await;
        peer.hang_up();
        wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
            matches!(d, Diagnostic::Reconnecting { .. })
        })
        .await;
    }
    assert_eq!(reconnect_delays(&seen), doubling_to_ceiling());
    assert_eq!(
        seen.iter()
            .filter(|d| matches!(
                d,
                Diagnostic::SessionFailed { error, .. } if error.contains("closed by remote")
            ))
            .count(),
        4
    );

    // Once the exchange recovers, delivery resumes and the backoff starts over.
    let mut recovered = next_peer(&mut peers).await;
    recovered.push(&tick("BTCUSDT", 5));
    assert_eq!(next_event(&mut events).await.timestamp(), 5);
    assert_eq!(transport.attempts(), 5);

    recovered.hang_up();
    seen.clear();
    wait_for_diagnostic(&mut diagnostics, &mut seen, |d| {
        matches!(d, Diagnostic::Reconnecting { .. })
    })
    .await;
    assert_eq!(reconnect_delays(&seen), vec![(1, Duration::from_millis(10))]);

    let replacement = next_peer(&mut peers).await;
    replacement.push(&tick("BTCUSDT", 6));
    assert_eq!(next_event(&mut events).await.timestamp(), 6);

    handle.cancel().await;
    assert!(replacement.is_closed());
}

#[tokio::test]
async fn cancel_is_idempotent_and_stops_everything() {
    let (transport, mut peers) = MockTransport::new();
    let supervisor = supervisor(
        Arc::clone(&transport),
        SubscribeMode::Combined,
        config(None),
    );
    let (handler, _events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();
    let peer = next_peer(&mut peers).await;

    let mut state = handle.watch_state();
    timeout(
        WAIT,
        state.wait_for(|s| matches!(s, SupervisorState::Streaming { .. })),
    )
    .await
    .unwrap()
    .unwrap();

    tokio::join!(handle.cancel(), handle.cancel());
    assert!(peer.is_closed());
    assert_eq!(handle.state(), SupervisorState::Stopped);

    handle.cancel().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn cancel_interrupts_backoff() {
    let (transport, _peers) = MockTransport::new();
    transport.refuse_next(u32::MAX);
    let mut config = config(None);
    config.backoff.initial_delay = Duration::from_secs(30);
    config.backoff.max_delay = Duration::from_secs(30);
    let supervisor = supervisor(Arc::clone(&transport), SubscribeMode::Combined, config);
    let (handler, _events) = collector();

    let handle = supervisor
        .listen(StreamKind::Tick, btcusdt(), handler)
        .await
        .unwrap();

    let mut state = handle.watch_state();
    timeout(
        WAIT,
        state.wait_for(|s| matches!(s, SupervisorState::Reconnecting { attempt: 1 })),
    )
    .await
    .unwrap()
    .unwrap();

    timeout(Duration::from_secs(1), handle.cancel())
        .await
        .expect("cancel waited out the backoff");
    assert_eq!(handle.state(), SupervisorState::Stopped);
    assert_eq!(transport.attempts(), 1);
}
