//! Session Lifecycle Integration Tests
//!
//! Drives sessions through the public API with an in-process outbound queue.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::mpsc;

use portfolio_stream::{
    CloseReason, ControlMessage, Identity, InMemoryPortfolioData, NoPortfolioData,
    OutboundMessage, PortfolioDataPort, PortfolioHoldings, PositionSeed, SessionConfig, SessionId,
    SessionRegistry, SessionState, SnapshotGenerator, StreamContext, StreamSession,
};

const TICK: Duration = Duration::from_millis(200);

fn context(portfolio_data: Arc<dyn PortfolioDataPort>) -> Arc<StreamContext> {
    let config = SessionConfig {
        tick_interval: TICK,
        provider_timeout: Duration::from_millis(100),
        rng_seed: Some(42),
        ..SessionConfig::default()
    };
    Arc::new(StreamContext::new(
        config,
        SnapshotGenerator::default(),
        portfolio_data,
        Arc::new(SessionRegistry::new()),
    ))
}

async fn connect(
    context: &Arc<StreamContext>,
    identity: Identity,
) -> (Arc<StreamSession>, mpsc::Receiver<OutboundMessage>) {
    let (tx, mut rx) = mpsc::channel(32);
    let session = StreamSession::new(SessionId::generate(), identity, Arc::clone(context), tx);
    session.open().await.unwrap();
    assert_eq!(rx.recv().await.unwrap().kind(), "connection_established");
    (session, rx)
}

fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

#[tokio::test(start_paused = true)]
async fn full_lifecycle() {
    let context = context(Arc::new(NoPortfolioData));
    let (session, mut rx) = connect(&context, Identity::Anonymous).await;
    assert_eq!(session.state(), SessionState::Connected);

    session.handle_control(ControlMessage::StartUpdates).await.unwrap();
    assert_eq!(session.state(), SessionState::Streaming);

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    let a = first.snapshot().unwrap();
    let b = second.snapshot().unwrap();
    assert_eq!(first.kind(), "price_update");
    assert_eq!(b.total_value - a.total_value, b.total_change);

    session.handle_control(ControlMessage::StopUpdates).await.unwrap();
    assert_eq!(session.state(), SessionState::Paused);
    tokio::time::sleep(TICK * 4).await;
    assert!(drain(&mut rx).is_empty());

    session
        .handle_control(ControlMessage::RequestSnapshot { portfolio_id: None })
        .await
        .unwrap();
    let on_demand = rx.recv().await.unwrap();
    assert_eq!(on_demand.kind(), "portfolio_data");
    let c = on_demand.snapshot().unwrap();
    assert_eq!(c.total_value - b.total_value, c.total_change);
    assert_eq!(session.state(), SessionState::Paused);

    session.handle_control(ControlMessage::StartUpdates).await.unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(rx.recv().await.unwrap().kind(), "price_update");

    assert!(session.close(CloseReason::ClientDisconnected));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(context.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sessions_are_isolated() {
    let context = context(Arc::new(NoPortfolioData));
    let (alice, mut alice_rx) = connect(&context, Identity::Authenticated("alice".into())).await;
    let (bob, mut bob_rx) = connect(&context, Identity::Authenticated("bob".into())).await;
    assert_eq!(context.registry().len(), 2);

    alice.start();
    tokio::time::sleep(TICK * 2 + TICK / 2).await;

    assert_eq!(drain(&mut alice_rx).len(), 3);
    assert!(drain(&mut bob_rx).is_empty());
    assert_eq!(bob.state(), SessionState::Connected);

    bob.start();
    alice.stop();
    tokio::time::sleep(TICK + TICK / 2).await;

    assert!(drain(&mut alice_rx).is_empty());
    assert_eq!(drain(&mut bob_rx).len(), 2);

    alice.close(CloseReason::ClientDisconnected);
    assert_eq!(context.registry().len(), 1);
    assert_eq!(bob.state(), SessionState::Streaming);
    bob.close(CloseReason::ClientDisconnected);
}

#[tokio::test(start_paused = true)]
async fn registry_tracks_states() {
    let context = context(Arc::new(NoPortfolioData));
    let (a, _a_rx) = connect(&context, Identity::Anonymous).await;
    let (b, _b_rx) = connect(&context, Identity::Anonymous).await;
    let (_c, _c_rx) = connect(&context, Identity::Anonymous).await;

    a.start();
    b.start();
    b.stop();

    let stats = context.registry().stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.streaming, 1);
    assert_eq!(stats.paused, 1);
    assert_eq!(stats.connected, 1);

    let listed = context.registry().list_active();
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|s| s.user == "anonymous"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_every_session() {
    let context = context(Arc::new(NoPortfolioData));
    let (a, mut a_rx) = connect(&context, Identity::Anonymous).await;
    let (b, mut b_rx) = connect(&context, Identity::Anonymous).await;
    a.start();
    a_rx.recv().await.unwrap();

    let registry = Arc::clone(context.registry());
    assert_eq!(registry.shutdown_all(), 2);
    assert!(registry.is_shutting_down());

    for session in [&a, &b] {
        session.closed_token().cancelled().await;
        session.close(CloseReason::Shutdown);
    }
    assert!(registry.wait_until_empty(Duration::from_secs(1)).await);

    for rx in [&mut a_rx, &mut b_rx] {
        let notices: Vec<_> = drain(rx)
            .into_iter()
            .filter(|m| m.kind() == "error")
            .collect();
        assert_eq!(notices.len(), 1);
    }
}

#[tokio::test]
async fn holdings_seed_the_baseline() {
    let store = InMemoryPortfolioData::with_portfolios([PortfolioHoldings {
        portfolio_id: "retirement".to_string(),
        portfolio_name: "Retirement".to_string(),
        positions: vec![
            PositionSeed {
                symbol: "VTI".to_string(),
                name: Some("Vanguard Total Stock Market".to_string()),
                price: Decimal::new(25_000, 2),
                quantity: Decimal::from(40),
            },
            PositionSeed {
                symbol: "BND".to_string(),
                name: None,
                price: Decimal::new(7_250, 2),
                quantity: Decimal::from(100),
            },
        ],
    }]);
    let context = context(Arc::new(store));
    let (session, mut rx) = connect(&context, Identity::Anonymous).await;

    session.request_snapshot(Some("retirement")).await.unwrap();
    let snapshot = rx.recv().await.unwrap().snapshot().cloned().unwrap();

    assert_eq!(snapshot.portfolio_name, "Retirement");
    assert_eq!(snapshot.symbols(), vec!["VTI", "BND"]);
    assert_eq!(snapshot.total_value, Decimal::new(1_725_000, 2));
    assert_eq!(snapshot.total_change, Decimal::ZERO);

    session.request_snapshot(None).await.unwrap();
    let fallback = rx.recv().await.unwrap().snapshot().cloned().unwrap();
    assert_eq!(fallback.symbols(), vec!["AAPL", "MSFT", "GOOGL"]);
}
