// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus connection manager over the in-memory bus.

use sensor_reader::{
    BusConnectionManager, BusMessage, BusUrl, ConnectOptions, InMemoryBus, InboundTopics,
    MessageHandlers, RunState, SharedState, TransportFault,
};
use std::sync::Arc;
use std::time::Duration;

fn manager(bus: &InMemoryBus) -> BusConnectionManager<InMemoryBus> {
    BusConnectionManager::new(
        bus.clone(),
        "nats://127.0.0.1:4222".parse::<BusUrl>().unwrap(),
        ConnectOptions::default(),
        Duration::from_millis(2),
        InboundTopics::default(),
    )
}

#[tokio::test]
async fn test_connect_survives_outage() {
    let bus = InMemoryBus::new();
    bus.fail_next_connects(10);

    let state = Arc::new(SharedState::new());
    let mut manager = manager(&bus);
    tokio::time::timeout(
        Duration::from_secs(5),
        manager.connect(Arc::new(MessageHandlers::new(Arc::clone(&state)))),
    )
    .await
    .unwrap();

    assert!(manager.is_connected());
    assert_eq!(bus.connect_attempts(), 11);
}

#[tokio::test]
async fn test_raw_data_reply_acknowledged() {
    let bus = InMemoryBus::new();
    let state = Arc::new(SharedState::new());
    let mut manager = manager(&bus);
    manager
        .connect(Arc::new(MessageHandlers::new(Arc::clone(&state))))
        .await;

    bus.inject(BusMessage::new("sensors", b"[7 8 9]".to_vec()).with_reply("_INBOX.42"));
    bus.inject(BusMessage::new("sensors", b"[10 11 12]".to_vec()));
    manager.disconnect().await.unwrap();

    let acks = bus.published("_INBOX.42");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].payload, b"OK".to_vec());
    assert_eq!(state.latest(), Some(vec![10, 11, 12]));
}

#[tokio::test]
async fn test_disconnect_delivers_pending_then_releases() {
    let bus = InMemoryBus::new();
    let state = Arc::new(SharedState::new());
    let mut manager = manager(&bus);
    manager
        .connect(Arc::new(MessageHandlers::new(Arc::clone(&state))))
        .await;

    bus.inject(BusMessage::new("app_command", b"1".to_vec()));
    manager.disconnect().await.unwrap();

    // in-flight command was handled before the session closed
    assert_eq!(state.run_state(), RunState::Standby);
    assert_eq!(bus.drained_clients(), 1);
    assert_eq!(bus.subscriber_count("sensors"), 0);
    assert_eq!(bus.subscriber_count("app_command"), 0);

    bus.inject(BusMessage::new("app_command", b"0".to_vec()));
    assert_eq!(state.run_state(), RunState::Standby);
}

#[tokio::test]
async fn test_transport_faults_do_not_change_state() {
    let bus = InMemoryBus::new();
    let state = Arc::new(SharedState::new());
    let mut manager = manager(&bus);
    manager
        .connect(Arc::new(MessageHandlers::new(Arc::clone(&state))))
        .await;

    bus.emit_fault(TransportFault::Timeout);
    bus.emit_fault(TransportFault::NoServers);
    bus.emit_fault(TransportFault::Closed);

    assert!(manager.is_connected());
    assert_eq!(state.run_state(), RunState::Active);
    assert_eq!(bus.connect_attempts(), 1);
    manager.disconnect().await.unwrap();
}
