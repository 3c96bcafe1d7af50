// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus Interface Abstraction
//!
//! The reader only needs five operations from a publish/subscribe client:
//! connect, subscribe, unsubscribe, publish and drain. They are captured by
//! [`BusConnector`] and [`BusClient`] so the runtime does not depend on a
//! concrete transport.
//!
//! # Implementations
//!
//! - [`crate::nats::NatsConnector`] -- NATS server via `async-nats`
//! - [`InMemoryBus`] -- in-process broker for tests and demos

use crate::endpoint::BusUrl;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the per-subscription delivery channel.
pub const SUBSCRIPTION_CAPACITY: usize = 256;

/// Message received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Reply topic, for request/reply publishers
    pub reply: Option<String>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            reply: None,
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

/// Settings applied to a single connection attempt
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound for one attempt
    pub connect_timeout: Duration,
    /// Name announced to the server
    pub client_name: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            client_name: "sensor-reader".to_string(),
        }
    }
}

/// Asynchronous transport fault reported outside of any call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    Disconnected,
    Timeout,
    NoServers,
    Closed,
    Server(String),
    Client(String),
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Timeout => f.write_str("timeout"),
            Self::NoServers => f.write_str("no servers available"),
            Self::Closed => f.write_str("connection closed"),
            Self::Server(e) => write!(f, "server error: {}", e),
            Self::Client(e) => write!(f, "client error: {}", e),
        }
    }
}

/// Callback invoked by the transport on asynchronous faults
pub type FaultCallback = Arc<dyn Fn(TransportFault) + Send + Sync>;

/// Live subscription: an id for unsubscribing plus the delivery channel
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub topic: String,
    pub messages: mpsc::Receiver<BusMessage>,
}

/// Opens sessions against a bus endpoint
#[async_trait]
pub trait BusConnector: Send + Sync {
    type Client: BusClient;

    /// Make one connection attempt, bounded by `options.connect_timeout`
    async fn connect(
        &self,
        url: &BusUrl,
        options: &ConnectOptions,
        on_fault: FaultCallback,
    ) -> Result<Self::Client>;
}

/// Connected bus session
#[async_trait]
pub trait BusClient: Send + Sync + 'static {
    /// Subscribe to a topic
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;

    /// Remove interest in a subscription; its channel closes once pending
    /// messages have been delivered
    async fn unsubscribe(&self, id: u64) -> Result<()>;

    /// Publish a payload (fire-and-forget)
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Flush outstanding publishes and close the session
    async fn drain(&self) -> Result<()>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Default)]
struct Broker {
    subscribers: Mutex<HashMap<u64, (String, mpsc::Sender<BusMessage>)>>,
    published: Mutex<Vec<BusMessage>>,
    fault_callbacks: Mutex<Vec<FaultCallback>>,
    next_id: AtomicU64,
    failing_connects: AtomicUsize,
    connect_attempts: AtomicUsize,
    drained_clients: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Broker {
    fn deliver(&self, message: BusMessage) {
        lock(&self.published).push(message.clone());

        let subscribers = lock(&self.subscribers);
        for (id, (topic, tx)) in subscribers.iter() {
            if *topic != message.topic {
                continue;
            }
            if tx.try_send(message.clone()).is_err() {
                tracing::debug!("Dropping message for subscription {} (channel full)", id);
            }
        }
    }
}

/// In-process bus broker
///
/// Every clone shares the same broker. Messages published by any client are
/// delivered to every subscription on the same topic and recorded so tests
/// can inspect them.
///
/// Unsubscribing and draining follow the [`BusClient`] contract of the NATS
/// transport: a removed subscription still yields the messages already
/// queued on its channel, then ends.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    broker: Arc<Broker>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.broker.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts seen so far
    pub fn connect_attempts(&self) -> usize {
        self.broker.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of clients that drained their session
    pub fn drained_clients(&self) -> usize {
        self.broker.drained_clients.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.broker.subscribers)
            .values()
            .filter(|(t, _)| t == topic)
            .count()
    }

    /// Publish without a client, as an external producer would
    pub fn inject(&self, message: BusMessage) {
        self.broker.deliver(message);
    }

    /// Messages published on a topic, oldest first
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        lock(&self.broker.published)
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Report a transport fault to every connected client
    pub fn emit_fault(&self, fault: TransportFault) {
        let callbacks = lock(&self.broker.fault_callbacks).clone();
        for callback in callbacks {
            callback(fault.clone());
        }
    }
}

#[async_trait]
impl BusConnector for InMemoryBus {
    type Client = InMemoryClient;

    async fn connect(
        &self,
        url: &BusUrl,
        _options: &ConnectOptions,
        on_fault: FaultCallback,
    ) -> Result<Self::Client> {
        self.broker.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self.broker.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.broker
                .failing_connects
                .store(failing - 1, Ordering::SeqCst);
            bail!("connection refused by {}", url);
        }

        lock(&self.broker.fault_callbacks).push(on_fault);

        Ok(InMemoryClient {
            broker: Arc::clone(&self.broker),
            subscriptions: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }
}

/// Client session on an [`InMemoryBus`]
pub struct InMemoryClient {
    broker: Arc<Broker>,
    subscriptions: Mutex<HashSet<u64>>,
    closed: AtomicBool,
}

impl InMemoryClient {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("connection closed");
        }
        Ok(())
    }
}

#[async_trait]
impl BusClient for InMemoryClient {
    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        self.ensure_open()?;

        let id = self.broker.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        lock(&self.broker.subscribers).insert(id, (topic.to_string(), tx));
        lock(&self.subscriptions).insert(id);

        Ok(Subscription {
            id,
            topic: topic.to_string(),
            messages: rx,
        })
    }

    async fn unsubscribe(&self, id: u64) -> Result<()> {
        if !lock(&self.subscriptions).remove(&id) {
            return Err(anyhow!("unknown subscription {}", id));
        }
        lock(&self.broker.subscribers).remove(&id);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.broker.deliver(BusMessage::new(topic, payload));
        Ok(())
    }

    async fn drain(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let ids: Vec<u64> = lock(&self.subscriptions).drain().collect();
        let mut subscribers = lock(&self.broker.subscribers);
        for id in ids {
            subscribers.remove(&id);
        }
        drop(subscribers);

        self.broker.drained_clients.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fault callback that only logs, as transports report faults out of band
pub fn logging_fault_callback(context: &'static str) -> FaultCallback {
    Arc::new(move |fault| {
        tracing::error!("{} cannot reach bus server: {}", context, fault);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn url() -> BusUrl {
        BusUrl::default()
    }

    fn noop() -> FaultCallback {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_publish_reaches_topic_subscribers() {
        let bus = InMemoryBus::new();
        let client = bus
            .connect(&url(), &ConnectOptions::default(), noop())
            .await
            .unwrap();

        let mut sensors = client.subscribe("sensors").await.unwrap();
        let mut other = client.subscribe("other").await.unwrap();

        client.publish("sensors", b"[1 2 3]".to_vec()).await.unwrap();

        let message = sensors.messages.recv().await.unwrap();
        assert_eq!(message.payload, b"[1 2 3]");
        assert!(other.messages.try_recv().is_err());
        assert_eq!(bus.published("sensors").len(), 1);
    }

    #[tokio::test]
    async fn test_failing_connects() {
        let bus = InMemoryBus::new();
        bus.fail_next_connects(2);

        let options = ConnectOptions::default();
        assert!(bus.connect(&url(), &options, noop()).await.is_err());
        assert!(bus.connect(&url(), &options, noop()).await.is_err());
        assert!(bus.connect(&url(), &options, noop()).await.is_ok());
        assert_eq!(bus.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel_after_pending() {
        let bus = InMemoryBus::new();
        let client = bus
            .connect(&url(), &ConnectOptions::default(), noop())
            .await
            .unwrap();

        let mut sub = client.subscribe("app_command").await.unwrap();
        bus.inject(BusMessage::new("app_command", "1"));
        client.unsubscribe(sub.id).await.unwrap();
        assert_eq!(bus.subscriber_count("app_command"), 0);

        assert_eq!(sub.messages.recv().await.unwrap().payload, b"1");
        assert!(sub.messages.recv().await.is_none());
        assert!(client.unsubscribe(sub.id).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_closes_session() {
        let bus = InMemoryBus::new();
        let client = bus
            .connect(&url(), &ConnectOptions::default(), noop())
            .await
            .unwrap();
        let _sub = client.subscribe("sensors").await.unwrap();

        client.drain().await.unwrap();
        client.drain().await.unwrap();

        assert_eq!(bus.drained_clients(), 1);
        assert_eq!(bus.subscriber_count("sensors"), 0);
        assert!(client.publish("sensors", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_fault_callbacks_invoked() {
        let bus = InMemoryBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: FaultCallback = Arc::new(move |fault| lock(&sink).push(fault));

        let _client = bus
            .connect(&url(), &ConnectOptions::default(), callback)
            .await
            .unwrap();
        bus.emit_fault(TransportFault::NoServers);

        assert_eq!(*lock(&seen), vec![TransportFault::NoServers]);
    }

    #[traced_test]
    #[test]
    fn test_logging_fault_callback_logs_error() {
        let callback = logging_fault_callback("Sensor reader");
        callback(TransportFault::Closed);

        assert!(logs_contain("ERROR"));
        assert!(logs_contain(
            "Sensor reader cannot reach bus server: connection closed"
        ));
    }
}
