// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NATS-backed bus implementation.
//!
//! Each subscription is bridged into an mpsc channel by a forwarder task.
//! Unsubscribing drains the NATS subscription first, so messages the server
//! already sent are still delivered before the channel closes.

use crate::bus::{
    BusClient, BusConnector, BusMessage, ConnectOptions, FaultCallback, Subscription,
    TransportFault, SUBSCRIPTION_CAPACITY,
};
use crate::endpoint::BusUrl;
use anyhow::{anyhow, Context, Result};
use async_nats::Event;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Map a connection event onto a transport fault.
///
/// `Closed` is expected once the session is being drained and is not a
/// fault then.
fn fault_for_event(event: &Event, closing: bool) -> Option<TransportFault> {
    match event {
        Event::Disconnected => Some(TransportFault::Disconnected),
        Event::Closed if !closing => Some(TransportFault::Closed),
        Event::ServerError(e) => Some(TransportFault::Server(e.to_string())),
        Event::ClientError(e) => Some(TransportFault::Client(e.to_string())),
        Event::LameDuckMode => Some(TransportFault::Server("entering lame duck mode".into())),
        Event::SlowConsumer(sid) => Some(TransportFault::Client(format!(
            "slow consumer on subscription {}",
            sid
        ))),
        _ => None,
    }
}

/// Connects to a NATS server.
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsConnector;

#[async_trait]
impl BusConnector for NatsConnector {
    type Client = NatsClient;

    async fn connect(
        &self,
        url: &BusUrl,
        options: &ConnectOptions,
        on_fault: FaultCallback,
    ) -> Result<Self::Client> {
        let closing = Arc::new(AtomicBool::new(false));
        let closing_events = Arc::clone(&closing);

        let client = async_nats::ConnectOptions::new()
            .name(&options.client_name)
            .connection_timeout(options.connect_timeout)
            .event_callback(move |event| {
                let on_fault = on_fault.clone();
                let closing = closing_events.load(Ordering::SeqCst);
                async move {
                    match fault_for_event(&event, closing) {
                        Some(fault) => on_fault(fault),
                        None => tracing::debug!("NATS event: {}", event),
                    }
                }
            })
            .connect(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to NATS server at {}", url))?;

        Ok(NatsClient {
            client,
            forwarders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            closing,
        })
    }
}

/// Source of inbound messages for a forwarder.
#[async_trait]
trait InboundStream: Send + 'static {
    /// Next message, `None` once the stream has ended.
    async fn next_message(&mut self) -> Option<BusMessage>;

    /// Stop interest; buffered messages are still yielded, then the stream ends.
    async fn drain(&mut self) -> Result<()>;
}

#[async_trait]
impl InboundStream for async_nats::Subscriber {
    async fn next_message(&mut self) -> Option<BusMessage> {
        let message = self.next().await?;
        Some(BusMessage {
            topic: message.subject.to_string(),
            payload: message.payload.to_vec(),
            reply: message.reply.map(|r| r.to_string()),
        })
    }

    async fn drain(&mut self) -> Result<()> {
        async_nats::Subscriber::drain(self)
            .await
            .map_err(|e| anyhow!("{}", e))
    }
}

/// Move messages from `stream` into `tx` until the stream ends.
///
/// Cancelling drains the stream, and everything it still yields is
/// forwarded before the task stops.
fn spawn_forwarder<S: InboundStream>(
    mut stream: S,
    mut cancelled: oneshot::Receiver<()>,
    tx: mpsc::Sender<BusMessage>,
    name: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut draining = false;
        loop {
            let next = if draining {
                stream.next_message().await
            } else {
                tokio::select! {
                    _ = &mut cancelled => {
                        if let Err(e) = stream.drain().await {
                            tracing::warn!("Failed to drain subscription '{}': {:#}", name, e);
                            break;
                        }
                        draining = true;
                        continue;
                    }
                    next = stream.next_message() => next,
                }
            };

            let Some(message) = next else { break };
            if tx.send(message).await.is_err() {
                break;
            }
        }
        tracing::trace!("Forwarder for '{}' stopped", name);
    })
}

/// Task moving messages from a NATS subscriber into a delivery channel.
struct Forwarder {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Forwarder {
    async fn stop(self) -> Result<()> {
        // the forwarder may already have exited if the server closed the stream
        let _ = self.cancel.send(());
        self.task
            .await
            .map_err(|e| anyhow!("subscription forwarder failed: {}", e))
    }
}

/// Connected NATS session.
pub struct NatsClient {
    client: async_nats::Client,
    forwarders: Mutex<HashMap<u64, Forwarder>>,
    next_id: AtomicU64,
    closing: Arc<AtomicBool>,
}

impl NatsClient {
    fn forwarders(&self) -> MutexGuard<'_, HashMap<u64, Forwarder>> {
        match self.forwarders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl BusClient for NatsClient {
    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .with_context(|| format!("Failed to subscribe to '{}'", topic))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let (cancel, cancelled) = oneshot::channel::<()>();
        let task = spawn_forwarder(subscriber, cancelled, tx, topic.to_string());

        self.forwarders().insert(id, Forwarder { cancel, task });

        Ok(Subscription {
            id,
            topic: topic.to_string(),
            messages: rx,
        })
    }

    async fn unsubscribe(&self, id: u64) -> Result<()> {
        let forwarder = self
            .forwarders()
            .remove(&id)
            .ok_or_else(|| anyhow!("unknown subscription {}", id))?;
        forwarder.stop().await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .with_context(|| format!("Failed to publish on '{}'", topic))
    }

    async fn drain(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let remaining: Vec<Forwarder> = self.forwarders().drain().map(|(_, f)| f).collect();
        for forwarder in remaining {
            if let Err(e) = forwarder.stop().await {
                tracing::warn!("{:#}", e);
            }
        }

        self.client
            .drain()
            .await
            .context("Failed to drain NATS connection")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::{unbounded, UnboundedReceiver};

    struct ChannelStream {
        messages: UnboundedReceiver<BusMessage>,
        drained: Arc<AtomicBool>,
    }

    #[async_trait]
    impl InboundStream for ChannelStream {
        async fn next_message(&mut self) -> Option<BusMessage> {
            self.messages.next().await
        }

        async fn drain(&mut self) -> Result<()> {
            self.drained.store(true, Ordering::SeqCst);
            self.messages.close();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancelled_forwarder_delivers_buffered_messages() {
        let (source, messages) = unbounded();
        let drained = Arc::new(AtomicBool::new(false));
        for code in ["1", "0", "2"] {
            source
                .unbounded_send(BusMessage::new("app_command", code))
                .unwrap();
        }

        let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let (cancel, cancelled) = oneshot::channel();
        let stream = ChannelStream {
            messages,
            drained: Arc::clone(&drained),
        };
        let forwarder = Forwarder {
            cancel,
            task: spawn_forwarder(stream, cancelled, tx, "app_command".to_string()),
        };
        forwarder.stop().await.unwrap();

        // the source is still open, yet the channel ends after the backlog
        assert!(drained.load(Ordering::SeqCst));
        let mut payloads = Vec::new();
        while let Some(message) = rx.recv().await {
            payloads.push(message.payload);
        }
        assert_eq!(payloads, vec![b"1".to_vec(), b"0".to_vec(), b"2".to_vec()]);
        drop(source);
    }

    #[tokio::test]
    async fn test_forwarder_stops_when_stream_ends() {
        let (source, messages) = unbounded();
        source
            .unbounded_send(BusMessage::new("sensors", "[1 2 3]"))
            .unwrap();
        drop(source);

        let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let (_cancel, cancelled) = oneshot::channel();
        let stream = ChannelStream {
            messages,
            drained: Arc::new(AtomicBool::new(false)),
        };
        spawn_forwarder(stream, cancelled, tx, "sensors".to_string())
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().payload, b"[1 2 3]");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_closed_event_is_a_fault_unless_draining() {
        assert_eq!(
            fault_for_event(&Event::Closed, false),
            Some(TransportFault::Closed)
        );
        assert_eq!(fault_for_event(&Event::Closed, true), None);
        assert_eq!(
            fault_for_event(&Event::Disconnected, true),
            Some(TransportFault::Disconnected)
        );
        assert!(matches!(
            fault_for_event(&Event::LameDuckMode, false),
            Some(TransportFault::Server(_))
        ));
        assert!(matches!(
            fault_for_event(&Event::SlowConsumer(4), false),
            Some(TransportFault::Client(_))
        ));
        assert_eq!(fault_for_event(&Event::Connected, false), None);
    }
}
