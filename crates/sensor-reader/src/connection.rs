// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus connection manager
//!
//! Owns the bus session and its two inbound subscriptions.
//!
//! # Lifecycle
//!
//! 1. `connect` retries until a session is up and both topics are subscribed
//! 2. one dispatcher task per subscription feeds [`MessageHandlers`]
//! 3. `disconnect` unsubscribes, waits for dispatchers, drains, releases

use crate::bus::{
    logging_fault_callback, BusClient, BusConnector, BusMessage, ConnectOptions, Subscription,
};
use crate::endpoint::BusUrl;
use crate::handlers::MessageHandlers;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Payload sent back to raw data publishers that asked for a reply.
pub const RAW_DATA_ACK: &[u8] = b"OK";

/// Inbound topics and the handler bound to each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundRoute {
    RawData,
    Command,
}

impl InboundRoute {
    pub const ALL: [InboundRoute; 2] = [InboundRoute::RawData, InboundRoute::Command];
}

/// Topic names for the inbound routes.
#[derive(Debug, Clone)]
pub struct InboundTopics {
    pub raw_data: String,
    pub command: String,
}

impl InboundTopics {
    pub fn topic(&self, route: InboundRoute) -> &str {
        match route {
            InboundRoute::RawData => &self.raw_data,
            InboundRoute::Command => &self.command,
        }
    }
}

impl Default for InboundTopics {
    fn default() -> Self {
        Self {
            raw_data: "sensors".to_string(),
            command: "app_command".to_string(),
        }
    }
}

struct ActiveRoute {
    route: InboundRoute,
    subscription_id: u64,
    topic: String,
    dispatcher: JoinHandle<()>,
}

/// Connection manager for one bus session.
pub struct BusConnectionManager<C: BusConnector> {
    connector: C,
    url: BusUrl,
    options: ConnectOptions,
    reconnect_delay: Duration,
    topics: InboundTopics,
    client: Option<Arc<C::Client>>,
    routes: Vec<ActiveRoute>,
}

impl<C: BusConnector> BusConnectionManager<C> {
    pub fn new(
        connector: C,
        url: BusUrl,
        options: ConnectOptions,
        reconnect_delay: Duration,
        topics: InboundTopics,
    ) -> Self {
        Self {
            connector,
            url,
            options,
            reconnect_delay,
            topics,
            client: None,
            routes: Vec::new(),
        }
    }

    pub fn url(&self) -> &BusUrl {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Connect and subscribe, retrying every `reconnect_delay` until it works.
    ///
    /// Never fails. Calling it on a connected manager is a no-op.
    pub async fn connect(&mut self, handlers: Arc<MessageHandlers>) {
        if self.is_connected() {
            return;
        }

        loop {
            match self.try_connect(&handlers).await {
                Ok(()) => {
                    tracing::info!("Successfully connected to bus server on URI: {}", self.url);
                    return;
                }
                Err(e) => {
                    tracing::error!("Cannot connect to bus server on URI {}: {:#}", self.url, e);
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    async fn try_connect(&mut self, handlers: &Arc<MessageHandlers>) -> Result<()> {
        let client = self
            .connector
            .connect(
                &self.url,
                &self.options,
                logging_fault_callback("Sensor reader"),
            )
            .await?;

        let mut subscriptions = Vec::with_capacity(InboundRoute::ALL.len());
        for route in InboundRoute::ALL {
            match client.subscribe(self.topics.topic(route)).await {
                Ok(subscription) => subscriptions.push((route, subscription)),
                Err(e) => {
                    // half-open session, release it before the next attempt
                    drop(subscriptions);
                    if let Err(drain_err) = client.drain().await {
                        tracing::debug!("Failed to drain partial session: {}", drain_err);
                    }
                    return Err(e);
                }
            }
        }

        let client = Arc::new(client);
        for (route, subscription) in subscriptions {
            let subscription_id = subscription.id;
            let topic = subscription.topic.clone();
            let dispatcher = spawn_dispatcher(
                route,
                subscription,
                Arc::clone(handlers),
                Arc::clone(&client),
            );
            tracing::debug!("Subscribed to '{}' ({:?})", topic, route);
            self.routes.push(ActiveRoute {
                route,
                subscription_id,
                topic,
                dispatcher,
            });
        }
        self.client = Some(client);
        Ok(())
    }

    /// Publish a payload on `topic`.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow!("not connected to bus server"))?;
        client.publish(topic, payload).await
    }

    /// Unsubscribe both routes, let in-flight messages finish, then drain.
    ///
    /// Consumes the manager, so the session is released at most once.
    pub async fn disconnect(mut self) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        for route in self.routes.drain(..) {
            if let Err(e) = client.unsubscribe(route.subscription_id).await {
                tracing::warn!("Failed to unsubscribe from '{}': {:#}", route.topic, e);
            }
            if let Err(e) = route.dispatcher.await {
                tracing::warn!("Dispatcher for {:?} failed: {}", route.route, e);
            }
        }

        client.drain().await?;
        tracing::info!("Disconnected from bus server on URI: {}", self.url);
        Ok(())
    }
}

fn spawn_dispatcher<B: BusClient>(
    route: InboundRoute,
    mut subscription: Subscription,
    handlers: Arc<MessageHandlers>,
    client: Arc<B>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = subscription.messages.recv().await {
            dispatch(route, &message, &handlers, client.as_ref()).await;
        }
        tracing::trace!("Dispatcher for '{}' stopped", subscription.topic);
    })
}

async fn dispatch<B: BusClient>(
    route: InboundRoute,
    message: &BusMessage,
    handlers: &MessageHandlers,
    client: &B,
) {
    match route {
        InboundRoute::RawData => {
            handlers.handle_raw_data(message);
            if let Some(reply) = &message.reply {
                if let Err(e) = client.publish(reply, RAW_DATA_ACK.to_vec()).await {
                    tracing::debug!("Failed to acknowledge reading: {:#}", e);
                }
            }
        }
        InboundRoute::Command => {
            if let Err(e) = handlers.handle_command(message) {
                tracing::warn!("Rejected command: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::command::RunState;
    use crate::state::SharedState;
    use tracing_test::traced_test;

    fn manager(bus: &InMemoryBus) -> BusConnectionManager<InMemoryBus> {
        BusConnectionManager::new(
            bus.clone(),
            BusUrl::default(),
            ConnectOptions::default(),
            Duration::from_millis(5),
            InboundTopics::default(),
        )
    }

    fn handlers() -> Arc<MessageHandlers> {
        Arc::new(MessageHandlers::new(Arc::new(SharedState::new())))
    }

    #[traced_test]
    #[tokio::test]
    async fn test_connect_retries_until_available() {
        let bus = InMemoryBus::new();
        bus.fail_next_connects(3);

        let mut manager = manager(&bus);
        manager.connect(handlers()).await;

        assert!(manager.is_connected());
        assert_eq!(bus.connect_attempts(), 4);
        assert!(logs_contain("Cannot connect to bus server"));
        assert!(logs_contain(
            "Successfully connected to bus server on URI: nats://localhost:4222"
        ));
    }

    #[tokio::test]
    async fn test_subscribes_both_inbound_topics() {
        let bus = InMemoryBus::new();
        let mut manager = manager(&bus);
        manager.connect(handlers()).await;

        assert_eq!(bus.subscriber_count("sensors"), 1);
        assert_eq!(bus.subscriber_count("app_command"), 1);
    }

    #[tokio::test]
    async fn test_rejected_command_leaves_state() {
        let bus = InMemoryBus::new();
        let handlers = handlers();
        let mut manager = manager(&bus);
        manager.connect(Arc::clone(&handlers)).await;

        bus.inject(BusMessage::new("app_command", b"9".to_vec()));
        manager.disconnect().await.unwrap();

        assert_eq!(handlers.state().run_state(), RunState::Active);
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let bus = InMemoryBus::new();
        let manager = manager(&bus);
        assert!(manager.publish("publishing", b"x".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let bus = InMemoryBus::new();
        manager(&bus).disconnect().await.unwrap();
        assert_eq!(bus.drained_clients(), 0);
    }
}
