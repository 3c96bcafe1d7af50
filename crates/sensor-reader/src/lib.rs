// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Reader Service
//!
//! Ingests sensor readings from a publish/subscribe bus, republishes them in
//! normalized form and persists them to a relational store. A command topic
//! starts, stops and terminates acquisition.
//!
//! # Architecture
//!
//! ```text
//! SensorReaderService
//! +-- BusConnectionManager  (session, "sensors" + "app_command" routes)
//! |   +-- MessageHandlers   (parser / command state machine)
//! +-- SharedState           (run state + latest reading)
//! +-- AcquisitionLoop       (publish on "publishing", persist)
//! +-- PersistenceGateway    (PostgreSQL or SQLite backend)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sensor_reader::{Config, NatsConnector, SensorReaderService, SqliteConnector};
//!
//! let config = Config::builder().sample_len(64).build();
//! let service = SensorReaderService::new(config, NatsConnector, SqliteConnector::in_memory());
//! let report = service.run().await?;
//! ```

pub mod acquisition;
pub mod bus;
pub mod command;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod gateway;
pub mod handlers;
pub mod mock_sensor;
pub mod nats;
pub mod parser;
pub mod postgres;
pub mod sqlite;
pub mod state;
pub mod store;

pub use acquisition::{AcquisitionLoop, AcquisitionSettings, AcquisitionStats, TickOutcome};
pub use bus::{BusClient, BusConnector, BusMessage, ConnectOptions, InMemoryBus, TransportFault};
pub use command::{AppCommand, CommandDecodeError, RunState};
pub use config::{Config, ConfigError, StoreBackend, StoreConfig, TopicConfig};
pub use connection::{BusConnectionManager, InboundRoute, InboundTopics};
pub use endpoint::{BusUrl, EndpointError, StoreAddress};
pub use gateway::{GatewayStats, PersistenceGateway};
pub use handlers::MessageHandlers;
pub use mock_sensor::{MockSensor, MockSensorError};
pub use nats::NatsConnector;
pub use parser::{parse_raw_payload, render_sample, Sample};
pub use postgres::{PostgresConnector, PostgresStore};
pub use sqlite::{SqliteConnector, SqliteStore};
pub use state::{SharedState, Transition};
pub use store::{SampleStore, StoreConnector, StoredReading};

use anyhow::Result;
use std::sync::Arc;

/// Statistics collected over one service run
#[derive(Debug, Default, Clone)]
pub struct ServiceReport {
    pub acquisition: AcquisitionStats,
    pub store: GatewayStats,
}

/// Sensor Reader Service
///
/// # Type Parameters
///
/// - `B` -- Bus transport (e.g., `NatsConnector`)
/// - `C` -- Store backend (e.g., `PostgresConnector`)
pub struct SensorReaderService<B: BusConnector, C: StoreConnector> {
    config: Config,
    state: Arc<SharedState>,
    bus: BusConnectionManager<B>,
    gateway: PersistenceGateway<C>,
}

impl<B: BusConnector, C: StoreConnector> SensorReaderService<B, C> {
    pub fn new(config: Config, bus_connector: B, store_connector: C) -> Self {
        let options = ConnectOptions {
            connect_timeout: config.connect_timeout(),
            client_name: config.client_name.clone(),
        };
        let topics = InboundTopics {
            raw_data: config.topics.raw_data.clone(),
            command: config.topics.command.clone(),
        };
        let bus = BusConnectionManager::new(
            bus_connector,
            config.bus_url.clone(),
            options,
            config.reconnect_delay(),
            topics,
        );
        let gateway = PersistenceGateway::new(store_connector, config.store.table.clone())
            .with_null_sentinel(config.store.null_sentinel)
            .with_write_attempts(config.store.write_attempts);

        Self {
            config,
            state: Arc::new(SharedState::new()),
            bus,
            gateway,
        }
    }

    /// Shared run state, e.g. to request termination from a signal handler.
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Run until an `Exit` command (or an external termination request).
    ///
    /// Connects to the bus and the store (retrying both), runs the
    /// acquisition loop, then releases both connections exactly once.
    pub async fn run(self) -> Result<ServiceReport> {
        let Self {
            config,
            state,
            mut bus,
            mut gateway,
        } = self;

        tracing::info!("Starting Sensor Reader Service");
        tracing::info!("  Bus: {}", config.bus_url);
        tracing::info!(
            "  Topics: {} / {} -> {}",
            config.topics.raw_data,
            config.topics.command,
            config.topics.publishing
        );

        let handlers = Arc::new(MessageHandlers::new(Arc::clone(&state)));
        tokio::select! {
            _ = bus.connect(handlers) => {}
            _ = state.wait_terminating() => {
                tracing::info!("Termination requested before bus connection");
            }
        }

        while !state.is_terminating() && !gateway.is_connected() {
            if let Err(e) = gateway.connect().await {
                tracing::error!("{:#}", e);
                state.pause(config.reconnect_delay()).await;
            }
        }

        if gateway.is_connected() {
            if let Err(e) = gateway.setup_schema().await {
                tracing::error!("Failed to set up table '{}': {:#}", gateway.table(), e);
            }
        }

        let settings = AcquisitionSettings {
            sample_len: config.sample_len,
            report_interval: config.report_interval(),
            standby_poll: config.standby_poll(),
            publish_topic: config.topics.publishing.clone(),
        };
        let mut acquisition = AcquisitionLoop::new(settings, Arc::clone(&state));
        acquisition.run(&bus, &mut gateway).await;

        if let Err(e) = bus.disconnect().await {
            tracing::error!("Failed to close bus connection: {:#}", e);
        }
        if let Err(e) = gateway.disconnect().await {
            tracing::error!("Failed to close store connection: {:#}", e);
        }

        let report = ServiceReport {
            acquisition: acquisition.stats().clone(),
            store: gateway.stats().clone(),
        };
        tracing::info!(
            "Published {} readings, discarded {}, idle ticks {} (standby {})",
            report.acquisition.ticks_published,
            report.acquisition.samples_discarded,
            report.acquisition.empty_ticks + report.acquisition.standby_ticks,
            report.acquisition.standby_ticks
        );
        tracing::info!(
            "Stored {} rows ({} sentinel), {} write errors",
            report.store.rows_written,
            report.store.sentinel_rows,
            report.store.write_errors
        );
        tracing::info!("All closed, exiting");
        Ok(report)
    }
}
