// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acquisition loop
//!
//! Each tick reads the run state fresh, then either idles (standby, no data,
//! corrupt data) or publishes the latest reading and persists it.
//!
//! # Tick
//!
//! ```text
//! Terminating -> stop
//! Standby     -> sleep(standby_poll)
//! no reading  -> sleep(standby_poll)
//! bad length  -> warn, discard, sleep(standby_poll)
//! otherwise   -> publish, save, sleep(report_interval)
//! ```

use crate::bus::BusConnector;
use crate::connection::BusConnectionManager;
use crate::command::RunState;
use crate::gateway::PersistenceGateway;
use crate::parser::{render_sample, LengthMismatch, Sample, DEFAULT_SAMPLE_LEN};
use crate::state::SharedState;
use crate::store::StoreConnector;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Loop timing and output settings
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    /// Required number of values per reading
    pub sample_len: usize,
    /// Sleep after a published reading
    pub report_interval: Duration,
    /// Sleep while in standby or without a usable reading
    pub standby_poll: Duration,
    /// Outbound topic for normalized readings
    pub publish_topic: String,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sample_len: DEFAULT_SAMPLE_LEN,
            report_interval: Duration::from_secs(5),
            standby_poll: Duration::from_millis(200),
            publish_topic: "publishing".to_string(),
        }
    }
}

/// Loop statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Readings published on the bus
    pub ticks_published: u64,
    /// Readings dropped for a wrong length
    pub samples_discarded: u64,
    /// Ticks spent in standby
    pub standby_ticks: u64,
    /// Ticks without any reading
    pub empty_ticks: u64,
    /// Failed publishes
    pub publish_errors: u64,
    /// Readings lost to store failures
    pub store_errors: u64,
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Terminating,
    Standby,
    NoData,
    Discarded(LengthMismatch),
    Published,
}

pub struct AcquisitionLoop {
    settings: AcquisitionSettings,
    state: Arc<SharedState>,
    stats: AcquisitionStats,
}

impl AcquisitionLoop {
    pub fn new(settings: AcquisitionSettings, state: Arc<SharedState>) -> Self {
        Self {
            settings,
            state,
            stats: AcquisitionStats::default(),
        }
    }

    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    /// Tick until the run state becomes `Terminating`.
    pub async fn run<B, C>(
        &mut self,
        bus: &BusConnectionManager<B>,
        gateway: &mut PersistenceGateway<C>,
    ) where
        B: BusConnector,
        C: StoreConnector,
    {
        tracing::info!(
            "Acquisition started (sample length {}, report every {:?})",
            self.settings.sample_len,
            self.settings.report_interval
        );
        while self.tick(bus, gateway).await != TickOutcome::Terminating {}
        tracing::info!("Acquisition stopped");
    }

    /// Run one iteration, including its trailing sleep.
    pub async fn tick<B, C>(
        &mut self,
        bus: &BusConnectionManager<B>,
        gateway: &mut PersistenceGateway<C>,
    ) -> TickOutcome
    where
        B: BusConnector,
        C: StoreConnector,
    {
        match self.state.run_state() {
            RunState::Terminating => return TickOutcome::Terminating,
            RunState::Standby => {
                self.stats.standby_ticks += 1;
                self.state.pause(self.settings.standby_poll).await;
                return TickOutcome::Standby;
            }
            RunState::Active => {}
        }

        let latest = self.state.latest();
        let Some(values) = latest.clone() else {
            self.stats.empty_ticks += 1;
            self.state.pause(self.settings.standby_poll).await;
            return TickOutcome::NoData;
        };

        let sample = match Sample::with_len(values, self.settings.sample_len) {
            Ok(sample) => sample,
            Err(mismatch) => {
                tracing::warn!("Discarding corrupt sensor data: {}", mismatch);
                self.state.discard_latest_if(&latest);
                self.stats.samples_discarded += 1;
                self.state.pause(self.settings.standby_poll).await;
                return TickOutcome::Discarded(mismatch);
            }
        };

        let timestamp = Utc::now();
        let rendered = render_sample(Some(&sample));
        match bus
            .publish(&self.settings.publish_topic, rendered.into_bytes())
            .await
        {
            Ok(()) => self.stats.ticks_published += 1,
            Err(e) => {
                self.stats.publish_errors += 1;
                tracing::error!(
                    "Failed to publish on '{}': {:#}",
                    self.settings.publish_topic,
                    e
                );
            }
        }

        if let Err(e) = gateway.save(Some(&sample), timestamp).await {
            self.stats.store_errors += 1;
            tracing::error!("Dropping reading captured at {}: {:#}", timestamp, e);
        }

        self.state.pause(self.settings.report_interval).await;
        TickOutcome::Published
    }
}
