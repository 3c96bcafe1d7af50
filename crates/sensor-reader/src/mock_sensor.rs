// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mock infrared sensor
//!
//! Publishes random readings on the raw data topic in the same wrapped,
//! bracketed text form a real sensor driver produces, e.g.
//!
//! ```text
//! [  812 40211   77 ...
//!   1304 65535 ...]
//! ```

use crate::bus::{logging_fault_callback, BusClient, BusConnector, ConnectOptions};
use crate::endpoint::BusUrl;
use crate::parser::DEFAULT_SAMPLE_LEN;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use thiserror::Error;

/// Sensor values are 16 bit.
pub const SENSOR_RESOLUTION: u32 = 1 << 16;

/// Line width of the rendered readings.
pub const LINE_WIDTH: usize = 75;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockSensorError {
    #[error("value {0} must be below the sensor resolution 2^16")]
    OutOfRange(u32),

    #[error("min value {min} exceeds max value {max}")]
    InvertedRange { min: u32, max: u32 },
}

/// Render values as a bracketed, right-aligned, line-wrapped array.
pub fn render_wrapped(values: &[u32], line_width: usize) -> String {
    let width = values
        .iter()
        .map(|v| v.to_string().len())
        .max()
        .unwrap_or(1);

    let mut out = String::from("[");
    let mut line_len = 1;
    for (i, value) in values.iter().enumerate() {
        let cell = format!("{:>width$}", value, width = width);
        if i > 0 {
            // a cell, its separator and a possible closing bracket must fit
            if line_len + 1 + cell.len() + 1 > line_width {
                out.push_str("\n ");
                line_len = 1;
            } else {
                out.push(' ');
                line_len += 1;
            }
        }
        out.push_str(&cell);
        line_len += cell.len();
    }
    out.push(']');
    out
}

/// Random reading generator publishing on the bus.
pub struct MockSensor<B: BusConnector> {
    connector: B,
    url: BusUrl,
    options: ConnectOptions,
    topic: String,
    min: u32,
    max: u32,
    sample_len: usize,
    period: Duration,
    reconnect_delay: Duration,
    rng: StdRng,
}

impl<B: BusConnector> MockSensor<B> {
    /// Sensor producing values in `[min, max]`.
    pub fn new(connector: B, url: BusUrl, min: u32, max: u32) -> Result<Self, MockSensorError> {
        for value in [min, max] {
            if value >= SENSOR_RESOLUTION {
                return Err(MockSensorError::OutOfRange(value));
            }
        }
        if min > max {
            return Err(MockSensorError::InvertedRange { min, max });
        }

        Ok(Self {
            connector,
            url,
            options: ConnectOptions {
                client_name: "mock-sensor".to_string(),
                ..ConnectOptions::default()
            },
            topic: "sensors".to_string(),
            min,
            max,
            sample_len: DEFAULT_SAMPLE_LEN,
            period: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(2),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_sample_len(mut self, len: usize) -> Self {
        self.sample_len = len;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Deterministic values, for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Draw a new reading.
    pub fn generate(&mut self) -> Vec<u32> {
        let values: Vec<u32> = (0..self.sample_len)
            .map(|_| self.rng.gen_range(self.min..=self.max))
            .collect();
        tracing::trace!("New sensor data generated: {:?}", values);
        values
    }

    async fn connect(&self) -> B::Client {
        loop {
            match self
                .connector
                .connect(
                    &self.url,
                    &self.options,
                    logging_fault_callback("Mock sensor"),
                )
                .await
            {
                Ok(client) => return client,
                Err(e) => {
                    tracing::debug!("Mock sensor cannot connect to bus server: {:#}", e);
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    /// Connect, then publish a reading every period. Runs until cancelled;
    /// publish failures are logged and the next period retries.
    pub async fn run(mut self) {
        let client = self.connect().await;
        tracing::info!("Mock sensor publishing on '{}' every {:?}", self.topic, self.period);

        loop {
            let values = self.generate();
            let payload = render_wrapped(&values, LINE_WIDTH).into_bytes();
            if let Err(e) = client.publish(&self.topic, payload).await {
                tracing::warn!("Mock sensor failed to publish: {:#}", e);
            }
            tokio::time::sleep(self.period).await;
        }
    }
}
