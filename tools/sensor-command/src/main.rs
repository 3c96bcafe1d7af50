// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sensor-command - Control a running sensor reader
//!
//! Publishes one command on the command topic and exits.
//!
//! ```bash
//! sensor-command stop
//! sensor-command start --bus-url nats://192.168.1.34:4222
//! sensor-command exit
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sensor_reader::bus::logging_fault_callback;
use sensor_reader::{AppCommand, BusClient, BusConnector, BusUrl, ConnectOptions, NatsConnector};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Send a command to a sensor reader
#[derive(Parser, Debug)]
#[command(name = "sensor-command")]
#[command(about = "Send start/stop/exit to a sensor reader")]
struct Args {
    /// Command: start, stop or exit
    command: AppCommand,

    /// Bus server URL
    #[arg(short, long, default_value = "nats://localhost:4222")]
    bus_url: BusUrl,

    /// Command topic
    #[arg(short, long, default_value = "app_command")]
    topic: String,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let options = ConnectOptions {
        connect_timeout: Duration::from_secs(args.connect_timeout),
        client_name: "sensor-command".to_string(),
    };
    let client = NatsConnector
        .connect(&args.bus_url, &options, logging_fault_callback("Command sender"))
        .await
        .with_context(|| format!("Cannot reach bus server on {}", args.bus_url))?;

    client
        .publish(&args.topic, args.command.encode())
        .await
        .with_context(|| format!("Failed to send '{}'", args.command))?;
    client.drain().await?;

    tracing::info!(
        "Sent '{}' (code {}) on '{}'",
        args.command,
        args.command.code(),
        args.topic
    );
    Ok(())
}
