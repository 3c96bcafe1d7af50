// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Reader Service CLI
//!
//! Reads sensor data from the bus, republishes it and stores it.
//!
//! # Usage
//!
//! ```bash
//! # Run against a local NATS server and PostgreSQL
//! sensor-reader --bus-url nats://localhost:4222 --store-address 127.0.0.1:5432
//!
//! # Local SQLite file and a mock sensor
//! sensor-reader --store-backend sqlite --db-path readings.db \
//!     --sensor mock --min-value 0 --max-value 4000
//!
//! # Inspect stored readings
//! sensor-reader --store-backend sqlite --db-path readings.db recent -n 5
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sensor_reader::{
    AppCommand, BusConnector, BusUrl, Config, ConfigError, InMemoryBus, MockSensor,
    NatsConnector, PersistenceGateway, PostgresConnector, SensorReaderService, SqliteConnector,
    StoreAddress, StoreBackend, StoreConnector,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SensorKind {
    /// Readings come from a physical sensor driver
    Real,
    /// Spawn an in-process random sensor
    Mock,
}

#[derive(Parser, Debug)]
#[command(name = "sensor-reader")]
#[command(about = "Sensor Reader Service - bus ingestion, republishing and storage", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bus server URL
    #[arg(short, long)]
    bus_url: Option<String>,

    /// Store backend
    #[arg(long, value_enum)]
    store_backend: Option<StoreBackend>,

    /// PostgreSQL server address (host:port)
    #[arg(long)]
    store_address: Option<String>,

    /// SQLite database file (in memory if omitted)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// PostgreSQL database name
    #[arg(long)]
    db_name: Option<String>,

    /// PostgreSQL user
    #[arg(long)]
    db_user: Option<String>,

    /// PostgreSQL password
    #[arg(long, env = "SENSOR_READER_DB_PASSWORD", hide_env_values = true)]
    db_password: Option<String>,

    /// Seconds between published readings
    #[arg(long)]
    report_interval: Option<f64>,

    /// Values per reading
    #[arg(long)]
    sample_len: Option<usize>,

    /// Sensor source
    #[arg(long, value_enum, default_value_t = SensorKind::Real)]
    sensor: SensorKind,

    /// Lowest mock sensor value
    #[arg(long, default_value_t = 0)]
    min_value: u32,

    /// Highest mock sensor value
    #[arg(long, default_value_t = 65535)]
    max_value: u32,

    /// Use an in-process bus instead of a server (demo)
    #[arg(long)]
    in_memory_bus: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the number of stored readings
    Stats,
    /// Print the most recent readings
    Recent {
        /// Number of readings
        #[arg(short, default_value_t = 10)]
        n: usize,
    },
}

/// Merge the config file with command-line overrides.
fn load_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(url) = &args.bus_url {
        config.bus_url = BusUrl::parse(url)?;
    }
    if let Some(backend) = args.store_backend {
        config.store.backend = backend;
    }
    if let Some(address) = &args.store_address {
        config.store.address = StoreAddress::parse(address)?;
    }
    if let Some(path) = &args.db_path {
        config.store.path = Some(path.clone());
    }
    if let Some(name) = &args.db_name {
        config.store.database = name.clone();
    }
    if let Some(user) = &args.db_user {
        config.store.user = user.clone();
    }
    if let Some(password) = &args.db_password {
        config.store.password = password.clone();
    }
    if let Some(secs) = args.report_interval {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "report interval must be a non-negative number of seconds, got {}",
                secs
            )));
        }
        config.report_interval_ms = (secs * 1000.0) as u64;
    }
    if let Some(len) = args.sample_len {
        config.sample_len = len;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match config.store.backend {
        StoreBackend::Postgres => {
            let connector = PostgresConnector::new(
                config.store.address.clone(),
                config.store.database.clone(),
                config.store.user.clone(),
                config.store.password.clone(),
            )
            .with_connect_timeout(config.connect_timeout());
            dispatch(args, config, connector).await
        }
        StoreBackend::Sqlite => {
            let connector = match &config.store.path {
                Some(path) => SqliteConnector::file(path),
                None => SqliteConnector::in_memory(),
            };
            dispatch(args, config, connector).await
        }
    }
}

async fn dispatch<C: StoreConnector>(args: Args, config: Config, connector: C) -> Result<()> {
    if let Some(cmd) = args.command {
        return handle_command(cmd, &config, connector).await;
    }

    tracing::info!("Sensor Reader Service starting...");
    tracing::info!("  Store: {}", connector.describe());
    tracing::info!("  Sample length: {}", config.sample_len);
    tracing::info!("  Report interval: {:?}", config.report_interval());

    if args.in_memory_bus {
        tracing::info!("Running with in-memory bus");
        run_service(&args, config, InMemoryBus::new(), connector).await
    } else {
        tracing::info!("Running with NATS bus");
        run_service(&args, config, NatsConnector, connector).await
    }
}

async fn run_service<B, C>(args: &Args, config: Config, bus: B, store: C) -> Result<()>
where
    B: BusConnector + Clone + 'static,
    C: StoreConnector,
{
    let mock = if args.sensor == SensorKind::Mock {
        let sensor = MockSensor::new(
            bus.clone(),
            config.bus_url.clone(),
            args.min_value,
            args.max_value,
        )?
        .with_topic(config.topics.raw_data.clone())
        .with_sample_len(config.sample_len)
        .with_reconnect_delay(config.reconnect_delay());
        tracing::info!(
            "Mock sensor enabled (values {}..={})",
            args.min_value,
            args.max_value
        );
        Some(tokio::spawn(sensor.run()))
    } else {
        None
    };

    let service = SensorReaderService::new(config, bus, store);

    let state = service.state();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            state.apply_command(AppCommand::Exit);
        }
    });

    let result = service.run().await;

    if let Some(task) = mock {
        task.abort();
    }
    result.map(|_| ())
}

async fn handle_command<C: StoreConnector>(
    cmd: Commands,
    config: &Config,
    connector: C,
) -> Result<()> {
    let mut gateway = PersistenceGateway::new(connector, config.store.table.clone());
    gateway.connect().await?;

    let outcome = match cmd {
        Commands::Stats => gateway.count().await.map(|count| {
            println!("Total readings stored in '{}': {}", gateway.table(), count);
        }),
        Commands::Recent { n } => gateway.recent(n).await.map(|readings| {
            println!("Last {} readings in '{}':", readings.len(), gateway.table());
            for reading in &readings {
                println!(
                    "  id={}, ts={}, values={}",
                    reading.id,
                    reading.timestamp.to_rfc3339(),
                    reading.value.len()
                );
            }
        }),
    };

    gateway.disconnect().await?;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("sensor-reader").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_overrides() {
        let config = load_config(&args(&[
            "--bus-url",
            "nats://192.168.1.34:4222",
            "--store-backend",
            "sqlite",
            "--report-interval",
            "0.5",
            "--sample-len",
            "3",
        ]))
        .unwrap();

        assert_eq!(config.bus_url.host(), "192.168.1.34");
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.report_interval(), Duration::from_millis(500));
        assert_eq!(config.sample_len, 3);
    }

    #[test]
    fn test_bad_store_address_rejected() {
        let result = load_config(&args(&["--store-address", "127.0.0.1:wrong_port"]));
        assert!(matches!(result, Err(ConfigError::Endpoint(_))));
    }

    #[test]
    fn test_subcommand() {
        let parsed = args(&["recent", "-n", "3"]);
        assert!(matches!(parsed.command, Some(Commands::Recent { n: 3 })));
    }
}
