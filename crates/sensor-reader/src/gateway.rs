// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistence gateway
//!
//! Wraps one [`SampleStore`] session: single-attempt connect, one-time schema
//! bootstrap, append-only writes. Store drivers are blocking, so every call
//! runs on the blocking pool.

use crate::parser::Sample;
use crate::store::{SampleStore, StoreConnector, StoredReading};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Value written in place of a missing reading.
pub const DEFAULT_NULL_SENTINEL: i32 = 10;

/// Write attempts per reading before it is dropped.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Gateway statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GatewayStats {
    /// Rows committed
    pub rows_written: u64,
    /// Rows written with the sentinel value
    pub sentinel_rows: u64,
    /// Failed write attempts
    pub write_errors: u64,
}

struct StoreSession<S> {
    store: S,
    schema_ready: bool,
}

/// Gateway over one store session.
pub struct PersistenceGateway<C: StoreConnector> {
    connector: Arc<C>,
    table: String,
    null_sentinel: i32,
    write_attempts: u32,
    session: Option<StoreSession<C::Store>>,
    stats: GatewayStats,
}

impl<C: StoreConnector> PersistenceGateway<C> {
    pub fn new(connector: C, table: impl Into<String>) -> Self {
        Self {
            connector: Arc::new(connector),
            table: table.into(),
            null_sentinel: DEFAULT_NULL_SENTINEL,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            session: None,
            stats: GatewayStats::default(),
        }
    }

    pub fn with_null_sentinel(mut self, sentinel: i32) -> Self {
        self.null_sentinel = sentinel;
        self
    }

    /// Attempts per write, at least one.
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    /// Make one connection attempt. No-op when already connected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let connector = Arc::clone(&self.connector);
        let store = tokio::task::spawn_blocking(move || connector.connect())
            .await
            .map_err(|e| anyhow!("store connect task failed: {}", e))?
            .with_context(|| format!("Cannot connect to store at {}", self.connector.describe()))?;

        tracing::info!(
            "Successfully connected to store at {}",
            self.connector.describe()
        );
        self.session = Some(StoreSession {
            store,
            schema_ready: false,
        });
        Ok(())
    }

    /// Create the readings table unless it already exists.
    ///
    /// Runs once per session; later calls return immediately.
    pub async fn setup_schema(&mut self) -> Result<()> {
        if self.session.as_ref().is_some_and(|s| s.schema_ready) {
            return Ok(());
        }

        let table = self.table.clone();
        let created = self
            .with_store(move |store| {
                if store.table_names()?.iter().any(|name| *name == table) {
                    return Ok(false);
                }
                store.create_table(&table)?;
                Ok(true)
            })
            .await?;

        if created {
            tracing::info!("Created table '{}'", self.table);
        } else {
            tracing::debug!("Table '{}' already present", self.table);
        }
        if let Some(session) = self.session.as_mut() {
            session.schema_ready = true;
        }
        Ok(())
    }

    /// Append one reading.
    ///
    /// A missing reading is written as the sentinel value. Failed inserts are
    /// retried immediately up to the configured attempts; the last error is
    /// returned and the reading is lost.
    pub async fn save(&mut self, sample: Option<&Sample>, timestamp: DateTime<Utc>) -> Result<()> {
        let (value, sentinel) = match sample {
            Some(sample) => (to_column(sample)?, false),
            None => (vec![self.null_sentinel], true),
        };
        let value = Arc::new(value);

        let mut attempt = 1;
        loop {
            let table = self.table.clone();
            let row = Arc::clone(&value);
            let result = self
                .with_store(move |store| store.insert(&table, &row, timestamp))
                .await;

            match result {
                Ok(()) => {
                    self.stats.rows_written += 1;
                    if sentinel {
                        self.stats.sentinel_rows += 1;
                    }
                    return Ok(());
                }
                Err(e) => {
                    self.stats.write_errors += 1;
                    if attempt >= self.write_attempts {
                        return Err(e.context(format!(
                            "Failed to save reading after {} attempts",
                            attempt
                        )));
                    }
                    tracing::warn!(
                        "Write attempt {}/{} failed: {:#}",
                        attempt,
                        self.write_attempts,
                        e
                    );
                    attempt += 1;
                }
            }
        }
    }

    /// Number of stored readings.
    pub async fn count(&mut self) -> Result<u64> {
        let table = self.table.clone();
        self.with_store(move |store| store.count(&table)).await
    }

    /// Most recent readings, newest first.
    pub async fn recent(&mut self, limit: usize) -> Result<Vec<StoredReading>> {
        let table = self.table.clone();
        self.with_store(move |store| store.recent(&table, limit))
            .await
    }

    /// Close the session. Safe to call when not connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || session.store.close())
            .await
            .map_err(|e| anyhow!("store close task failed: {}", e))??;
        tracing::info!("Disconnected from store at {}", self.connector.describe());
        Ok(())
    }

    /// Run `op` against the open store on the blocking pool.
    async fn with_store<T, F>(&mut self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut C::Store) -> Result<T> + Send + 'static,
    {
        let Some(mut session) = self.session.take() else {
            bail!("not connected to store");
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = op(&mut session.store);
            (session, result)
        })
        .await;

        match joined {
            Ok((session, result)) => {
                self.session = Some(session);
                result
            }
            // a panicking driver leaves the session unusable; drop it
            Err(e) => Err(anyhow!("store task failed: {}", e)),
        }
    }
}

fn to_column(sample: &Sample) -> Result<Vec<i32>> {
    sample
        .values()
        .iter()
        .map(|&v| i32::try_from(v).map_err(|_| anyhow!("value {} does not fit the column", v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteConnector;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    /// Store whose first `failures` inserts fail.
    struct FlakyStore {
        failures: Arc<AtomicU32>,
        rows: Vec<Vec<i32>>,
    }

    impl SampleStore for FlakyStore {
        fn table_names(&mut self) -> Result<Vec<String>> {
            Ok(vec!["sensor_data".to_string()])
        }

        fn create_table(&mut self, _table: &str) -> Result<()> {
            bail!("table should already exist")
        }

        fn insert(&mut self, _table: &str, value: &[i32], _ts: DateTime<Utc>) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                bail!("connection reset");
            }
            self.rows.push(value.to_vec());
            Ok(())
        }

        fn count(&mut self, _table: &str) -> Result<u64> {
            Ok(self.rows.len() as u64)
        }

        fn recent(&mut self, _table: &str, _limit: usize) -> Result<Vec<StoredReading>> {
            Ok(Vec::new())
        }

        fn close(self) -> Result<()> {
            Ok(())
        }
    }

    struct FlakyConnector {
        failures: Arc<AtomicU32>,
    }

    impl StoreConnector for FlakyConnector {
        type Store = FlakyStore;

        fn connect(&self) -> Result<FlakyStore> {
            Ok(FlakyStore {
                failures: Arc::clone(&self.failures),
                rows: Vec::new(),
            })
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    fn flaky(failures: u32) -> PersistenceGateway<FlakyConnector> {
        PersistenceGateway::new(
            FlakyConnector {
                failures: Arc::new(AtomicU32::new(failures)),
            },
            "sensor_data",
        )
    }

    fn sample(values: &[u32]) -> Sample {
        Sample::with_len(values.to_vec(), values.len()).unwrap()
    }

    #[tokio::test]
    async fn test_save_requires_connection() {
        let mut gateway = PersistenceGateway::new(SqliteConnector::in_memory(), "sensor_data");
        assert!(gateway.save(None, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_null_sample_writes_sentinel() {
        let mut gateway = PersistenceGateway::new(SqliteConnector::in_memory(), "sensor_data");
        gateway.connect().await.unwrap();
        gateway.setup_schema().await.unwrap();

        gateway.save(None, Utc::now()).await.unwrap();
        gateway.save(Some(&sample(&[1, 2])), Utc::now()).await.unwrap();

        let recent = gateway.recent(10).await.unwrap();
        assert_eq!(recent[0].value, vec![1, 2]);
        assert_eq!(recent[1].value, vec![DEFAULT_NULL_SENTINEL]);
        assert_eq!(gateway.stats().rows_written, 2);
        assert_eq!(gateway.stats().sentinel_rows, 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_write_retried_then_succeeds() {
        let mut gateway = flaky(2);
        gateway.connect().await.unwrap();
        gateway.setup_schema().await.unwrap();

        gateway.save(Some(&sample(&[7])), Utc::now()).await.unwrap();

        assert_eq!(gateway.count().await.unwrap(), 1);
        assert_eq!(gateway.stats().write_errors, 2);
        assert!(logs_contain("Write attempt 1/3 failed"));
        assert!(logs_contain("Write attempt 2/3 failed"));
    }

    #[tokio::test]
    async fn test_write_dropped_after_attempts() {
        let mut gateway = flaky(5).with_write_attempts(3);
        gateway.connect().await.unwrap();

        let err = gateway.save(Some(&sample(&[7])), Utc::now()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("after 3 attempts"));
        assert_eq!(gateway.count().await.unwrap(), 0);
        assert_eq!(gateway.stats().write_errors, 3);

        // remaining failures: 2, then the write goes through
        gateway.save(Some(&sample(&[8])), Utc::now()).await.unwrap();
        assert_eq!(gateway.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_existing_table_not_recreated() {
        let mut gateway = flaky(0);
        gateway.connect().await.unwrap();
        // FlakyStore::create_table fails, so this only passes if it is skipped
        gateway.setup_schema().await.unwrap();
        gateway.setup_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_value_overflowing_column_rejected() {
        let mut gateway = flaky(0);
        gateway.connect().await.unwrap();
        let big = sample(&[u32::MAX]);
        assert!(gateway.save(Some(&big), Utc::now()).await.is_err());
        assert_eq!(gateway.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let mut gateway = PersistenceGateway::new(SqliteConnector::in_memory(), "sensor_data");
        gateway.disconnect().await.unwrap();
        gateway.connect().await.unwrap();
        gateway.disconnect().await.unwrap();
        gateway.disconnect().await.unwrap();
        assert!(!gateway.is_connected());
    }
}
