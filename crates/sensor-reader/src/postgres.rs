// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PostgreSQL reading backend
//!
//! Production store. Uses the blocking `postgres` client; callers are
//! expected to run it off the async workers (see [`crate::gateway`]).
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE sensor_data (
//!     id SERIAL PRIMARY KEY,
//!     value INT[] NOT NULL,
//!     timestamp TIMESTAMPTZ NOT NULL
//! );
//! ```

use crate::endpoint::StoreAddress;
use crate::store::{row_limit, SampleStore, StoreConnector, StoredReading};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};
use std::time::Duration;

/// PostgreSQL reading store
pub struct PostgresStore {
    client: Client,
}

impl SampleStore for PostgresStore {
    fn table_names(&mut self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT tablename FROM pg_catalog.pg_tables \
                 WHERE schemaname != 'pg_catalog' AND schemaname != 'information_schema'",
                &[],
            )
            .context("Failed to list tables")?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    fn create_table(&mut self, table: &str) -> Result<()> {
        self.client
            .batch_execute(&format!(
                "CREATE TABLE {} (
                    id SERIAL PRIMARY KEY,
                    value INT[] NOT NULL,
                    timestamp TIMESTAMPTZ NOT NULL
                )",
                table
            ))
            .with_context(|| format!("Failed to create table '{}'", table))
    }

    fn insert(&mut self, table: &str, value: &[i32], timestamp: DateTime<Utc>) -> Result<()> {
        let mut tx = self.client.transaction()?;
        tx.execute(
            &format!("INSERT INTO {} (value, timestamp) VALUES ($1, $2)", table),
            &[&value, &timestamp],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn count(&mut self, table: &str) -> Result<u64> {
        let row = self
            .client
            .query_one(&format!("SELECT COUNT(*) FROM {}", table), &[])?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    fn recent(&mut self, table: &str, limit: usize) -> Result<Vec<StoredReading>> {
        let rows = self.client.query(
            &format!(
                "SELECT id, value, timestamp FROM {} ORDER BY id DESC LIMIT $1",
                table
            ),
            &[&row_limit(limit)],
        )?;

        Ok(rows
            .iter()
            .map(|row| StoredReading {
                id: i64::from(row.get::<_, i32>(0)),
                value: row.get(1),
                timestamp: row.get(2),
            })
            .collect())
    }

    fn close(self) -> Result<()> {
        self.client
            .close()
            .context("Failed to close PostgreSQL session")
    }
}

/// Opens [`PostgresStore`] sessions
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    address: StoreAddress,
    database: String,
    user: String,
    password: String,
    connect_timeout: Duration,
}

impl PostgresConnector {
    pub fn new(
        address: StoreAddress,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl StoreConnector for PostgresConnector {
    type Store = PostgresStore;

    fn connect(&self) -> Result<Self::Store> {
        let mut config = postgres::Config::new();
        config
            .host(self.address.host())
            .port(self.address.port())
            .dbname(&self.database)
            .user(&self.user)
            .connect_timeout(self.connect_timeout);
        if !self.password.is_empty() {
            config.password(&self.password);
        }

        let client = config
            .connect(NoTls)
            .with_context(|| format!("Failed to connect to {}", self.describe()))?;
        Ok(PostgresStore { client })
    }

    fn describe(&self) -> String {
        format!("postgres://{}@{}/{}", self.user, self.address, self.database)
    }
}
