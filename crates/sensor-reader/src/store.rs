// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reading store abstraction
//!
//! Defines the traits for relational backends (PostgreSQL, SQLite).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted sensor reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Row id (auto-increment)
    pub id: i64,

    /// Reading values, or the sentinel row for a missing reading
    pub value: Vec<i32>,

    /// Capture time
    pub timestamp: DateTime<Utc>,
}

/// Store session
///
/// One open session against a relational database. The table layout is
/// always `(id auto-increment primary key, value integer array, timestamp
/// with time zone)`.
///
/// # Implementations
///
/// - `PostgresStore` -- production backend
/// - `SqliteStore` -- local file or in-memory database
pub trait SampleStore: Send + 'static {
    /// Names of the user tables present in the database
    fn table_names(&mut self) -> Result<Vec<String>>;

    /// Create the readings table
    fn create_table(&mut self, table: &str) -> Result<()>;

    /// Append one reading and commit it
    fn insert(&mut self, table: &str, value: &[i32], timestamp: DateTime<Utc>) -> Result<()>;

    /// Number of stored readings
    fn count(&mut self, table: &str) -> Result<u64>;

    /// Most recent readings, newest first
    fn recent(&mut self, table: &str, limit: usize) -> Result<Vec<StoredReading>>;

    /// Close the session
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Opens store sessions
///
/// `connect` makes exactly one attempt; retrying is left to the caller.
pub trait StoreConnector: Send + Sync + 'static {
    type Store: SampleStore;

    /// Make one connection attempt
    fn connect(&self) -> Result<Self::Store>;

    /// Human readable endpoint, for logs
    fn describe(&self) -> String;
}

/// SQL `LIMIT` for a row count, saturating instead of wrapping.
pub(crate) fn row_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
