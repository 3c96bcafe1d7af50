// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite reading backend
//!
//! Local storage without a database server, file based or in memory.

use crate::store::{row_limit, SampleStore, StoreConnector, StoredReading};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::PathBuf;

/// SQLite reading store
///
/// Values are kept as a JSON array and timestamps as RFC 3339 text, since
/// SQLite has neither array nor time zone aware column types.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE sensor_data (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     value TEXT NOT NULL,
///     timestamp TEXT NOT NULL
/// );
/// ```
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a file-based database
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;
        Ok(Self { conn })
    }

    fn decode_row(id: i64, value: String, timestamp: String) -> Result<StoredReading> {
        let value: Vec<i32> = serde_json::from_str(&value)
            .with_context(|| format!("Corrupt value in row {}", id))?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .with_context(|| format!("Corrupt timestamp in row {}", id))?
            .with_timezone(&Utc);
        Ok(StoredReading {
            id,
            value,
            timestamp,
        })
    }
}

impl SampleStore for SqliteStore {
    fn table_names(&mut self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn create_table(&mut self, table: &str) -> Result<()> {
        self.conn.execute(
            &format!(
                "CREATE TABLE {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    value TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                )",
                table
            ),
            [],
        )?;
        Ok(())
    }

    fn insert(&mut self, table: &str, value: &[i32], timestamp: DateTime<Utc>) -> Result<()> {
        let value = serde_json::to_string(value)?;
        self.conn.execute(
            &format!("INSERT INTO {} (value, timestamp) VALUES (?1, ?2)", table),
            params![value, timestamp.to_rfc3339()],
        )?;
        Ok(())
    }

    fn count(&mut self, table: &str) -> Result<u64> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }

    fn recent(&mut self, table: &str, limit: usize) -> Result<Vec<StoredReading>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, value, timestamp FROM {} ORDER BY id DESC LIMIT ?1",
            table
        ))?;
        let rows = stmt
            .query_map([row_limit(limit)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, value, timestamp)| Self::decode_row(id, value, timestamp))
            .collect()
    }

    fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| e)
            .context("Failed to close SQLite database")
    }
}

/// Opens [`SqliteStore`] sessions
#[derive(Debug, Clone, Default)]
pub struct SqliteConnector {
    /// Database file; `None` opens a fresh in-memory database per session
    path: Option<PathBuf>,
}

impl SqliteConnector {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn in_memory() -> Self {
        Self { path: None }
    }
}

impl StoreConnector for SqliteConnector {
    type Store = SqliteStore;

    fn connect(&self) -> Result<Self::Store> {
        match &self.path {
            Some(path) => SqliteStore::open(path),
            None => SqliteStore::open_in_memory(),
        }
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite://{}", path.display()),
            None => "sqlite://:memory:".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_list_tables() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.table_names().unwrap().contains(&"sensor_data".to_string()));

        store.create_table("sensor_data").unwrap();
        assert!(store.table_names().unwrap().contains(&"sensor_data".to_string()));
    }

    #[test]
    fn test_insert_and_recent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.create_table("sensor_data").unwrap();

        let t0 = Utc::now();
        store.insert("sensor_data", &[1, 2, 3], t0).unwrap();
        store.insert("sensor_data", &[10], t0).unwrap();

        assert_eq!(store.count("sensor_data").unwrap(), 2);

        let recent = store.recent("sensor_data", 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].value, vec![10]);
        assert_eq!(recent[1].value, vec![1, 2, 3]);
        assert_eq!(recent[1].timestamp, t0);
        assert!(recent[0].id > recent[1].id);

        assert_eq!(store.recent("sensor_data", 1).unwrap().len(), 1);
        assert_eq!(store.recent("sensor_data", usize::MAX).unwrap().len(), 2);
    }

    #[test]
    fn test_file_store_persists_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SqliteConnector::file(dir.path().join("readings.db"));

        let mut store = connector.connect().unwrap();
        store.create_table("sensor_data").unwrap();
        store.insert("sensor_data", &[5, 6], Utc::now()).unwrap();
        store.close().unwrap();

        let mut store = connector.connect().unwrap();
        assert_eq!(store.count("sensor_data").unwrap(), 1);
        assert!(connector.describe().ends_with("readings.db"));
    }

    #[test]
    fn test_insert_without_table_fails() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(store.insert("sensor_data", &[1], Utc::now()).is_err());
    }
}
