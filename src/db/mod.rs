//! SQLite-backed key-value state store.

mod schema;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use crate::error::SyncError;
use crate::services::StateStore;

/// A stored value with its last write time.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StateDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl StateDatabase {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "project-sync")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("state.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        schema::run_migrations(&conn)
    }

    pub fn get_entry(&self, key: &str) -> Result<Option<StateEntry>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT key, value, updated_at FROM state WHERE key = ?",
                [key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((key, value, updated_at)) = row else {
            return Ok(None);
        };
        Ok(Some(StateEntry {
            key,
            value: serde_json::from_str(&value)?,
            updated_at: parse_datetime(updated_at),
        }))
    }

    pub fn put(&self, key: &str, value: &Value) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            (key, serde_json::to_string(value)?, Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for StateDatabase {
    async fn fetch(&self, key: &str) -> crate::error::Result<Option<Value>> {
        self.get_entry(key)
            .map(|entry| entry.map(|e| e.value))
            .map_err(|e| SyncError::State(e.to_string()))
    }

    async fn save(&self, key: &str, value: &Value) -> crate::error::Result<()> {
        self.put(key, value)
            .map_err(|e| SyncError::State(e.to_string()))
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
