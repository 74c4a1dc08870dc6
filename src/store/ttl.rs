//! TTL-backed key/value store for suppression windows, manual-check
//! cooldowns, and the scheduler master lock. Backed by the same SQLite
//! connection as everything else — no separate cache dependency.

use crate::error::CoreResult;
use rusqlite::{params, Connection};
use std::sync::Mutex;

pub trait TtlStore: Send + Sync {
    /// Returns `true` if the key exists and has not expired.
    fn exists(&self, key: &str) -> CoreResult<bool>;
    /// Sets `key` with a TTL in seconds from now. TTL must be positive
    /// (testable property 8).
    fn set(&self, key: &str, ttl_secs: i64) -> CoreResult<()>;
    fn delete(&self, key: &str) -> CoreResult<()>;
    /// Deletes every key with the given prefix — used to clear all
    /// suppression keys for a monitor on recovery.
    fn delete_prefix(&self, prefix: &str) -> CoreResult<()>;
}

pub struct SqliteTtlStore {
    conn: std::sync::Arc<Mutex<Connection>>,
}

impl SqliteTtlStore {
    pub fn new(conn: std::sync::Arc<Mutex<Connection>>) -> Self {
        SqliteTtlStore { conn }
    }

    pub(super) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ttl_keys (
                key TEXT PRIMARY KEY,
                expires_at TEXT NOT NULL
            );",
        )
    }
}

impl TtlStore for SqliteTtlStore {
    fn exists(&self, key: &str) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let expires_at: Option<String> = conn
            .query_row(
                "SELECT expires_at FROM ttl_keys WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .ok();
        match expires_at {
            Some(ts) => {
                let expires: chrono::DateTime<chrono::Utc> = ts
                    .parse()
                    .unwrap_or_else(|_| chrono::Utc::now() - chrono::Duration::seconds(1));
                Ok(expires > chrono::Utc::now())
            }
            None => Ok(false),
        }
    }

    fn set(&self, key: &str, ttl_secs: i64) -> CoreResult<()> {
        let ttl_secs = ttl_secs.max(1);
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(ttl_secs);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ttl_keys (key, expires_at) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
            params![key, expires_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM ttl_keys WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM ttl_keys WHERE key LIKE ?1",
            params![format!("{prefix}%")],
        )?;
        Ok(())
    }
}
