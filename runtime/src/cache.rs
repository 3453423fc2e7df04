//! Persistent key → bytes cache with per-entry expiry, backed by SQLite.
//!
//! Entries are immutable once written for a given key, so concurrent writers
//! racing on the same key simply overwrite each other with identical bytes.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Imagery tiles change rarely.
pub const TILE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Directory name under the platform cache directory.
const APP_DIR: &str = "towerline";

/// Entry counts reported by [`DiskCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub expired: u64,
    pub bytes: u64,
}

/// SQLite-backed cache shared by every task in the process.
pub struct DiskCache {
    db: Mutex<Connection>,
    path: PathBuf,
}

impl DiskCache {
    /// Open or create a cache database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache dir: {}", parent.display()))?;
        }
        let db = Connection::open(path)
            .with_context(|| format!("failed to open cache: {}", path.display()))?;

        db.busy_timeout(Duration::from_secs(5))
            .context("failed to set cache busy timeout")?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at INTEGER NOT NULL
             );",
        )
        .context("failed to create cache table")?;

        Ok(Self {
            db: Mutex::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Default location: `<platform cache dir>/towerline/cache.db`.
    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(APP_DIR)
            .join("cache.db")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Live value for `key`, or `None` when absent or expired.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let db = self.lock()?;
        let value = db
            .query_row(
                "SELECT value FROM entries WHERE key = ?1 AND expires_at > ?2",
                rusqlite::params![key, now_secs()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    pub fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = now_secs().saturating_add(ttl.as_secs() as i64);
        self.lock()?.execute(
            "INSERT OR REPLACE INTO entries (key, value, expires_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, expires_at],
        )?;
        debug!(key, bytes = value.len(), "cached entry");
        Ok(())
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let rows = self
            .lock()?
            .execute("DELETE FROM entries WHERE key = ?1", rusqlite::params![key])?;
        Ok(rows > 0)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let rows = self.lock()?.execute(
            "DELETE FROM entries WHERE expires_at <= ?1",
            rusqlite::params![now_secs()],
        )?;
        Ok(rows)
    }

    /// Drop everything. Returns how many entries were removed.
    pub fn clear(&self) -> Result<usize> {
        let rows = self.lock()?.execute("DELETE FROM entries", [])?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let db = self.lock()?;
        let stats = db.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN expires_at <= ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(LENGTH(value)), 0)
             FROM entries",
            rusqlite::params![now_secs()],
            |row| {
                Ok(CacheStats {
                    entries: row.get::<_, i64>(0)? as u64,
                    expired: row.get::<_, i64>(1)? as u64,
                    bytes: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| anyhow::anyhow!("cache connection lock poisoned"))
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
