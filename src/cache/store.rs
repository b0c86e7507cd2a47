use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Bump when the stored record layout changes; older records read back as
/// misses instead of deserialization failures.
const SCHEMA_VERSION: i64 = 1;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS cache (
    key            TEXT PRIMARY KEY,
    value_json     TEXT NOT NULL,
    created_at     INTEGER NOT NULL,
    expires_at     INTEGER,
    schema_version INTEGER NOT NULL
);
";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
}

/// TTL-aware persistent key/value store for provider outputs.
///
/// Entries are immutable once written; `put` replaces atomically at the SQL
/// level, so a concurrent reader observes the fully-old or fully-new value.
/// Expired and undecodable records are treated as misses and lazily purged.
///
/// All handles share one connection, so operations on distinct keys serialize
/// for the duration of a single statement. Statements here are point reads
/// and single-row writes, short against provider latency; contention across
/// workers is bounded by that, not by the run.
#[derive(Clone)]
pub struct CacheStore {
    conn: Arc<Mutex<Connection>>,
    enabled: bool,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl CacheStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open cache db")?;
        Self::from_conn(conn, true)
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to open in-memory cache db")?;
        Self::from_conn(conn, true)
    }

    /// A store that never hits and never persists. Every `get` is a miss and
    /// `put` is a no-op, matching a `cache.enabled: false` config.
    pub fn disabled() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to open in-memory cache db")?;
        Self::from_conn(conn, false)
    }

    fn from_conn(conn: Connection, enabled: bool) -> anyhow::Result<Self> {
        conn.execute_batch(DDL)?;
        // Readers block only for the duration of a single statement.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            enabled,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Build a store from config: disabled, file-backed, or in-memory.
    pub fn from_settings(settings: &crate::model::CacheSettings) -> anyhow::Result<Self> {
        if !settings.enabled {
            return Self::disabled();
        }
        match &settings.path {
            Some(path) => Self::open(path),
            None => Self::memory(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        self.get_at(key, now_unix())
    }

    /// `ttl_secs` of 0 means the entry never expires.
    pub fn put(&self, key: &str, value: &Value, ttl_secs: u64) -> anyhow::Result<()> {
        self.put_at(key, value, ttl_secs, now_unix())
    }

    pub(crate) fn get_at(&self, key: &str, now: i64) -> anyhow::Result<Option<Value>> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let row = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT value_json, expires_at, schema_version FROM cache WHERE key = ?1",
                params![key],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<i64>>(1)?,
                        r.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((value_json, expires_at, version)) = row else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        if expires_at.is_some_and(|t| t <= now) {
            tracing::debug!(key, "cache entry expired");
            self.purge(key)?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        if version != SCHEMA_VERSION {
            tracing::warn!(key, version, "discarding cache record with stale schema");
            self.purge(key)?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        match serde_json::from_str(&value_json) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(e) => {
                // Damaged record: a miss, never a fatal error.
                tracing::warn!(key, error = %e, "discarding corrupt cache record");
                self.purge(key)?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    pub(crate) fn put_at(
        &self,
        key: &str,
        value: &Value,
        ttl_secs: u64,
        now: i64,
    ) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let expires_at = if ttl_secs > 0 {
            Some(now + ttl_secs as i64)
        } else {
            None
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cache(key, value_json, created_at, expires_at, schema_version)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                 value_json = excluded.value_json,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at,
                 schema_version = excluded.schema_version",
            params![key, serde_json::to_string(value)?, now, expires_at, SCHEMA_VERSION],
        )?;
        Ok(())
    }

    pub fn invalidate(&self, key: &str) -> anyhow::Result<()> {
        self.purge(key)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM cache", [])?;
        Ok(())
    }

    pub fn stats(&self) -> anyhow::Result<CacheStats> {
        let (entries, total_bytes) = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(value_json)), 0) FROM cache",
                [],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
            )?
        };
        Ok(CacheStats {
            entries: entries.max(0) as u64,
            total_bytes: total_bytes.max(0) as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        })
    }

    fn purge(&self, key: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM cache WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
