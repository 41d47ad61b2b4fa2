//! L3: relational tier. Grounded on
//! `examples/l11223-kiro-ai-gateway/src-tauri/src/modules/proxy_db.rs`'s
//! rusqlite idiom: WAL pragmas, `CREATE TABLE IF NOT EXISTS` plus
//! `CREATE INDEX` statements, parameterized `params!` queries, and
//! retention via a bulk `DELETE ... WHERE key NOT IN (SELECT ...)` sweep,
//! adapted here from that file's request-log schema to the `CacheEntry`
//! schema spec'd for ProxyWhirl.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::tier::{Tier, TierSnapshot, TierStats};
use super::{CacheEntry, CacheError};
use crate::domain::HealthStatus;

pub struct L3Tier {
    conn: Mutex<Connection>,
    /// 0 means unlimited, per spec.md §4.B.
    max_entries: usize,
    stats: TierStats,
}

fn init_db_with_conn(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA busy_timeout=5000;
         PRAGMA synchronous=NORMAL;",
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            proxy_url TEXT NOT NULL,
            encrypted_username TEXT,
            encrypted_password TEXT,
            source TEXT NOT NULL,
            ttl_seconds INTEGER NOT NULL,
            fetch_time TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            health_status TEXT NOT NULL,
            failure_count INTEGER NOT NULL,
            access_count INTEGER NOT NULL,
            last_accessed_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cache_entries(expires_at)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_cache_source ON cache_entries(source)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_cache_health_status ON cache_entries(health_status)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_cache_last_accessed ON cache_entries(last_accessed_at)", [])?;
    Ok(())
}

fn health_to_str(h: HealthStatus) -> &'static str {
    match h {
        HealthStatus::Healthy => "HEALTHY",
        HealthStatus::Degraded => "DEGRADED",
        HealthStatus::Unhealthy => "UNHEALTHY",
        HealthStatus::Dead => "DEAD",
        HealthStatus::Unknown => "UNKNOWN",
    }
}

fn health_from_str(s: &str) -> HealthStatus {
    match s {
        "HEALTHY" => HealthStatus::Healthy,
        "DEGRADED" => HealthStatus::Degraded,
        "UNHEALTHY" => HealthStatus::Unhealthy,
        "DEAD" => HealthStatus::Dead,
        _ => HealthStatus::Unknown,
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        key: row.get(0)?,
        proxy_url: row.get(1)?,
        encrypted_username: row.get(2)?,
        encrypted_password: row.get(3)?,
        source: row.get(4)?,
        ttl_seconds: row.get::<_, i64>(5)? as u64,
        fetch_time: row.get::<_, String>(6)?.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
        expires_at: row.get::<_, String>(7)?.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
        health_status: health_from_str(&row.get::<_, String>(8)?),
        failure_count: row.get::<_, i64>(9)? as u32,
        access_count: row.get::<_, i64>(10)? as u64,
        last_accessed_at: row.get::<_, String>(11)?.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}

const SELECT_COLS: &str = "key, proxy_url, encrypted_username, encrypted_password, source, ttl_seconds, \
                            fetch_time, expires_at, health_status, failure_count, access_count, last_accessed_at";

impl L3Tier {
    pub fn open(path: impl AsRef<Path>, max_entries: usize) -> Result<Self, CacheError> {
        if let Some(parent) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path.as_ref()).map_err(|_| CacheError::StorageUnavailable)?;
        init_db_with_conn(&conn).map_err(|_| CacheError::StorageUnavailable)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_entries,
            stats: TierStats::new(),
        })
    }

    pub fn open_in_memory(max_entries: usize) -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().map_err(|_| CacheError::StorageUnavailable)?;
        init_db_with_conn(&conn).map_err(|_| CacheError::StorageUnavailable)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_entries,
            stats: TierStats::new(),
        })
    }

    fn evict_lru(&self, conn: &Connection) -> Result<Option<CacheEntry>, CacheError> {
        if self.max_entries == 0 {
            return Ok(None);
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get(0))
            .map_err(|_| CacheError::StorageUnavailable)?;
        if (count as usize) < self.max_entries {
            return Ok(None);
        }
        let victim: Option<CacheEntry> = conn
            .query_row(
                &format!(
                    "SELECT {} FROM cache_entries ORDER BY last_accessed_at ASC LIMIT 1",
                    SELECT_COLS
                ),
                [],
                row_to_entry,
            )
            .optional()
            .map_err(|_| CacheError::StorageUnavailable)?;
        if let Some(ref v) = victim {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![v.key])
                .map_err(|_| CacheError::StorageUnavailable)?;
        }
        Ok(victim)
    }
}

impl Tier for L3Tier {
    fn name(&self) -> &'static str {
        "L3"
    }

    fn is_enabled(&self) -> bool {
        self.stats.is_enabled()
    }

    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if !self.is_enabled() {
            return Err(CacheError::StorageUnavailable);
        }
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                &format!("SELECT {} FROM cache_entries WHERE key = ?1", SELECT_COLS),
                params![key],
                row_to_entry,
            )
            .optional();
        match result {
            Ok(Some(e)) => {
                self.stats.hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Some(e))
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(None)
            }
            Err(_) => {
                self.stats.record_failure();
                Err(CacheError::StorageUnavailable)
            }
        }
    }

    fn put(&self, key: &str, entry: CacheEntry) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.conn.lock();
        let exists: bool = conn
            .query_row("SELECT 1 FROM cache_entries WHERE key = ?1", params![key], |_| Ok(()))
            .optional()
            .map_err(|_| CacheError::StorageUnavailable)?
            .is_some();
        let evicted = if !exists {
            self.evict_lru(&conn)?
        } else {
            None
        };
        let result = conn.execute(
            "INSERT INTO cache_entries
                (key, proxy_url, encrypted_username, encrypted_password, source, ttl_seconds,
                 fetch_time, expires_at, health_status, failure_count, access_count, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(key) DO UPDATE SET
                proxy_url = excluded.proxy_url,
                encrypted_username = excluded.encrypted_username,
                encrypted_password = excluded.encrypted_password,
                source = excluded.source,
                ttl_seconds = excluded.ttl_seconds,
                fetch_time = excluded.fetch_time,
                expires_at = excluded.expires_at,
                health_status = excluded.health_status,
                failure_count = excluded.failure_count,
                access_count = excluded.access_count,
                last_accessed_at = excluded.last_accessed_at",
            params![
                entry.key,
                entry.proxy_url,
                entry.encrypted_username,
                entry.encrypted_password,
                entry.source,
                entry.ttl_seconds as i64,
                entry.fetch_time.to_rfc3339(),
                entry.expires_at.to_rfc3339(),
                health_to_str(entry.health_status),
                entry.failure_count as i64,
                entry.access_count as i64,
                entry.last_accessed_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => {
                self.stats.record_success();
                if evicted.is_some() {
                    self.stats.evictions_lru.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
                Ok(evicted)
            }
            Err(_) => {
                self.stats.record_failure();
                Err(CacheError::StorageUnavailable)
            }
        }
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
            .map(|_| {
                self.stats.record_success();
            })
            .map_err(|_| {
                self.stats.record_failure();
                CacheError::StorageUnavailable
            })
    }

    fn clear(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cache_entries", [])
            .map(|_| ())
            .map_err(|_| CacheError::StorageUnavailable)
    }

    fn size(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get::<_, i64>(0))
            .unwrap_or(0) as usize
    }

    fn keys(&self) -> Vec<String> {
        let conn = self.conn.lock();
        let mut stmt = match conn.prepare("SELECT key FROM cache_entries") {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        stmt.query_map([], |r| r.get(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    fn snapshot(&self) -> TierSnapshot {
        self.stats.snapshot(self.size() as u64)
    }

    fn sweep_expired(&self) -> Result<u64, CacheError> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute("DELETE FROM cache_entries WHERE expires_at < ?1", params![now])
            .map(|n| {
                self.stats.evictions_ttl.fetch_add(n as u64, std::sync::atomic::Ordering::SeqCst);
                n as u64
            })
            .map_err(|_| CacheError::StorageUnavailable)
    }

    fn note_corruption(&self) {
        self.stats.evictions_corruption.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::Vault;

    fn entry(url: &str) -> CacheEntry {
        let vault = Vault::new(Some("k"), None);
        CacheEntry::new(url, "test", 3600, None, None, &vault)
    }

    #[test]
    fn put_then_get_round_trips() {
        let tier = L3Tier::open_in_memory(0).unwrap();
        let e = entry("http://1.1.1.1:80");
        tier.put(&e.key.clone(), e.clone()).unwrap();
        let got = tier.get(&e.key).unwrap().unwrap();
        assert_eq!(got.proxy_url, e.proxy_url);
    }

    #[test]
    fn capacity_eviction_removes_lru() {
        let tier = L3Tier::open_in_memory(1).unwrap();
        let e1 = entry("http://1.1.1.1:80");
        let mut e2 = entry("http://2.2.2.2:80");
        e2.last_accessed_at = e1.last_accessed_at + chrono::Duration::seconds(1);
        tier.put(&e1.key.clone(), e1.clone()).unwrap();
        let evicted = tier.put(&e2.key.clone(), e2.clone()).unwrap();
        assert_eq!(evicted.unwrap().key, e1.key);
        assert_eq!(tier.size(), 1);
    }

    #[test]
    fn sweep_expired_deletes_past_ttl() {
        let tier = L3Tier::open_in_memory(0).unwrap();
        let mut e = entry("http://1.1.1.1:80");
        e.expires_at = Utc::now() - chrono::Duration::seconds(1);
        tier.put(&e.key.clone(), e.clone()).unwrap();
        let removed = tier.sweep_expired().unwrap();
        assert_eq!(removed, 1);
        assert!(tier.get(&e.key).unwrap().is_none());
    }

    #[test]
    fn unbounded_when_max_entries_zero() {
        let tier = L3Tier::open_in_memory(0).unwrap();
        for i in 0..50 {
            let e = entry(&format!("http://10.0.0.{}:80", i));
            tier.put(&e.key.clone(), e).unwrap();
        }
        assert_eq!(tier.size(), 50);
    }
}
