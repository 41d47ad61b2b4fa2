//! Orchestrates L1 → L2 → L3 read-through, write-through, tier promotion
//! and demotion, TTL sweeping, corruption handling and import/export.
//! Grounded on the donor's `proxy_pool.rs`/`proxy_db.rs` split between an
//! in-memory authoritative structure and a persistent backing store, scaled
//! up here to three explicit tiers per spec.md §4.C.

use std::io::{BufRead, Write as _};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::tier::Tier;
use super::{CacheEntry, CacheError, CacheStatistics};
use crate::domain::HealthStatus;
use crate::vault::Vault;

pub struct CacheManager {
    l1: Arc<dyn Tier>,
    l2: Arc<dyn Tier>,
    l3: Arc<dyn Tier>,
    vault: Arc<Vault>,
    promotions: AtomicU64,
    demotions: AtomicU64,
    failure_threshold: u32,
    health_check_invalidation: bool,
}

#[derive(Debug, Default)]
pub struct WarmResult {
    pub loaded: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, Deserialize)]
struct WarmRecord {
    proxy_url: String,
    username: Option<String>,
    password: Option<String>,
    source: Option<String>,
    ttl_seconds: Option<u64>,
}

impl CacheManager {
    pub fn new(l1: Arc<dyn Tier>, l2: Arc<dyn Tier>, l3: Arc<dyn Tier>, vault: Arc<Vault>, failure_threshold: u32) -> Self {
        Self::with_health_check_invalidation(l1, l2, l3, vault, failure_threshold, true)
    }

    pub fn with_health_check_invalidation(
        l1: Arc<dyn Tier>,
        l2: Arc<dyn Tier>,
        l3: Arc<dyn Tier>,
        vault: Arc<Vault>,
        failure_threshold: u32,
        health_check_invalidation: bool,
    ) -> Self {
        Self {
            l1,
            l2,
            l3,
            vault,
            promotions: AtomicU64::new(0),
            demotions: AtomicU64::new(0),
            failure_threshold,
            health_check_invalidation,
        }
    }

    fn tiers_above(&self, hit_site: usize) -> Vec<&Arc<dyn Tier>> {
        // hit_site: 0 = L1, 1 = L2, 2 = L3
        match hit_site {
            0 => vec![],
            1 => vec![&self.l1],
            _ => vec![&self.l1, &self.l2],
        }
    }

    fn delete_from_all(&self, key: &str) {
        let _ = self.l1.delete(key);
        let _ = self.l2.delete(key);
        let _ = self.l3.delete(key);
    }

    fn validate_credentials(&self, entry: &CacheEntry) -> bool {
        entry.decrypt_username(&self.vault).is_ok() && entry.decrypt_password(&self.vault).is_ok()
    }

    /// Tries L1, then L2, then L3. Lazily expires, promotes on hit below L1,
    /// evicts corrupted entries rather than surfacing a hard error.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let tiers: [(&Arc<dyn Tier>, usize); 3] = [(&self.l1, 0), (&self.l2, 1), (&self.l3, 2)];
        for (tier, site) in tiers {
            if !tier.is_enabled() {
                continue;
            }
            let found = match tier.get(key) {
                Ok(v) => v,
                Err(_) => continue, // tier marks itself degraded; manager proceeds
            };
            let Some(mut entry) = found else { continue };

            if entry.is_expired() {
                self.delete_from_all(key);
                return Ok(None);
            }

            if !self.validate_credentials(&entry) {
                tier.note_corruption();
                tracing::warn!(kind = "cache_corruption", key = %key, "evicting corrupted entry");
                self.delete_from_all(key);
                return Err(CacheError::Corruption { key: key.to_string() });
            }

            entry.access_count += 1;
            entry.last_accessed_at = chrono::Utc::now();

            for upper in self.tiers_above(site) {
                if upper.is_enabled() {
                    let _ = upper.put(key, entry.clone());
                    self.promotions.fetch_add(1, Ordering::SeqCst);
                }
            }
            if site > 0 {
                let _ = tier.put(key, entry.clone());
            }
            return Ok(Some(entry));
        }
        Ok(None)
    }

    /// Writes to every enabled tier; demotes the eviction victim of a tier
    /// down to the next lower tier. Raises `StorageUnavailable` only if
    /// every tier fails.
    pub fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut any_succeeded = false;
        let mut victim = self.l1.put(key, entry.clone()).ok().flatten();
        if self.l1.is_enabled() {
            any_succeeded = true;
        }

        if self.l2.is_enabled() {
            if let Some(v) = victim.take() {
                let _ = self.l2.put(&v.key, v);
                self.demotions.fetch_add(1, Ordering::SeqCst);
            }
            match self.l2.put(key, entry.clone()) {
                Ok(v) => {
                    any_succeeded = true;
                    victim = v;
                }
                Err(_) => {}
            }
        }

        if self.l3.is_enabled() {
            if let Some(v) = victim.take() {
                let _ = self.l3.put(&v.key, v);
                self.demotions.fetch_add(1, Ordering::SeqCst);
            }
            if self.l3.put(key, entry).is_ok() {
                any_succeeded = true;
            }
        }

        if any_succeeded {
            Ok(())
        } else {
            Err(CacheError::StorageUnavailable)
        }
    }

    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.delete_from_all(key);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        let _ = self.l1.clear();
        let _ = self.l2.clear();
        let _ = self.l3.clear();
        Ok(())
    }

    /// Increments `failure_count`; once it reaches `failure_threshold`,
    /// deletes the entry from all tiers.
    pub fn invalidate_by_health(&self, key: &str) -> Result<(), CacheError> {
        if !self.health_check_invalidation {
            return Ok(());
        }
        let current = self.get(key)?;
        let Some(mut entry) = current else { return Ok(()) };
        entry.failure_count += 1;
        entry.health_status = HealthStatus::Unhealthy;
        if entry.failure_count >= self.failure_threshold {
            self.delete_from_all(key);
        } else {
            self.put(key, entry)?;
        }
        Ok(())
    }

    pub fn get_statistics(&self) -> CacheStatistics {
        CacheStatistics {
            l1: self.l1.snapshot(),
            l2: self.l2.snapshot(),
            l3: self.l3.snapshot(),
            promotions: self.promotions.load(Ordering::SeqCst),
            demotions: self.demotions.load(Ordering::SeqCst),
        }
    }

    /// Background TTL sweeper. Runs until `token` is cancelled.
    pub async fn run_ttl_sweeper(&self, interval_seconds: u64, token: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("ttl sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    for tier in [&self.l1, &self.l2, &self.l3] {
                        if tier.is_enabled() {
                            let _ = tier.sweep_expired();
                        }
                    }
                }
            }
        }
    }

    /// Ingests JSON / newline-JSON / CSV proxy lists.
    pub fn warm_from_file(&self, path: impl AsRef<Path>, ttl_override: Option<u64>) -> Result<WarmResult, CacheError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| CacheError::StorageUnavailable)?;
        let records = if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            self.parse_csv(&content)
        } else {
            self.parse_json_like(&content)
        };

        let mut result = WarmResult::default();
        for record in records {
            match record {
                Ok(r) => {
                    let ttl = ttl_override.unwrap_or(r.ttl_seconds.unwrap_or(3600));
                    let entry = CacheEntry::new(
                        r.proxy_url,
                        r.source.unwrap_or_else(|| "warmed".to_string()),
                        ttl,
                        r.username.as_deref(),
                        r.password.as_deref(),
                        &self.vault,
                    );
                    match self.put(&entry.key.clone(), entry) {
                        Ok(()) => result.loaded += 1,
                        Err(_) => result.failed += 1,
                    }
                }
                Err(()) => result.skipped += 1,
            }
        }
        Ok(result)
    }

    fn parse_json_like(&self, content: &str) -> Vec<Result<WarmRecord, ()>> {
        let trimmed = content.trim_start();
        if trimmed.starts_with('[') {
            match serde_json::from_str::<Vec<WarmRecord>>(trimmed) {
                Ok(records) => records.into_iter().map(Ok).collect(),
                Err(_) => vec![Err(())],
            }
        } else {
            content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| serde_json::from_str::<WarmRecord>(l).map_err(|_| ()))
                .collect()
        }
    }

    fn parse_csv(&self, content: &str) -> Vec<Result<WarmRecord, ()>> {
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let headers = match reader.headers() {
            Ok(h) => h.clone(),
            Err(_) => return vec![Err(())],
        };
        let mut out = Vec::new();
        for record in reader.records() {
            let Ok(record) = record else {
                out.push(Err(()));
                continue;
            };
            let get = |name: &str| -> Option<String> {
                headers.iter().position(|h| h == name).and_then(|i| record.get(i)).map(|s| s.to_string())
            };
            match get("proxy_url") {
                Some(proxy_url) if !proxy_url.is_empty() => out.push(Ok(WarmRecord {
                    proxy_url,
                    username: get("username"),
                    password: get("password"),
                    source: get("source"),
                    ttl_seconds: None,
                })),
                _ => out.push(Err(())),
            }
        }
        out
    }

    /// Streams all known entries as newline-JSON.
    pub fn export(&self, path: impl AsRef<Path>, include_credentials: bool) -> Result<u64, CacheError> {
        let mut file = std::fs::File::create(path).map_err(|_| CacheError::StorageUnavailable)?;
        let mut keys: Vec<String> = self.l1.keys();
        for k in self.l2.keys() {
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
        for k in self.l3.keys() {
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
        let mut count = 0u64;
        for key in keys {
            if let Ok(Some(mut entry)) = self.get(&key) {
                if !include_credentials {
                    entry.encrypted_username = None;
                    entry.encrypted_password = None;
                }
                let line = serde_json::to_string(&entry).map_err(|_| CacheError::StorageUnavailable)?;
                writeln!(file, "{}", line).map_err(|_| CacheError::StorageUnavailable)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Reads entries previously written by `export` back into the cache.
    pub fn import(&self, path: impl AsRef<Path>) -> Result<u64, CacheError> {
        let file = std::fs::File::open(path).map_err(|_| CacheError::StorageUnavailable)?;
        let reader = std::io::BufReader::new(file);
        let mut count = 0u64;
        for line in reader.lines().map_while(Result::ok) {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<CacheEntry>(&line) {
                if self.put(&entry.key.clone(), entry).is_ok() {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}
