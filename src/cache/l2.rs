//! L2: on-disk tier backed by a single indexed file.
//!
//! Storage-format decision (SPEC_FULL.md, Open Question 1): one JSON-lines
//! index file rather than per-key shards, so the atomic-write rule
//! (temp file + fsync + rename) and the cross-process advisory lock apply
//! to exactly one file. Credentials are stored encrypted (via the vault at
//! entry-creation time in `CacheEntry::new`); the rest of the entry is
//! plaintext metadata, per spec.md §4.B.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::tier::{Tier, TierSnapshot, TierStats};
use super::{CacheEntry, CacheError};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_POLL: Duration = Duration::from_millis(20);

struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(lock_path: &Path) -> Result<Self, CacheError> {
        let start = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(lock_path) {
                Ok(_) => return Ok(Self { path: lock_path.to_path_buf() }),
                Err(_) => {
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(CacheError::StorageUnavailable);
                    }
                    std::thread::sleep(LOCK_POLL);
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub struct L2Tier {
    index_path: PathBuf,
    lock_path: PathBuf,
    max_entries: usize,
    cache: Mutex<HashMap<String, CacheEntry>>,
    stats: TierStats,
}

impl L2Tier {
    pub fn new(dir: impl AsRef<Path>, max_entries: usize) -> Self {
        let dir = dir.as_ref();
        let _ = fs::create_dir_all(dir);
        let index_path = dir.join("index.jsonl");
        let lock_path = dir.join("index.lock");
        let mut cache = HashMap::new();
        if let Ok(mut f) = File::open(&index_path) {
            let mut buf = String::new();
            if f.read_to_string(&mut buf).is_ok() {
                for line in buf.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Ok(entry) = serde_json::from_str::<CacheEntry>(line) {
                        cache.insert(entry.key.clone(), entry);
                    }
                }
            }
        }
        Self {
            index_path,
            lock_path,
            max_entries: max_entries.max(1),
            cache: Mutex::new(cache),
            stats: TierStats::new(),
        }
    }

    fn persist(&self, guard: &HashMap<String, CacheEntry>) -> Result<(), CacheError> {
        let _lock = FileLock::acquire(&self.lock_path)?;
        let tmp_path = self.index_path.with_extension("jsonl.tmp");
        let write = || -> std::io::Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            for entry in guard.values() {
                let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
                writeln!(tmp, "{}", line)?;
            }
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.index_path)?;
            Ok(())
        };
        write().map_err(|_| CacheError::StorageUnavailable)
    }

    fn evict_lru_locked(&self, guard: &mut HashMap<String, CacheEntry>) -> Option<CacheEntry> {
        if guard.len() < self.max_entries {
            return None;
        }
        let victim_key = guard
            .values()
            .min_by_key(|e| e.last_accessed_at)
            .map(|e| e.key.clone())?;
        guard.remove(&victim_key)
    }
}

impl Tier for L2Tier {
    fn name(&self) -> &'static str {
        "L2"
    }

    fn is_enabled(&self) -> bool {
        self.stats.is_enabled()
    }

    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if !self.is_enabled() {
            return Err(CacheError::StorageUnavailable);
        }
        let guard = self.cache.lock();
        match guard.get(key) {
            Some(e) => {
                self.stats.hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Some(e.clone()))
            }
            None => {
                self.stats.misses.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    fn put(&self, key: &str, entry: CacheEntry) -> Result<Option<CacheEntry>, CacheError> {
        if !self.is_enabled() {
            return Err(CacheError::StorageUnavailable);
        }
        let mut guard = self.cache.lock();
        let evicted = if !guard.contains_key(key) {
            self.evict_lru_locked(&mut guard)
        } else {
            None
        };
        guard.insert(key.to_string(), entry);
        match self.persist(&guard) {
            Ok(()) => {
                self.stats.record_success();
                if evicted.is_some() {
                    self.stats.evictions_lru.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
                Ok(evicted)
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut guard = self.cache.lock();
        guard.remove(key);
        match self.persist(&guard) {
            Ok(()) => {
                self.stats.record_success();
                Ok(())
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut guard = self.cache.lock();
        guard.clear();
        self.persist(&guard)
    }

    fn size(&self) -> usize {
        self.cache.lock().len()
    }

    fn keys(&self) -> Vec<String> {
        self.cache.lock().keys().cloned().collect()
    }

    fn snapshot(&self) -> TierSnapshot {
        self.stats.snapshot(self.size() as u64)
    }

    fn sweep_expired(&self) -> Result<u64, CacheError> {
        let now = chrono::Utc::now();
        let mut guard = self.cache.lock();
        let expired: Vec<String> = guard
            .values()
            .filter(|e| e.is_expired_at(now))
            .map(|e| e.key.clone())
            .collect();
        for k in &expired {
            guard.remove(k);
        }
        self.persist(&guard)?;
        self.stats.evictions_ttl.fetch_add(expired.len() as u64, std::sync::atomic::Ordering::SeqCst);
        Ok(expired.len() as u64)
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
    fn put_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let e = entry("http://1.1.1.1:80");
        {
            let tier = L2Tier::new(dir.path(), 10);
            tier.put(&e.key.clone(), e.clone()).unwrap();
        }
        let reloaded = L2Tier::new(dir.path(), 10);
        assert!(reloaded.get(&e.key).unwrap().is_some());
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let tier = L2Tier::new(dir.path(), 1);
        let e1 = entry("http://1.1.1.1:80");
        let mut e2 = entry("http://2.2.2.2:80");
        e2.last_accessed_at = e1.last_accessed_at + chrono::Duration::seconds(1);
        tier.put(&e1.key.clone(), e1.clone()).unwrap();
        let evicted = tier.put(&e2.key.clone(), e2.clone()).unwrap();
        assert_eq!(evicted.unwrap().key, e1.key);
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let tier = L2Tier::new(dir.path(), 10);
        let e = entry("http://1.1.1.1:80");
        tier.put(&e.key.clone(), e.clone()).unwrap();
        tier.delete(&e.key).unwrap();
        assert!(tier.get(&e.key).unwrap().is_none());
    }
}
