//! L1: in-memory LRU tier. Cannot fail (memory only), per spec.md §4.C.

use parking_lot::Mutex;

use super::tier::{Tier, TierSnapshot, TierStats};
use super::{CacheEntry, CacheError};

pub struct L1Tier {
    map: Mutex<lru::LruCache<String, CacheEntry>>,
    stats: TierStats,
}

impl L1Tier {
    pub fn new(max_entries: usize) -> Self {
        let cap = std::num::NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            map: Mutex::new(lru::LruCache::new(cap)),
            stats: TierStats::new(),
        }
    }
}

impl Tier for L1Tier {
    fn name(&self) -> &'static str {
        "L1"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut guard = self.map.lock();
        match guard.get(key) {
            Some(entry) => {
                self.stats.hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Some(entry.clone()))
            }
            None => {
                self.stats.misses.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    fn put(&self, key: &str, entry: CacheEntry) -> Result<Option<CacheEntry>, CacheError> {
        let mut guard = self.map.lock();
        let evicted = if !guard.contains(key) && guard.len() >= guard.cap().get() {
            guard.pop_lru().map(|(_, v)| v)
        } else {
            None
        };
        if evicted.is_some() {
            self.stats.evictions_lru.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        guard.put(key.to_string(), entry);
        Ok(evicted)
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.map.lock().pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.map.lock().clear();
        Ok(())
    }

    fn size(&self) -> usize {
        self.map.lock().len()
    }

    fn keys(&self) -> Vec<String> {
        self.map.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    fn snapshot(&self) -> TierSnapshot {
        self.stats.snapshot(self.size() as u64)
    }

    fn sweep_expired(&self) -> Result<u64, CacheError> {
        let now = chrono::Utc::now();
        let mut guard = self.map.lock();
        let expired: Vec<String> = guard
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            guard.pop(k);
        }
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
    fn put_then_get_round_trips() {
        let tier = L1Tier::new(10);
        let e = entry("http://1.1.1.1:80");
        tier.put(&e.key.clone(), e.clone()).unwrap();
        let got = tier.get(&e.key).unwrap().unwrap();
        assert_eq!(got.proxy_url, e.proxy_url);
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let tier = L1Tier::new(2);
        let e1 = entry("http://1.1.1.1:80");
        let e2 = entry("http://2.2.2.2:80");
        let e3 = entry("http://3.3.3.3:80");
        tier.put(&e1.key.clone(), e1.clone()).unwrap();
        tier.put(&e2.key.clone(), e2.clone()).unwrap();
        // touch e1 so e2 becomes LRU
        tier.get(&e1.key).unwrap();
        let evicted = tier.put(&e3.key.clone(), e3.clone()).unwrap();
        assert_eq!(evicted.unwrap().key, e2.key);
        assert!(tier.get(&e1.key).unwrap().is_some());
        assert!(tier.get(&e2.key).unwrap().is_none());
    }

    #[test]
    fn delete_removes_entry() {
        let tier = L1Tier::new(10);
        let e = entry("http://1.1.1.1:80");
        tier.put(&e.key.clone(), e.clone()).unwrap();
        tier.delete(&e.key).unwrap();
        assert!(tier.get(&e.key).unwrap().is_none());
    }

    #[test]
    fn sweep_expired_removes_ttl_expired_entries() {
        let tier = L1Tier::new(10);
        let vault = Vault::new(Some("k"), None);
        let mut e = CacheEntry::new("http://1.1.1.1:80", "test", 3600, None, None, &vault);
        e.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        tier.put(&e.key.clone(), e.clone()).unwrap();
        let removed = tier.sweep_expired().unwrap();
        assert_eq!(removed, 1);
        assert!(tier.get(&e.key).unwrap().is_none());
    }

    mod prop_lru_eviction {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// Universal invariant (spec.md §8): for a tier with
            /// `max_entries = n`, after inserting `n + m` distinct keys with
            /// no intervening accesses (insertion order == recency order),
            /// the `m` least-recently-accessed (i.e. earliest-inserted)
            /// keys are absent and the remaining `n` are present.
            #[test]
            fn oldest_m_keys_evicted_after_n_plus_m_inserts(n in 1usize..6, m in 1usize..6) {
                let tier = L1Tier::new(n);
                let keys: Vec<CacheEntry> = (0..(n + m)).map(|i| entry(&format!("http://10.0.0.{i}:80"))).collect();
                for e in &keys {
                    tier.put(&e.key.clone(), e.clone()).unwrap();
                }
                for evicted in &keys[..m] {
                    prop_assert!(tier.get(&evicted.key).unwrap().is_none());
                }
                for kept in &keys[m..] {
                    prop_assert!(tier.get(&kept.key).unwrap().is_some());
                }
            }
        }
    }

    mod prop_ttl_expiry {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// Universal invariant (spec.md §8): for an entry with
            /// `ttl_seconds = t`, once `fetch_time + t` is in the past,
            /// `sweep_expired` removes it and a subsequent `get` returns
            /// `None`; an entry whose ttl has not yet elapsed survives the
            /// sweep and remains gettable.
            #[test]
            fn expired_entries_are_swept_live_entries_survive(t in 1i64..3600, already_elapsed in prop::bool::ANY) {
                let tier = L1Tier::new(10);
                let vault = Vault::new(Some("k"), None);
                let mut e = CacheEntry::new("http://9.9.9.9:80", "test", t as u64, None, None, &vault);
                if already_elapsed {
                    e.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
                } else {
                    e.expires_at = chrono::Utc::now() + chrono::Duration::seconds(3600);
                }
                tier.put(&e.key.clone(), e.clone()).unwrap();
                tier.sweep_expired().unwrap();

                if already_elapsed {
                    prop_assert!(tier.get(&e.key).unwrap().is_none());
                } else {
                    prop_assert!(tier.get(&e.key).unwrap().is_some());
                }
            }
        }
    }
}
