//! Session-persistent: binds a `session_id` to a proxy so repeat requests
//! from the same caller land on the same upstream. Bindings expire after
//! `session_stickiness_duration_seconds` of inactivity and the table is
//! bounded by `max_sessions` via LRU eviction (spec.md §4.E), grounded on
//! the donor's `proxy_pool.rs` health-aware reselection idiom: a bound
//! proxy that has gone unhealthy triggers failover to a freshly chosen one
//! rather than returning a dead endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{candidates, SelectionStrategy, StrategyError};
use crate::domain::{ProxyRef, SelectionContext, StrategyConfig};
use crate::pool::ProxyPool;

struct Binding {
    proxy_id: Uuid,
    expires_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
}

pub struct SessionPersistentStrategy {
    config: Mutex<StrategyConfig>,
    sessions: Mutex<HashMap<String, Binding>>,
    fallback_cursor: AtomicUsize,
}

impl SessionPersistentStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config: Mutex::new(config), sessions: Mutex::new(HashMap::new()), fallback_cursor: AtomicUsize::new(0) }
    }

    /// Round-robin fallback over the healthy candidate set, used whenever a
    /// session has no usable binding (spec.md §4.E: "pick a fallback
    /// (round-robin over healthy) and bind the session").
    fn pick_fallback(&self, candidates: &[ProxyRef]) -> Option<ProxyRef> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.fallback_cursor.fetch_add(1, Ordering::SeqCst) % candidates.len();
        candidates.get(idx).cloned()
    }

    fn evict_lru_if_full(sessions: &mut HashMap<String, Binding>, max_sessions: usize) {
        if sessions.len() < max_sessions {
            return;
        }
        if let Some(oldest_key) = sessions
            .iter()
            .min_by_key(|(_, b)| b.last_access)
            .map(|(k, _)| k.clone())
        {
            sessions.remove(&oldest_key);
        }
    }

    /// Number of live (non-expired) session bindings. Exposed for tests and
    /// diagnostics; not part of the `SelectionStrategy` contract.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl SelectionStrategy for SessionPersistentStrategy {
    fn name(&self) -> &'static str {
        "session_persistent"
    }

    fn select(&self, pool: &ProxyPool, context: &SelectionContext) -> Result<ProxyRef, StrategyError> {
        let Some(session_id) = context.session_id.clone() else {
            let candidates = candidates(pool, context);
            let chosen = self.pick_fallback(&candidates).ok_or(StrategyError::PoolEmpty)?;
            chosen.start_request();
            return Ok(chosen);
        };

        let now = Utc::now();
        let ttl_seconds = self.config.lock().session_stickiness_duration_seconds;
        let ttl = Duration::seconds(ttl_seconds as i64);

        let mut sessions = self.sessions.lock();
        if let Some(binding) = sessions.get(&session_id) {
            if binding.expires_at > now {
                if let Some(proxy) = pool.get(binding.proxy_id) {
                    if proxy.is_healthy() && !context.excludes(proxy.id) {
                        let entry = sessions.get_mut(&session_id).unwrap();
                        entry.expires_at = now + ttl;
                        entry.last_access = now;
                        drop(sessions);
                        proxy.start_request();
                        return Ok(proxy);
                    }
                }
            }
        }

        // No usable binding: failover to a freshly chosen candidate.
        let candidate_set = candidates(pool, context);
        let chosen = self.pick_fallback(&candidate_set).ok_or(StrategyError::PoolEmpty)?;

        let max_sessions = self.config.lock().max_sessions;
        Self::evict_lru_if_full(&mut sessions, max_sessions);
        sessions.insert(session_id, Binding { proxy_id: chosen.id, expires_at: now + ttl, last_access: now });
        drop(sessions);

        chosen.start_request();
        Ok(chosen)
    }

    fn configure(&self, config: StrategyConfig) {
        *self.config.lock() = config;
    }

    fn config(&self) -> StrategyConfig {
        self.config.lock().clone()
    }
}
