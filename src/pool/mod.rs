//! The proxy pool: a concurrently accessible set of `Proxy` with
//! at-most-one entry per URL. Grounded on
//! `examples/l11223-kiro-ai-gateway/src-tauri/src/proxy/proxy_pool.rs`'s
//! `ProxyPoolManager`, generalized from that file's account-bound proxy
//! list to the pool/strategy/health model spec'd for ProxyWhirl.

pub mod strategies;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::{Proxy, ProxyRef};

struct PoolInner {
    by_id: HashMap<Uuid, ProxyRef>,
    by_url: HashMap<String, Uuid>,
    /// Insertion order, for deterministic iteration (round-robin etc).
    /// Updating an existing URL does not move its position.
    order: Vec<Uuid>,
}

/// Owns the live set of proxies. All cross-proxy mutations (add/remove) are
/// serialized via a single writer lock; per-proxy counter updates use
/// atomics on `Proxy` itself and don't need this lock.
pub struct ProxyPool {
    inner: RwLock<PoolInner>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                by_id: HashMap::new(),
                by_url: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Adds a proxy. Re-adding the same URL updates classification fields
    /// in place while preserving the existing counters and health state.
    pub fn add(&self, incoming: Proxy) -> ProxyRef {
        let url = incoming.normalized_url();
        let mut inner = self.inner.write();
        if let Some(existing_id) = inner.by_url.get(&url).copied() {
            if let Some(old) = inner.by_id.get(&existing_id).cloned() {
                let merged = Proxy {
                    id: existing_id,
                    scheme: incoming.scheme,
                    host: incoming.host,
                    port: incoming.port,
                    username: incoming.username,
                    password: incoming.password,
                    source: incoming.source,
                    country_code: incoming.country_code,
                    region: incoming.region,
                    cost_per_request: incoming.cost_per_request,
                    metadata: incoming.metadata,
                    consecutive_failures: std::sync::atomic::AtomicU32::new(
                        old.consecutive_failures.load(std::sync::atomic::Ordering::SeqCst),
                    ),
                    consecutive_successes: std::sync::atomic::AtomicU32::new(
                        old.consecutive_successes.load(std::sync::atomic::Ordering::SeqCst),
                    ),
                    total_requests: std::sync::atomic::AtomicU64::new(
                        old.total_requests.load(std::sync::atomic::Ordering::SeqCst),
                    ),
                    total_successes: std::sync::atomic::AtomicU64::new(
                        old.total_successes.load(std::sync::atomic::Ordering::SeqCst),
                    ),
                    total_failures: std::sync::atomic::AtomicU64::new(
                        old.total_failures.load(std::sync::atomic::Ordering::SeqCst),
                    ),
                    in_flight: std::sync::atomic::AtomicU64::new(old.in_flight.load(std::sync::atomic::Ordering::SeqCst)),
                    state: parking_lot::Mutex::new(old.state.lock().clone()),
                };
                let arc = Arc::new(merged);
                inner.by_id.insert(existing_id, arc.clone());
                return arc;
            }
        }
        let id = incoming.id;
        let arc = Arc::new(incoming);
        inner.by_url.insert(url, id);
        inner.by_id.insert(id, arc.clone());
        inner.order.push(id);
        arc
    }

    pub fn remove(&self, url: &str) -> Option<ProxyRef> {
        let normalized = crate::cache::normalize_url(url);
        let mut inner = self.inner.write();
        let id = inner.by_url.remove(&normalized)?;
        inner.order.retain(|&x| x != id);
        inner.by_id.remove(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<ProxyRef> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// All proxies, in insertion order.
    pub fn all(&self) -> Vec<ProxyRef> {
        let inner = self.inner.read();
        inner.order.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect()
    }

    /// Healthy proxies, in insertion order.
    pub fn healthy(&self) -> Vec<ProxyRef> {
        self.all().into_iter().filter(|p| p.is_healthy()).collect()
    }

    pub fn by_country(&self, code: &str) -> Vec<ProxyRef> {
        self.all().into_iter().filter(|p| p.country_code.as_deref() == Some(code)).collect()
    }

    pub fn by_region(&self, name: &str) -> Vec<ProxyRef> {
        self.all().into_iter().filter(|p| p.region.as_deref() == Some(name)).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProxyScheme;

    fn proxy(host: &str) -> Proxy {
        Proxy::new(ProxyScheme::Http, host, 8080, "test")
    }

    #[test]
    fn add_enforces_one_entry_per_url() {
        let pool = ProxyPool::new();
        pool.add(proxy("1.1.1.1"));
        pool.add(proxy("1.1.1.1"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn readd_preserves_counters() {
        let pool = ProxyPool::new();
        let p1 = pool.add(proxy("1.1.1.1"));
        p1.start_request();
        p1.record_result(true, 42.0, 0.2);
        assert_eq!(p1.total_requests.load(std::sync::atomic::Ordering::SeqCst), 1);

        let mut updated = proxy("1.1.1.1");
        updated.country_code = Some("US".to_string());
        let p2 = pool.add(updated);
        assert_eq!(p2.total_requests.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(p2.country_code.as_deref(), Some("US"));
    }

    #[test]
    fn remove_deletes_by_url() {
        let pool = ProxyPool::new();
        pool.add(proxy("1.1.1.1"));
        assert!(pool.remove("http://1.1.1.1:8080").is_some());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn by_country_filters() {
        let pool = ProxyPool::new();
        let mut p = proxy("1.1.1.1");
        p.country_code = Some("DE".to_string());
        pool.add(p);
        pool.add(proxy("2.2.2.2"));
        assert_eq!(pool.by_country("DE").len(), 1);
    }
}
