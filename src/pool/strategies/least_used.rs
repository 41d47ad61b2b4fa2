//! Least-used: argmin over `total_requests`. Ties break FIFO by pool
//! insertion order (the first proxy reaching the minimum wins), grounded on
//! `examples/l11223-kiro-ai-gateway/src-tauri/src/proxy/proxy_pool.rs::select_least_connections`.

use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use super::{candidates, SelectionStrategy, StrategyError};
use crate::domain::{ProxyRef, SelectionContext, StrategyConfig};
use crate::pool::ProxyPool;

pub struct LeastUsedStrategy {
    config: Mutex<StrategyConfig>,
}

impl LeastUsedStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config: Mutex::new(config) }
    }
}

impl SelectionStrategy for LeastUsedStrategy {
    fn name(&self) -> &'static str {
        "least_used"
    }

    fn select(&self, pool: &ProxyPool, context: &SelectionContext) -> Result<ProxyRef, StrategyError> {
        let candidates = candidates(pool, context);
        let chosen = candidates
            .into_iter()
            .min_by_key(|p| p.total_requests.load(Ordering::SeqCst))
            .ok_or(StrategyError::PoolEmpty)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HealthStatus, Proxy, ProxyScheme};

    fn healthy_proxy(host: &str) -> Proxy {
        let p = Proxy::new(ProxyScheme::Http, host, 8080, "test");
        p.state.lock().health_status = HealthStatus::Healthy;
        p
    }

    #[test]
    fn picks_proxy_with_fewest_requests() {
        let pool = ProxyPool::new();
        let p1 = pool.add(healthy_proxy("1.1.1.1"));
        let p2 = pool.add(healthy_proxy("2.2.2.2"));
        p1.start_request();
        p1.record_result(true, 10.0, 0.2);
        p1.start_request();
        p1.record_result(true, 10.0, 0.2);

        let strategy = LeastUsedStrategy::new(StrategyConfig::default());
        let chosen = strategy.select(&pool, &SelectionContext::default()).unwrap();
        assert_eq!(chosen.id, p2.id);
    }

    #[test]
    fn ties_break_fifo_by_insertion_order() {
        let pool = ProxyPool::new();
        let p1 = pool.add(healthy_proxy("1.1.1.1"));
        pool.add(healthy_proxy("2.2.2.2"));
        let strategy = LeastUsedStrategy::new(StrategyConfig::default());
        let chosen = strategy.select(&pool, &SelectionContext::default()).unwrap();
        assert_eq!(chosen.id, p1.id);
    }
}
