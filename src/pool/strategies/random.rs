//! Uniform random selection over healthy, non-excluded candidates.

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use super::{candidates, SelectionStrategy, StrategyError};
use crate::domain::{ProxyRef, SelectionContext, StrategyConfig};
use crate::pool::ProxyPool;

pub struct RandomStrategy {
    config: Mutex<StrategyConfig>,
}

impl RandomStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config: Mutex::new(config) }
    }
}

impl SelectionStrategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, pool: &ProxyPool, context: &SelectionContext) -> Result<ProxyRef, StrategyError> {
        let candidates = candidates(pool, context);
        let chosen = candidates.choose(&mut rand::thread_rng()).cloned().ok_or(StrategyError::PoolEmpty)?;
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
    fn selects_only_among_healthy_candidates() {
        let pool = ProxyPool::new();
        let p1 = pool.add(healthy_proxy("1.1.1.1"));
        let p2 = pool.add(Proxy::new(ProxyScheme::Http, "2.2.2.2", 8080, "test")); // unknown/unhealthy
        let strategy = RandomStrategy::new(StrategyConfig::default());
        for _ in 0..20 {
            let chosen = strategy.select(&pool, &SelectionContext::default()).unwrap();
            assert_eq!(chosen.id, p1.id);
            assert_ne!(chosen.id, p2.id);
        }
    }

    #[test]
    fn empty_pool_raises_pool_empty() {
        let pool = ProxyPool::new();
        let strategy = RandomStrategy::new(StrategyConfig::default());
        assert_eq!(strategy.select(&pool, &SelectionContext::default()), Err(StrategyError::PoolEmpty));
    }
}
