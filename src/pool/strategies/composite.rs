//! Composite: a fixed chain of filter passes (health/exclusion, max
//! response time, min success rate, max cost, geo target) narrows the
//! candidate set, then a final selector picks among what remains. Raises
//! `ProxyPoolEmpty` the moment a pass empties the residual set, per
//! spec.md §9's composite design note ("a list of filter capabilities and
//! one selector capability"). The final selector reuses
//! `StrategyConfig::geo_secondary_strategy` as its selector knob, the same
//! enum `geo_targeted` uses for its own secondary pick.

use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use super::{candidates, SelectionStrategy, StrategyError};
use crate::domain::{ProxyRef, SecondaryStrategy, SelectionContext, StrategyConfig};
use crate::pool::ProxyPool;

pub struct CompositeStrategy {
    config: Mutex<StrategyConfig>,
}

impl CompositeStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config: Mutex::new(config) }
    }

    fn apply_filters(&self, base: Vec<ProxyRef>, context: &SelectionContext) -> Vec<ProxyRef> {
        let config = self.config.lock();
        let mut residual = base;

        if let Some(limit) = config.max_response_time_ms {
            residual.retain(|p| p.ema_response_time_ms().map(|ema| ema <= limit).unwrap_or(true));
        }
        if residual.is_empty() {
            return residual;
        }

        if let Some(min_rate) = config.min_success_rate {
            residual.retain(|p| {
                let total = p.total_requests.load(Ordering::SeqCst);
                if total == 0 {
                    return true;
                }
                let successes = p.total_successes.load(Ordering::SeqCst) as f64;
                successes / total as f64 >= min_rate
            });
        }
        if residual.is_empty() {
            return residual;
        }

        residual.retain(|p| p.cost_per_request <= config.max_cost_per_request);
        if residual.is_empty() {
            return residual;
        }

        if let Some(country) = context.target_country.as_deref() {
            residual.retain(|p| p.country_code.as_deref() == Some(country));
            if residual.is_empty() {
                return residual;
            }
            if let Some(region) = context.target_region.as_deref() {
                let narrowed: Vec<ProxyRef> = residual.iter().filter(|p| p.region.as_deref() == Some(region)).cloned().collect();
                if !narrowed.is_empty() {
                    residual = narrowed;
                }
            }
        }

        residual
    }
}

impl SelectionStrategy for CompositeStrategy {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn select(&self, pool: &ProxyPool, context: &SelectionContext) -> Result<ProxyRef, StrategyError> {
        let base = candidates(pool, context);
        let residual = self.apply_filters(base, context);
        if residual.is_empty() {
            return Err(StrategyError::PoolEmpty);
        }

        let selector = self.config.lock().geo_secondary_strategy;
        let chosen = match selector {
            SecondaryStrategy::Random => residual.choose(&mut rand::thread_rng()).cloned(),
            SecondaryStrategy::LeastUsed => residual.iter().min_by_key(|p| p.total_requests.load(Ordering::SeqCst)).cloned(),
            SecondaryStrategy::RoundRobin => residual.choose(&mut rand::thread_rng()).cloned(),
        }
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
    fn filters_out_proxies_above_max_response_time() {
        let pool = ProxyPool::new();
        let fast = pool.add(healthy_proxy("1.1.1.1"));
        fast.start_request();
        fast.record_result(true, 10.0, 0.2);
        let slow = pool.add(healthy_proxy("2.2.2.2"));
        slow.start_request();
        slow.record_result(true, 900.0, 0.2);

        let strategy = CompositeStrategy::new(StrategyConfig { max_response_time_ms: Some(100.0), ..Default::default() });
        for _ in 0..20 {
            assert_eq!(strategy.select(&pool, &SelectionContext::default()).unwrap().id, fast.id);
        }
    }

    #[test]
    fn filters_out_proxies_below_min_success_rate() {
        let pool = ProxyPool::new();
        let reliable = pool.add(healthy_proxy("1.1.1.1"));
        for _ in 0..10 {
            reliable.start_request();
            reliable.record_result(true, 10.0, 0.2);
        }
        let flaky = pool.add(healthy_proxy("2.2.2.2"));
        for i in 0..10 {
            flaky.start_request();
            flaky.record_result(i < 2, 10.0, 0.2);
        }

        let strategy = CompositeStrategy::new(StrategyConfig { min_success_rate: Some(0.9), ..Default::default() });
        for _ in 0..20 {
            assert_eq!(strategy.select(&pool, &SelectionContext::default()).unwrap().id, reliable.id);
        }
    }

    #[test]
    fn empty_residual_after_filters_raises_pool_empty() {
        let pool = ProxyPool::new();
        pool.add(healthy_proxy("1.1.1.1"));
        let strategy = CompositeStrategy::new(StrategyConfig { max_response_time_ms: Some(1.0), min_success_rate: Some(0.99), ..Default::default() });
        // No data yet, so the response-time filter drops nothing (None passes), but once we
        // record a too-slow result the chain should empty out.
        let p = pool.all().into_iter().next().unwrap();
        p.start_request();
        p.record_result(true, 500.0, 0.2);
        assert_eq!(strategy.select(&pool, &SelectionContext::default()), Err(StrategyError::PoolEmpty));
    }
}
