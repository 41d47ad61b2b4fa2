//! Cost-aware: weighted random favoring cheaper proxies, `w_i = 1 /
//! (cost_i + eps)`, with a configurable boost for free proxies
//! (`cost_per_request == 0.0`) and an optional hard ceiling via
//! `max_cost_per_request` (spec.md §4.E).

use parking_lot::Mutex;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;

use super::{candidates, SelectionStrategy, StrategyError};
use crate::domain::{ProxyRef, SelectionContext, StrategyConfig};
use crate::pool::ProxyPool;

const EPS: f64 = 1e-6;

pub struct CostAwareStrategy {
    config: Mutex<StrategyConfig>,
}

impl CostAwareStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config: Mutex::new(config) }
    }
}

impl SelectionStrategy for CostAwareStrategy {
    fn name(&self) -> &'static str {
        "cost_aware"
    }

    fn select(&self, pool: &ProxyPool, context: &SelectionContext) -> Result<ProxyRef, StrategyError> {
        let config = self.config.lock();
        let max_cost = config.max_cost_per_request;
        let free_boost = config.free_proxy_boost;
        drop(config);

        let candidates: Vec<ProxyRef> = candidates(pool, context).into_iter().filter(|p| p.cost_per_request <= max_cost).collect();
        if candidates.is_empty() {
            return Err(StrategyError::PoolEmpty);
        }

        let weights: Vec<f64> = candidates
            .iter()
            .map(|p| if p.cost_per_request <= 0.0 { free_boost } else { 1.0 / (p.cost_per_request + EPS) })
            .collect();
        let dist = WeightedIndex::new(&weights).map_err(|_| StrategyError::PoolEmpty)?;
        let chosen = candidates[dist.sample(&mut rand::thread_rng())].clone();
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
