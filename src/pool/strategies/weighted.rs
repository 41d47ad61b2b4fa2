//! Weighted random selection using `StrategyConfig::weights` (keyed by
//! proxy URL), normalized internally. A proxy with no configured weight
//! gets uniform weight `1/n`.

use parking_lot::Mutex;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;

use super::{candidates, SelectionStrategy, StrategyError};
use crate::domain::{ProxyRef, SelectionContext, StrategyConfig};
use crate::pool::ProxyPool;

pub struct WeightedStrategy {
    config: Mutex<StrategyConfig>,
}

impl WeightedStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config: Mutex::new(config) }
    }
}

impl SelectionStrategy for WeightedStrategy {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn select(&self, pool: &ProxyPool, context: &SelectionContext) -> Result<ProxyRef, StrategyError> {
        let candidates = candidates(pool, context);
        if candidates.is_empty() {
            return Err(StrategyError::PoolEmpty);
        }
        let config = self.config.lock();
        let default_weight = 1.0 / candidates.len() as f64;
        let weights: Vec<f64> = candidates
            .iter()
            .map(|p| config.weights.get(&p.url()).copied().unwrap_or(default_weight).max(0.0))
            .collect();
        drop(config);

        let chosen = if weights.iter().all(|w| *w == 0.0) {
            candidates[0].clone()
        } else {
            let dist = WeightedIndex::new(&weights).map_err(|_| StrategyError::PoolEmpty)?;
            candidates[dist.sample(&mut rand::thread_rng())].clone()
        };
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
