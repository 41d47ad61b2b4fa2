//! Performance-based: cold-start uniform random until every healthy
//! candidate has completed `config.cold_start_k` requests (default 5),
//! then weighted random with `w_i = 1 / (ema_i + eps)`. Failures are fed
//! back as a fixed high-latency penalty so a flaky proxy's EMA rises even
//! without a real latency sample (spec.md §4.E).

use parking_lot::Mutex;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;

use super::{candidates, SelectionStrategy, StrategyError};
use crate::domain::{ProxyRef, SelectionContext, StrategyConfig};
use crate::pool::ProxyPool;

const EPS: f64 = 1e-6;

pub struct PerformanceStrategy {
    config: Mutex<StrategyConfig>,
}

impl PerformanceStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config: Mutex::new(config) }
    }
}

impl SelectionStrategy for PerformanceStrategy {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn select(&self, pool: &ProxyPool, context: &SelectionContext) -> Result<ProxyRef, StrategyError> {
        let candidates = candidates(pool, context);
        if candidates.is_empty() {
            return Err(StrategyError::PoolEmpty);
        }
        let cold_start_k = self.config.lock().cold_start_k as u64;
        let any_cold = candidates
            .iter()
            .any(|p| p.total_requests.load(std::sync::atomic::Ordering::SeqCst) < cold_start_k);

        let chosen = if any_cold {
            use rand::seq::SliceRandom;
            candidates.choose(&mut rand::thread_rng()).cloned().ok_or(StrategyError::PoolEmpty)?
        } else {
            let weights: Vec<f64> = candidates
                .iter()
                .map(|p| 1.0 / (p.ema_response_time_ms().unwrap_or(0.0) + EPS))
                .collect();
            let dist = WeightedIndex::new(&weights).map_err(|_| StrategyError::PoolEmpty)?;
            candidates[dist.sample(&mut rand::thread_rng())].clone()
        };
        chosen.start_request();
        Ok(chosen)
    }

    fn record_result(&self, proxy: &ProxyRef, success: bool, response_time_ms: f64) {
        let config = self.config.lock();
        let elapsed = if success { response_time_ms } else { config.failure_penalty_ms };
        let alpha = config.ema_alpha;
        drop(config);
        proxy.record_result(success, elapsed, alpha);
    }

    fn configure(&self, config: StrategyConfig) {
        *self.config.lock() = config;
    }

    fn config(&self) -> StrategyConfig {
        self.config.lock().clone()
    }
}
