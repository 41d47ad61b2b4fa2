//! Round-robin: monotonic cursor over the pool's insertion order, skipping
//! unhealthy/excluded entries. Grounded on
//! `examples/l11223-kiro-ai-gateway/src-tauri/src/proxy/proxy_pool.rs::select_round_robin`'s
//! atomic-index-mod-length idiom, extended with skip-forward so the cursor
//! tracks pool position rather than the shrinking healthy sublist — this is
//! what makes "pool resize resets to 0" well defined (spec.md §4.E).

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{SelectionStrategy, StrategyError};
use crate::domain::{ProxyRef, SelectionContext, StrategyConfig};
use crate::pool::ProxyPool;

pub struct RoundRobinStrategy {
    config: Mutex<StrategyConfig>,
    cursor: AtomicUsize,
    last_total_len: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config: Mutex::new(config),
            cursor: AtomicUsize::new(0),
            last_total_len: AtomicUsize::new(0),
        }
    }
}

impl SelectionStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, pool: &ProxyPool, context: &SelectionContext) -> Result<ProxyRef, StrategyError> {
        let all = pool.all();
        let total = all.len();
        if total == 0 {
            return Err(StrategyError::PoolEmpty);
        }
        let prev_total = self.last_total_len.swap(total, Ordering::SeqCst);
        if prev_total != total {
            self.cursor.store(0, Ordering::SeqCst);
        }

        let start = self.cursor.load(Ordering::SeqCst) % total;
        for offset in 0..total {
            let idx = (start + offset) % total;
            let candidate = &all[idx];
            if candidate.is_healthy() && !context.excludes(candidate.id) {
                self.cursor.store((idx + 1) % total, Ordering::SeqCst);
                candidate.start_request();
                return Ok(candidate.clone());
            }
        }
        Err(StrategyError::PoolEmpty)
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
    use crate::domain::ProxyScheme;
    use crate::pool::ProxyPool;

    fn healthy_proxy(host: &str) -> crate::domain::Proxy {
        let p = crate::domain::Proxy::new(ProxyScheme::Http, host, 8080, "test");
        p.state.lock().health_status = crate::domain::HealthStatus::Healthy;
        p
    }

    fn setup() -> (ProxyPool, Vec<uuid::Uuid>) {
        let pool = ProxyPool::new();
        let mut ids = Vec::new();
        for host in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            let p = pool.add(healthy_proxy(host));
            ids.push(p.id);
        }
        (pool, ids)
    }

    #[test]
    fn round_robin_concrete_scenario() {
        let (pool, ids) = setup();
        let strategy = RoundRobinStrategy::new(StrategyConfig::default());
        let ctx = SelectionContext::default();

        let mut seq = Vec::new();
        for _ in 0..4 {
            seq.push(strategy.select(&pool, &ctx).unwrap().id);
        }
        assert_eq!(seq, vec![ids[0], ids[1], ids[2], ids[0]]);

        // Mark P2 unhealthy.
        pool.get(ids[1]).unwrap().state.lock().health_status = crate::domain::HealthStatus::Unhealthy;

        let mut seq2 = Vec::new();
        for _ in 0..3 {
            seq2.push(strategy.select(&pool, &ctx).unwrap().id);
        }
        assert_eq!(seq2, vec![ids[2], ids[0], ids[2]]);
    }

    #[test]
    fn empty_pool_raises_pool_empty() {
        let pool = ProxyPool::new();
        let strategy = RoundRobinStrategy::new(StrategyConfig::default());
        assert_eq!(strategy.select(&pool, &SelectionContext::default()), Err(StrategyError::PoolEmpty));
    }

    #[test]
    fn exclusion_set_is_honored() {
        let (pool, ids) = setup();
        let strategy = RoundRobinStrategy::new(StrategyConfig::default());
        let ctx = SelectionContext {
            failed_proxy_ids: vec![ids[0]],
            ..Default::default()
        };
        let selected = strategy.select(&pool, &ctx).unwrap();
        assert_ne!(selected.id, ids[0]);
    }

    mod prop_strategy_exclusion {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// Universal invariant (spec.md §8): for any strategy, if
            /// `context.failed_proxy_ids` contains id X, `select` never
            /// returns a proxy with id X.
            #[test]
            fn excluded_id_is_never_returned(pool_size in 2usize..8, exclude_idx in 0usize..8, selections in 1usize..10) {
                let pool = ProxyPool::new();
                let mut ids = Vec::new();
                for i in 0..pool_size {
                    ids.push(pool.add(healthy_proxy(&format!("10.0.0.{i}"))).id);
                }
                let exclude_idx = exclude_idx % pool_size;
                let excluded = ids[exclude_idx];
                let strategy = RoundRobinStrategy::new(StrategyConfig::default());
                let ctx = SelectionContext { failed_proxy_ids: vec![excluded], ..Default::default() };

                for _ in 0..selections {
                    if let Ok(selected) = strategy.select(&pool, &ctx) {
                        prop_assert_ne!(selected.id, excluded);
                    }
                }
            }
        }
    }
}
