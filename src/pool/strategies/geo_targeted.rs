//! Geo-targeted: narrows candidates to `target_country` (then, within that,
//! `target_region`) before applying a secondary strategy. Falls back to the
//! full healthy pool when `geo_fallback_enabled` and no geo match exists,
//! grounded on `ProxyPool::by_country`/`by_region` plus the secondary-
//! strategy indirection spec'd in spec.md §4.E.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use super::{candidates, SelectionStrategy, StrategyError};
use crate::domain::{ProxyRef, SecondaryStrategy, SelectionContext, StrategyConfig};
use crate::pool::ProxyPool;

pub struct GeoTargetedStrategy {
    config: Mutex<StrategyConfig>,
    round_robin_cursors: Mutex<HashMap<String, usize>>,
}

impl GeoTargetedStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config: Mutex::new(config), round_robin_cursors: Mutex::new(HashMap::new()) }
    }

    fn pick_secondary(&self, list: &[ProxyRef], which: SecondaryStrategy, cursor_key: &str) -> Option<ProxyRef> {
        if list.is_empty() {
            return None;
        }
        match which {
            SecondaryStrategy::Random => list.choose(&mut rand::thread_rng()).cloned(),
            SecondaryStrategy::LeastUsed => list
                .iter()
                .min_by_key(|p| p.total_requests.load(std::sync::atomic::Ordering::SeqCst))
                .cloned(),
            SecondaryStrategy::RoundRobin => {
                let mut cursors = self.round_robin_cursors.lock();
                let cursor = cursors.entry(cursor_key.to_string()).or_insert(0);
                let idx = *cursor % list.len();
                *cursor = (idx + 1) % list.len();
                list.get(idx).cloned()
            }
        }
    }
}

impl SelectionStrategy for GeoTargetedStrategy {
    fn name(&self) -> &'static str {
        "geo_targeted"
    }

    fn select(&self, pool: &ProxyPool, context: &SelectionContext) -> Result<ProxyRef, StrategyError> {
        let base = candidates(pool, context);
        let secondary = self.config.lock().geo_secondary_strategy;

        let Some(country) = context.target_country.as_deref() else {
            return self
                .pick_secondary(&base, secondary, "global")
                .map(|p| {
                    p.start_request();
                    p
                })
                .ok_or(StrategyError::PoolEmpty);
        };

        let by_country: Vec<ProxyRef> = base.iter().filter(|p| p.country_code.as_deref() == Some(country)).cloned().collect();

        let (narrowed, cursor_key) = if let Some(region) = context.target_region.as_deref() {
            let by_region: Vec<ProxyRef> = by_country.iter().filter(|p| p.region.as_deref() == Some(region)).cloned().collect();
            if by_region.is_empty() {
                (by_country, format!("country:{country}"))
            } else {
                (by_region, format!("country:{country}:region:{region}"))
            }
        } else {
            (by_country, format!("country:{country}"))
        };

        if !narrowed.is_empty() {
            return self
                .pick_secondary(&narrowed, secondary, &cursor_key)
                .map(|p| {
                    p.start_request();
                    p
                })
                .ok_or(StrategyError::PoolEmpty);
        }

        let fallback_enabled = self.config.lock().geo_fallback_enabled;
        if fallback_enabled {
            self.pick_secondary(&base, secondary, "global-fallback")
                .map(|p| {
                    p.start_request();
                    p
                })
                .ok_or(StrategyError::PoolEmpty)
        } else {
            Err(StrategyError::PoolEmpty)
        }
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

    fn geo_proxy(host: &str, country: &str, region: &str) -> Proxy {
        let p = Proxy::new(ProxyScheme::Http, host, 8080, "test");
        p.state.lock().health_status = HealthStatus::Healthy;
        p.country_code = Some(country.to_string());
        p.region = Some(region.to_string());
        p
    }

    #[test]
    fn matches_country_and_region() {
        let pool = ProxyPool::new();
        let us_west = pool.add(geo_proxy("1.1.1.1", "US", "west"));
        pool.add(geo_proxy("2.2.2.2", "US", "east"));
        pool.add(geo_proxy("3.3.3.3", "DE", "west"));
        let strategy = GeoTargetedStrategy::new(StrategyConfig::default());

        let ctx = SelectionContext {
            target_country: Some("US".to_string()),
            target_region: Some("west".to_string()),
            ..Default::default()
        };
        let chosen = strategy.select(&pool, &ctx).unwrap();
        assert_eq!(chosen.id, us_west.id);
    }

    #[test]
    fn no_match_without_fallback_raises_pool_empty() {
        let pool = ProxyPool::new();
        pool.add(geo_proxy("1.1.1.1", "US", "west"));
        let strategy = GeoTargetedStrategy::new(StrategyConfig { geo_fallback_enabled: false, ..Default::default() });
        let ctx = SelectionContext { target_country: Some("JP".to_string()), ..Default::default() };
        assert_eq!(strategy.select(&pool, &ctx), Err(StrategyError::PoolEmpty));
    }

    #[test]
    fn no_match_with_fallback_uses_any_healthy_proxy() {
        let pool = ProxyPool::new();
        let us = pool.add(geo_proxy("1.1.1.1", "US", "west"));
        let strategy = GeoTargetedStrategy::new(StrategyConfig { geo_fallback_enabled: true, ..Default::default() });
        let ctx = SelectionContext { target_country: Some("JP".to_string()), ..Default::default() };
        let chosen = strategy.select(&pool, &ctx).unwrap();
        assert_eq!(chosen.id, us.id);
    }

    #[test]
    fn no_target_country_applies_secondary_over_all_healthy() {
        let pool = ProxyPool::new();
        pool.add(geo_proxy("1.1.1.1", "US", "west"));
        pool.add(geo_proxy("2.2.2.2", "DE", "east"));
        let strategy = GeoTargetedStrategy::new(StrategyConfig::default());
        assert!(strategy.select(&pool, &SelectionContext::default()).is_ok());
    }
}
