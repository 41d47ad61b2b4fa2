//! Background health monitor: a cooperative task with explicit
//! `start()`/`stop()` lifecycle, bounded-parallelism validation, and
//! feedback into both the pool (health status, DEAD removal) and the
//! cache (`invalidate_by_health`). Concurrency shape grounded on
//! `examples/l11223-kiro-ai-gateway/src-tauri/src/proxy/proxy_pool.rs::health_check`'s
//! `stream::iter(..).buffer_unordered(20)` pattern; the spawn/sleep outer
//! loop is the same file's `start_health_check_loop`, rewritten with an
//! explicit `CancellationToken` instead of an unbounded `loop {}` so
//! `stop()` has something to signal (spec.md §9: "no implicit daemon
//! threads, cancellation is explicit").

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::manager::CacheManager;
use crate::cache::normalize_url;
use crate::config::{HealthConfig, ValidationLevelConfig};
use crate::domain::HealthStatus;
use crate::pool::ProxyPool;
use crate::validator::{ValidationLevel, Validator};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct HealthMonitorStatus {
    pub last_tick: Option<DateTime<Utc>>,
    pub next_tick: Option<DateTime<Utc>>,
    pub failure_counts: HashMap<Uuid, u32>,
}

fn to_validation_level(config: ValidationLevelConfig) -> ValidationLevel {
    match config {
        ValidationLevelConfig::Basic => ValidationLevel::Basic,
        ValidationLevelConfig::Standard => ValidationLevel::Standard,
        ValidationLevelConfig::Full => ValidationLevel::Full,
    }
}

pub struct HealthMonitor {
    pool: Arc<ProxyPool>,
    cache: Arc<CacheManager>,
    validator: Arc<Validator>,
    config: HealthConfig,
    last_tick: Mutex<Option<DateTime<Utc>>>,
    next_tick: Mutex<Option<DateTime<Utc>>>,
    task: Mutex<Option<(CancellationToken, tokio::task::JoinHandle<()>)>>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<ProxyPool>, cache: Arc<CacheManager>, validator: Arc<Validator>, config: HealthConfig) -> Arc<Self> {
        Arc::new(Self {
            pool,
            cache,
            validator,
            config,
            last_tick: Mutex::new(None),
            next_tick: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Runs one validation sweep: snapshot healthy/degraded proxies,
    /// validate with bounded parallelism, fold results back into pool and
    /// cache state.
    pub async fn tick(&self) {
        *self.last_tick.lock() = Some(Utc::now());

        let snapshot: Vec<_> = self
            .pool
            .all()
            .into_iter()
            .filter(|p| matches!(p.health_status(), HealthStatus::Healthy | HealthStatus::Degraded))
            .collect();

        let concurrency = self.config.concurrency.max(1);
        let timeout = Duration::from_millis(self.config.per_check_timeout_ms);
        let level = to_validation_level(self.config.validation_level);
        let probe_url = self.config.probe_url.clone();

        let results = stream::iter(snapshot)
            .map(|proxy| {
                let validator = self.validator.clone();
                let probe_url = probe_url.clone();
                async move {
                    let result = validator.validate(&proxy, level, &probe_url, timeout).await;
                    (proxy, result)
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        for (proxy, result) in results {
            if result.ok {
                proxy.consecutive_successes.fetch_add(1, Ordering::SeqCst);
                proxy.consecutive_failures.store(0, Ordering::SeqCst);
                proxy.state.lock().health_status = HealthStatus::Healthy;
                continue;
            }

            proxy.consecutive_successes.store(0, Ordering::SeqCst);
            let failures = proxy.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= 2 * self.config.failure_threshold {
                proxy.state.lock().health_status = HealthStatus::Dead;
                tracing::warn!(proxy_id = %proxy.id, failures, "proxy marked DEAD, removing from pool");
                self.pool.remove(&proxy.url());
            } else if failures >= self.config.failure_threshold {
                proxy.state.lock().health_status = HealthStatus::Unhealthy;
                let key = normalize_url(&proxy.url());
                if let Err(e) = self.cache.invalidate_by_health(&key) {
                    tracing::warn!(proxy_id = %proxy.id, error = %e, "cache invalidation on health failure did not complete");
                }
            }
        }

        *self.next_tick.lock() = Some(Utc::now() + chrono::Duration::seconds(self.config.interval_seconds as i64));
    }

    /// Starts the periodic background loop. Calling `start` twice while
    /// already running is a no-op (the prior task keeps running).
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() || !self.config.enabled {
            return;
        }
        let token = CancellationToken::new();
        let this = self.clone();
        let child_token = token.clone();
        let interval_seconds = self.config.interval_seconds.max(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
            loop {
                tokio::select! {
                    _ = child_token.cancelled() => {
                        tracing::info!("health monitor stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        this.tick().await;
                    }
                }
            }
        });
        *task = Some((token, handle));
    }

    /// Idempotent stop: signals cancellation and waits (bounded by a grace
    /// period) for the in-flight tick to finish.
    pub async fn stop(&self) {
        let taken = self.task.lock().take();
        let Some((token, handle)) = taken else {
            return;
        };
        token.cancel();
        let _ = tokio::time::timeout(DEFAULT_GRACE_PERIOD, handle).await;
    }

    pub fn status(&self) -> HealthMonitorStatus {
        let failure_counts = self
            .pool
            .all()
            .into_iter()
            .map(|p| (p.id, p.consecutive_failures.load(Ordering::SeqCst)))
            .collect();
        HealthMonitorStatus { last_tick: *self.last_tick.lock(), next_tick: *self.next_tick.lock(), failure_counts }
    }
}
