//! ProxyWhirl: a proxy rotation engine with pluggable selection strategies,
//! a three-tier cache, and a reliability wrapper (retries, circuit breakers,
//! continuous health monitoring).
//!
//! [`Rotator`] is the single entry point an embedder talks to. Per spec.md
//! §3's ownership rule, it exclusively owns the pool, the chosen strategy,
//! the retry engine (and through it, per-proxy circuit breakers), the cache
//! manager, and the health monitor; cache tiers are in turn owned by the
//! cache manager alone. Shape follows the donor's `ProxyPoolManager`/
//! `AppState` role in `examples/l11223-kiro-ai-gateway/src-tauri/src/lib.rs`
//! (a single struct wrapping the subsystems, built from one config), minus
//! the Tauri-specific wiring which is explicitly out of core scope
//! (spec.md §1).

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pool;
pub mod reliability;
pub mod validator;
pub mod vault;

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cache::l1::L1Tier;
use cache::l2::L2Tier;
use cache::l3::L3Tier;
use cache::manager::CacheManager;
use config::RotatorConfig;
use domain::{Proxy, ProxyRef, SelectionContext};
use error::RotatorError;
use pool::strategies::{self, SelectionStrategy};
use pool::ProxyPool;
use reliability::health_monitor::HealthMonitor;
use reliability::retry::{OutboundRequest, OutboundResponse, ReqwestExecutor, RequestExecutor, RetryEngine};
use vault::Vault;

/// Everything the rotator owns, constructed from one [`RotatorConfig`].
///
/// Background tasks (the cache TTL sweeper and the health monitor) are not
/// started automatically — call [`Rotator::start`] once the instance is in
/// its final `Arc`, and [`Rotator::stop`] before dropping it, mirroring the
/// explicit-lifecycle rule in spec.md §4.H ("no implicit daemon threads").
pub struct Rotator {
    pool: Arc<ProxyPool>,
    cache: Arc<CacheManager>,
    vault: Arc<Vault>,
    strategy: Arc<dyn SelectionStrategy>,
    retry: RetryEngine,
    health: Arc<HealthMonitor>,
    ttl_sweeper: std::sync::Mutex<Option<CancellationToken>>,
    cache_cleanup_interval_seconds: u64,
}

impl Rotator {
    /// Builds a rotator from `config`, using the built-in `reqwest`-backed
    /// executor for outbound requests. Opens L2 under `config.cache.l2_dir`
    /// and L3 at `config.cache.l3_path`, creating parent directories as
    /// needed.
    pub fn new(config: RotatorConfig) -> Result<Self, RotatorError> {
        let vault = Arc::new(Vault::from_env());
        Self::with_executor(config, vault, Arc::new(ReqwestExecutor))
    }

    /// Like [`new`](Self::new), but with an injected vault and request
    /// executor — the seam integration tests use to avoid touching the
    /// real network or environment.
    pub fn with_executor(config: RotatorConfig, vault: Arc<Vault>, executor: Arc<dyn RequestExecutor>) -> Result<Self, RotatorError> {
        config.validate()?;

        let l2_dir = Path::new(&config.cache.l2_dir);
        std::fs::create_dir_all(l2_dir).map_err(|_| RotatorError::StorageUnavailable)?;
        if let Some(parent) = Path::new(&config.cache.l3_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|_| RotatorError::StorageUnavailable)?;
            }
        }

        let l1 = Arc::new(L1Tier::new(config.cache.l1_max));
        let l2 = Arc::new(L2Tier::new(l2_dir, config.cache.l2_max));
        let l3 = Arc::new(L3Tier::open(&config.cache.l3_path, config.cache.l3_max)?);
        let cache = Arc::new(CacheManager::with_health_check_invalidation(
            l1,
            l2,
            l3,
            vault.clone(),
            config.cache.failure_threshold,
            config.cache.health_check_invalidation,
        ));

        let pool = Arc::new(ProxyPool::new());
        let strategy: Arc<dyn SelectionStrategy> = strategies::create(&config.strategies.name, config.strategies.config.clone())
            .ok_or_else(|| RotatorError::InvalidConfig(format!("unknown strategy {:?}", config.strategies.name)))?
            .into();

        let validator = Arc::new(validator::Validator::new(executor.clone()));
        let health = HealthMonitor::new(pool.clone(), cache.clone(), validator, config.health.clone());

        let retry = RetryEngine::new(pool.clone(), strategy.clone(), executor, config.breaker.clone(), config.retry.clone());

        Ok(Self {
            pool,
            cache,
            vault,
            strategy,
            retry,
            health,
            ttl_sweeper: std::sync::Mutex::new(None),
            cache_cleanup_interval_seconds: config.cache.cleanup_interval_seconds,
        })
    }

    /// Starts the health monitor and cache TTL sweeper background tasks.
    /// Idempotent: calling twice while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        self.health.start();
        let mut guard = self.ttl_sweeper.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let cache = self.cache.clone();
        let interval = self.cache_cleanup_interval_seconds;
        let child = token.clone();
        tokio::spawn(async move {
            cache.run_ttl_sweeper(interval, child).await;
        });
        *guard = Some(token);
    }

    /// Stops both background tasks. Safe to call even if `start` was never
    /// called, or if called more than once.
    pub async fn stop(&self) {
        self.health.stop().await;
        if let Some(token) = self.ttl_sweeper.lock().unwrap().take() {
            token.cancel();
        }
    }

    /// Adds (or, for an existing URL, updates classification fields on) a
    /// proxy, and writes it through to the cache so it survives a restart.
    pub fn add_proxy(&self, proxy: Proxy, ttl_seconds: u64) -> Result<ProxyRef, RotatorError> {
        let entry = cache::CacheEntry::new(
            proxy.url(),
            proxy.source.clone(),
            ttl_seconds,
            proxy.username.as_deref(),
            proxy.password.as_ref().map(|s| s.0.as_str()),
            &self.vault,
        );
        self.cache.put(&entry.key.clone(), entry)?;
        Ok(self.pool.add(proxy))
    }

    /// Removes a proxy from the live pool and its cache entry.
    pub fn remove_proxy(&self, url: &str) -> Result<(), RotatorError> {
        self.pool.remove(url);
        self.cache.delete(&cache::derive_key(url))?;
        Ok(())
    }

    /// Executes `request`, retrying across proxies per the configured
    /// retry/breaker policy. This is the primary entry point for callers.
    pub async fn request(&self, request: &OutboundRequest, context: SelectionContext) -> Result<OutboundResponse, RotatorError> {
        self.retry.execute(request, context).await
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn strategy(&self) -> &Arc<dyn SelectionStrategy> {
        &self.strategy
    }

    pub fn health_status(&self) -> reliability::health_monitor::HealthMonitorStatus {
        self.health.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ProxyScheme;
    use reliability::retry::{ExecutorError, ExecutorFuture};
    use std::collections::HashMap;

    struct AlwaysOk;
    impl RequestExecutor for AlwaysOk {
        fn execute<'a>(&'a self, _proxy: &'a ProxyRef, _request: &'a OutboundRequest) -> ExecutorFuture<'a> {
            Box::pin(async { Ok(OutboundResponse { status: 200, headers: HashMap::new(), body: Vec::new() }) })
        }
    }

    struct AlwaysFail;
    impl RequestExecutor for AlwaysFail {
        fn execute<'a>(&'a self, _proxy: &'a ProxyRef, _request: &'a OutboundRequest) -> ExecutorFuture<'a> {
            Box::pin(async { Err(ExecutorError::Transport("down".to_string())) })
        }
    }

    fn test_config(dir: &std::path::Path) -> RotatorConfig {
        let mut cfg = RotatorConfig::default();
        cfg.cache.l2_dir = dir.join("l2").to_string_lossy().to_string();
        cfg.cache.l3_path = dir.join("db").join("cache.db").to_string_lossy().to_string();
        cfg.health.enabled = false;
        cfg
    }

    #[tokio::test]
    async fn add_proxy_is_selectable_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(Vault::new(Some("k"), None));
        let rotator = Rotator::with_executor(test_config(dir.path()), vault, Arc::new(AlwaysOk)).unwrap();

        let proxy = Proxy::new(ProxyScheme::Http, "1.1.1.1", 8080, "test");
        proxy.state.lock().health_status = domain::HealthStatus::Healthy;
        let url = proxy.url();
        rotator.add_proxy(proxy, 3600).unwrap();

        assert_eq!(rotator.pool().len(), 1);
        let cached = rotator.cache().get(&cache::derive_key(&url)).unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn request_round_trips_through_retry_engine() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(Vault::new(Some("k"), None));
        let rotator = Rotator::with_executor(test_config(dir.path()), vault, Arc::new(AlwaysOk)).unwrap();
        let proxy = Proxy::new(ProxyScheme::Http, "1.1.1.1", 8080, "test");
        proxy.state.lock().health_status = domain::HealthStatus::Healthy;
        rotator.add_proxy(proxy, 3600).unwrap();

        let request = OutboundRequest {
            method: "GET".to_string(),
            url: "http://example.com".to_string(),
            headers: HashMap::new(),
            body: None,
            timeout_ms: 1000,
        };
        let resp = rotator.request(&request, SelectionContext::default()).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_all_proxies_failed() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(Vault::new(Some("k"), None));
        let mut cfg = test_config(dir.path());
        cfg.retry.max_attempts = 1;
        let rotator = Rotator::with_executor(cfg, vault, Arc::new(AlwaysFail)).unwrap();
        let proxy = Proxy::new(ProxyScheme::Http, "1.1.1.1", 8080, "test");
        proxy.state.lock().health_status = domain::HealthStatus::Healthy;
        rotator.add_proxy(proxy, 3600).unwrap();

        let request = OutboundRequest {
            method: "GET".to_string(),
            url: "http://example.com".to_string(),
            headers: HashMap::new(),
            body: None,
            timeout_ms: 1000,
        };
        let err = rotator.request(&request, SelectionContext::default()).await.unwrap_err();
        assert!(matches!(err, RotatorError::AllProxiesFailed { .. }));
    }

    #[tokio::test]
    async fn remove_proxy_drops_it_from_pool() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(Vault::new(Some("k"), None));
        let rotator = Rotator::with_executor(test_config(dir.path()), vault, Arc::new(AlwaysOk)).unwrap();
        let proxy = Proxy::new(ProxyScheme::Http, "1.1.1.1", 8080, "test");
        let url = proxy.url();
        rotator.add_proxy(proxy, 3600).unwrap();
        assert_eq!(rotator.pool().len(), 1);

        rotator.remove_proxy(&url).unwrap();
        assert_eq!(rotator.pool().len(), 0);
    }

    #[tokio::test]
    async fn start_and_stop_background_tasks_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(Vault::new(Some("k"), None));
        let mut cfg = test_config(dir.path());
        cfg.cache.cleanup_interval_seconds = 3600;
        let rotator = Arc::new(Rotator::with_executor(cfg, vault, Arc::new(AlwaysOk)).unwrap());
        rotator.start();
        rotator.start();
        rotator.stop().await;
        rotator.stop().await;
    }
}
