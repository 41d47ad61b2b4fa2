//! Retry engine: executes a request through the pool and a selection
//! strategy with bounded attempts, backoff, and per-proxy circuit breakers.
//! The request-execution seam (`RequestExecutor`) is a manually boxed
//! async trait (no `async-trait` dependency in the donor's stack); the
//! default `ReqwestExecutor` is grounded on
//! `examples/l11223-kiro-ai-gateway/src-tauri/src/proxy/proxy_pool.rs::check_proxy_health`'s
//! per-request `Client::builder().proxy(..).timeout(..)` idiom.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use uuid::Uuid;

use crate::config::{BackoffKind, BreakerConfig, RetryConfig};
use crate::domain::{ProxyRef, SelectionContext};
use crate::error::RotatorError;
use crate::pool::strategies::SelectionStrategy;
use crate::pool::ProxyPool;
use crate::reliability::circuit_breaker::CircuitBreaker;

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

pub type ExecutorFuture<'a> = Pin<Box<dyn Future<Output = Result<OutboundResponse, ExecutorError>> + Send + 'a>>;

/// Abstraction over "perform this request against this proxy", so the
/// retry engine's attempt/backoff/breaker logic is testable without a
/// live network. `execute` takes `&self` and borrows its arguments so
/// callers can box a closure-backed implementation for tests.
pub trait RequestExecutor: Send + Sync {
    fn execute<'a>(&'a self, proxy: &'a ProxyRef, request: &'a OutboundRequest) -> ExecutorFuture<'a>;
}

pub struct ReqwestExecutor;

impl RequestExecutor for ReqwestExecutor {
    fn execute<'a>(&'a self, proxy: &'a ProxyRef, request: &'a OutboundRequest) -> ExecutorFuture<'a> {
        Box::pin(async move {
            let mut proxy_builder = reqwest::Proxy::all(proxy.url()).map_err(|e| ExecutorError::Transport(e.to_string()))?;
            if let Some(user) = &proxy.username {
                let pass = proxy.password.as_ref().map(|s| s.0.clone()).unwrap_or_default();
                proxy_builder = proxy_builder.basic_auth(user, &pass);
            }
            let client = reqwest::Client::builder()
                .proxy(proxy_builder)
                .timeout(Duration::from_millis(request.timeout_ms))
                .build()
                .map_err(|e| ExecutorError::Transport(e.to_string()))?;

            let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| ExecutorError::Transport(e.to_string()))?;
            let mut builder = client.request(method, &request.url);
            for (k, v) in &request.headers {
                builder = builder.header(k, v);
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let resp = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::Timeout
                } else {
                    ExecutorError::Transport(e.to_string())
                }
            })?;
            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();
            let body = resp.bytes().await.map_err(|e| ExecutorError::Transport(e.to_string()))?.to_vec();
            Ok(OutboundResponse { status, headers, body })
        })
    }
}

fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay_ms as f64;
    let raw = match config.backoff {
        BackoffKind::Constant => base,
        BackoffKind::Linear => base * attempt as f64,
        BackoffKind::Exponential | BackoffKind::JitteredExponential => base * config.multiplier.powi(attempt as i32 - 1),
    };
    let capped = raw.min(config.max_delay_ms as f64);
    let final_ms = if config.jitter || config.backoff == BackoffKind::JitteredExponential {
        rand::thread_rng().gen_range((capped * 0.5)..=(capped * 1.5))
    } else {
        capped
    };
    Duration::from_millis(final_ms.max(0.0) as u64)
}

/// One link in the failure chain surfaced via `AllProxiesFailed`.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub proxy_id: Option<Uuid>,
    pub error_kind: String,
}

pub struct RetryEngine {
    pool: Arc<ProxyPool>,
    strategy: Arc<dyn SelectionStrategy>,
    executor: Arc<dyn RequestExecutor>,
    breakers: DashMap<Uuid, Arc<CircuitBreaker>>,
    breaker_config: BreakerConfig,
    retry_config: RetryConfig,
}

impl RetryEngine {
    pub fn new(
        pool: Arc<ProxyPool>,
        strategy: Arc<dyn SelectionStrategy>,
        executor: Arc<dyn RequestExecutor>,
        breaker_config: BreakerConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self { pool, strategy, executor, breakers: DashMap::new(), breaker_config, retry_config }
    }

    fn breaker_for(&self, id: Uuid) -> Arc<CircuitBreaker> {
        self.breakers.entry(id).or_insert_with(|| Arc::new(CircuitBreaker::new(&self.breaker_config))).clone()
    }

    /// Executes `request`, retrying across proxies per the configured
    /// policy. `context` seeds selection (e.g. `session_id`); its
    /// `failed_proxy_ids` is the caller-supplied base exclusion set and is
    /// honored on every attempt, but proxies this call itself fails against
    /// are excluded only for the rest of that same attempt's bounded
    /// breaker-aware reselection — not carried into subsequent attempts, so
    /// a small pool (e.g. 2 proxies, `max_attempts=3`) is retried across
    /// proxies rather than abandoned once each has failed once.
    pub async fn execute(&self, request: &OutboundRequest, context: SelectionContext) -> Result<OutboundResponse, RotatorError> {
        let total_attempts = self.retry_config.max_attempts.max(1);
        let mut chain: Vec<AttemptFailure> = Vec::new();
        let base_excluded = context.failed_proxy_ids.clone();

        for attempt in 1..=total_attempts {
            let mut attempt_context = context.clone();
            attempt_context.failed_proxy_ids = base_excluded.clone();
            attempt_context.attempt_number = attempt;

            let pool_size = self.pool.len().max(1);
            let mut proxy: Option<ProxyRef> = None;
            for _ in 0..pool_size {
                let candidate = match self.strategy.select(&self.pool, &attempt_context) {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let breaker = self.breaker_for(candidate.id);
                if breaker.allow() {
                    proxy = Some(candidate);
                    break;
                }
                attempt_context.failed_proxy_ids.push(candidate.id);
                chain.push(AttemptFailure { proxy_id: Some(candidate.id), error_kind: "circuit_open".to_string() });
            }

            let Some(proxy) = proxy else {
                // Either the pool is exhausted or every candidate's breaker is open.
                if attempt == total_attempts {
                    break;
                }
                tokio::time::sleep(backoff_delay(&self.retry_config, attempt)).await;
                continue;
            };

            let breaker = self.breaker_for(proxy.id);
            let start = Instant::now();
            let outcome = self.executor.execute(&proxy, request).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(response) if is_success_status(response.status) => {
                    self.strategy.record_result(&proxy, true, elapsed_ms);
                    breaker.record(true);
                    return Ok(response);
                }
                Ok(response) if self.retry_config.retryable_status.contains(&response.status) => {
                    self.strategy.record_result(&proxy, false, elapsed_ms);
                    breaker.record(false);
                    chain.push(AttemptFailure { proxy_id: Some(proxy.id), error_kind: format!("status_{}", response.status) });
                }
                Ok(response) => {
                    // Non-retryable 4xx: surface as-is, no further attempts.
                    self.strategy.record_result(&proxy, true, elapsed_ms);
                    breaker.record(true);
                    return Ok(response);
                }
                Err(e) => {
                    self.strategy.record_result(&proxy, false, elapsed_ms);
                    breaker.record(false);
                    chain.push(AttemptFailure { proxy_id: Some(proxy.id), error_kind: e.to_string() });
                }
            }

            if attempt < total_attempts {
                tokio::time::sleep(backoff_delay(&self.retry_config, attempt)).await;
            }
        }

        Err(RotatorError::AllProxiesFailed { attempts: chain.len() as u32 })
    }
}

fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HealthStatus, Proxy, ProxyScheme, StrategyConfig};
    use crate::pool::strategies::round_robin::RoundRobinStrategy;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn healthy_proxy(host: &str) -> Proxy {
        let p = Proxy::new(ProxyScheme::Http, host, 8080, "test");
        p.state.lock().health_status = HealthStatus::Healthy;
        p
    }

    struct ScriptedExecutor {
        statuses: Vec<u16>,
        call_count: AtomicU32,
    }

    impl RequestExecutor for ScriptedExecutor {
        fn execute<'a>(&'a self, _proxy: &'a ProxyRef, _request: &'a OutboundRequest) -> ExecutorFuture<'a> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst) as usize;
            let status = *self.statuses.get(idx).unwrap_or(&500);
            Box::pin(async move { Ok(OutboundResponse { status, headers: HashMap::new(), body: Vec::new() }) })
        }
    }

    fn sample_request() -> OutboundRequest {
        OutboundRequest { method: "GET".to_string(), url: "http://example.com".to_string(), headers: HashMap::new(), body: None, timeout_ms: 1000 }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let pool = Arc::new(ProxyPool::new());
        pool.add(healthy_proxy("1.1.1.1"));
        let strategy: Arc<dyn SelectionStrategy> = Arc::new(RoundRobinStrategy::new(StrategyConfig::default()));
        let executor = Arc::new(ScriptedExecutor { statuses: vec![200], call_count: AtomicU32::new(0) });
        let engine = RetryEngine::new(pool, strategy, executor, BreakerConfig::default(), RetryConfig::default());

        let resp = engine.execute(&sample_request(), SelectionContext::default()).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn retries_on_retryable_status_then_succeeds() {
        let pool = Arc::new(ProxyPool::new());
        pool.add(healthy_proxy("1.1.1.1"));
        pool.add(healthy_proxy("2.2.2.2"));
        let strategy: Arc<dyn SelectionStrategy> = Arc::new(RoundRobinStrategy::new(StrategyConfig::default()));
        let executor = Arc::new(ScriptedExecutor { statuses: vec![503, 200], call_count: AtomicU32::new(0) });
        let retry_config = RetryConfig { base_delay_ms: 1, max_delay_ms: 5, ..Default::default() };
        let engine = RetryEngine::new(pool, strategy, executor, BreakerConfig::default(), retry_config);

        let resp = engine.execute(&sample_request(), SelectionContext::default()).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn non_retryable_status_returns_immediately() {
        let pool = Arc::new(ProxyPool::new());
        pool.add(healthy_proxy("1.1.1.1"));
        let strategy: Arc<dyn SelectionStrategy> = Arc::new(RoundRobinStrategy::new(StrategyConfig::default()));
        let executor = Arc::new(ScriptedExecutor { statuses: vec![404], call_count: AtomicU32::new(0) });
        let engine = RetryEngine::new(pool, strategy, executor, BreakerConfig::default(), RetryConfig::default());

        let resp = engine.execute(&sample_request(), SelectionContext::default()).await.unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn exhausting_attempts_raises_all_proxies_failed() {
        let pool = Arc::new(ProxyPool::new());
        pool.add(healthy_proxy("1.1.1.1"));
        let strategy: Arc<dyn SelectionStrategy> = Arc::new(RoundRobinStrategy::new(StrategyConfig::default()));
        let executor = Arc::new(ScriptedExecutor { statuses: vec![500, 500, 500], call_count: AtomicU32::new(0) });
        let retry_config = RetryConfig { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 2, ..Default::default() };
        let engine = RetryEngine::new(pool, strategy, executor, BreakerConfig::default(), retry_config);

        let err = engine.execute(&sample_request(), SelectionContext::default()).await.unwrap_err();
        assert!(matches!(err, RotatorError::AllProxiesFailed { .. }));
    }

    #[tokio::test]
    async fn scenario_6_two_proxy_pool_retries_across_attempts_not_abandoned() {
        // spec.md §8 scenario 6: max_attempts=3, pool [P1, P2], every call
        // fails. The engine must make exactly 3 upstream attempts (one
        // proxy retried twice), not give up after each proxy has failed
        // once.
        let pool = Arc::new(ProxyPool::new());
        let p1 = pool.add(healthy_proxy("1.1.1.1"));
        let p2 = pool.add(healthy_proxy("2.2.2.2"));
        let strategy: Arc<dyn SelectionStrategy> = Arc::new(RoundRobinStrategy::new(StrategyConfig::default()));
        let executor = Arc::new(ScriptedExecutor { statuses: vec![500, 500, 500], call_count: AtomicU32::new(0) });
        let retry_config = RetryConfig { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 2, ..Default::default() };
        let engine = RetryEngine::new(pool, strategy, executor, BreakerConfig::default(), retry_config);

        let err = engine.execute(&sample_request(), SelectionContext::default()).await.unwrap_err();
        assert!(matches!(err, RotatorError::AllProxiesFailed { attempts: 3 }));

        let total_failures = p1.total_failures.load(Ordering::SeqCst) + p2.total_failures.load(Ordering::SeqCst);
        assert_eq!(total_failures, 3);
    }

    #[tokio::test]
    async fn max_attempts_zero_is_fail_fast_single_try() {
        let pool = Arc::new(ProxyPool::new());
        pool.add(healthy_proxy("1.1.1.1"));
        let strategy: Arc<dyn SelectionStrategy> = Arc::new(RoundRobinStrategy::new(StrategyConfig::default()));
        let executor = Arc::new(ScriptedExecutor { statuses: vec![500, 200], call_count: AtomicU32::new(0) });
        let retry_config = RetryConfig { max_attempts: 0, ..Default::default() };
        let engine = RetryEngine::new(pool, strategy, executor, BreakerConfig::default(), retry_config);

        let err = engine.execute(&sample_request(), SelectionContext::default()).await.unwrap_err();
        assert!(matches!(err, RotatorError::AllProxiesFailed { attempts: 1 }));
    }
}
