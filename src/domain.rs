//! Core proxy entity and related value types.
//!
//! Grounded on `examples/l11223-kiro-ai-gateway/src-tauri/src/proxy/proxy_pool.rs`
//! (`PoolProxyConfig`/health-tracking fields) generalized to the full `Proxy`
//! shape spec'd for ProxyWhirl: per-field atomics for metrics, a mutex for the
//! non-atomic fields (EMA, last_error), matching the donor's split between
//! atomic usage counters and locked config/state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A credential value that never renders its contents in `Debug`/`Display`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Secret(pub String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyScheme {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks4" => Some(Self::Socks4),
            "socks5" => Some(Self::Socks5),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Dead,
    Unknown,
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::Unknown
    }
}

/// Non-atomic proxy state, protected by a single per-proxy mutex.
#[derive(Debug, Default, Clone)]
pub struct ProxyMutableState {
    pub health_status: HealthStatus,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub avg_response_time_ms: f64,
    pub ema_response_time_ms: Option<f64>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A routable upstream endpoint.
///
/// Invariant: `total_requests == total_successes + total_failures + in_flight`.
#[derive(Debug)]
pub struct Proxy {
    pub id: Uuid,
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub source: String,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub cost_per_request: f64,
    pub metadata: HashMap<String, String>,

    pub consecutive_failures: AtomicU32,
    pub consecutive_successes: AtomicU32,
    pub total_requests: AtomicU64,
    pub total_successes: AtomicU64,
    pub total_failures: AtomicU64,
    pub in_flight: AtomicU64,

    pub state: Mutex<ProxyMutableState>,
}

impl Proxy {
    pub fn new(scheme: ProxyScheme, host: impl Into<String>, port: u16, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scheme,
            host: host.into(),
            port,
            username: None,
            password: None,
            source: source.into(),
            country_code: None,
            region: None,
            cost_per_request: 0.0,
            metadata: HashMap::new(),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            state: Mutex::new(ProxyMutableState::default()),
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    /// Normalized form used for key derivation: lowercased host, default
    /// ports stripped.
    pub fn normalized_url(&self) -> String {
        let host = self.host.to_lowercase();
        let default_port = match self.scheme {
            ProxyScheme::Http => 80,
            ProxyScheme::Https => 443,
            ProxyScheme::Socks4 | ProxyScheme::Socks5 => 0,
        };
        if self.port == default_port {
            format!("{}://{}", self.scheme.as_str(), host)
        } else {
            format!("{}://{}:{}", self.scheme.as_str(), host, self.port)
        }
    }

    pub fn health_status(&self) -> HealthStatus {
        self.state.lock().health_status
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.health_status(), HealthStatus::Healthy)
    }

    /// Marks a request as started. Strategies must call this on selection.
    pub fn start_request(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Records the outcome of a request, updating counters and EMA.
    pub fn record_result(&self, success: bool, elapsed_ms: f64, ema_alpha: f64) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        if success {
            self.total_successes.fetch_add(1, Ordering::SeqCst);
            self.consecutive_successes.fetch_add(1, Ordering::SeqCst);
            self.consecutive_failures.store(0, Ordering::SeqCst);
        } else {
            self.total_failures.fetch_add(1, Ordering::SeqCst);
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
            self.consecutive_successes.store(0, Ordering::SeqCst);
        }

        let mut state = self.state.lock();
        state.last_used_at = Some(Utc::now());
        state.ema_response_time_ms = Some(match state.ema_response_time_ms {
            Some(prev) => ema_alpha * elapsed_ms + (1.0 - ema_alpha) * prev,
            None => elapsed_ms,
        });
        let n = self.total_requests.load(Ordering::SeqCst) as f64;
        state.avg_response_time_ms = if n <= 1.0 {
            elapsed_ms
        } else {
            (state.avg_response_time_ms * (n - 1.0) + elapsed_ms) / n
        };
    }

    pub fn ema_response_time_ms(&self) -> Option<f64> {
        self.state.lock().ema_response_time_ms
    }
}

pub type ProxyRef = Arc<Proxy>;

/// Per-request selection hints. Read-only during selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub session_id: Option<String>,
    pub target_country: Option<String>,
    pub target_region: Option<String>,
    pub target_url: Option<String>,
    pub request_priority: u8,
    pub failed_proxy_ids: Vec<Uuid>,
    pub attempt_number: u32,
    pub metadata: HashMap<String, String>,
}

impl SelectionContext {
    pub fn excludes(&self, id: Uuid) -> bool {
        self.failed_proxy_ids.contains(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecondaryStrategy {
    RoundRobin,
    Random,
    LeastUsed,
}

/// Recognized strategy config options; strategies ignore fields they don't need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
    #[serde(default = "default_session_ttl")]
    pub session_stickiness_duration_seconds: u64,
    #[serde(default)]
    pub geo_fallback_enabled: bool,
    #[serde(default = "default_geo_secondary")]
    pub geo_secondary_strategy: SecondaryStrategy,
    #[serde(default = "default_max_cost")]
    pub max_cost_per_request: f64,
    #[serde(default = "default_free_boost")]
    pub free_proxy_boost: f64,
    pub max_response_time_ms: Option<f64>,
    pub min_success_rate: Option<f64>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Failure penalty applied to EMA on a failed request (performance-based).
    #[serde(default = "default_failure_penalty_ms")]
    pub failure_penalty_ms: f64,
    /// Cold-start sample count before switching to weighted selection.
    #[serde(default = "default_cold_start_k")]
    pub cold_start_k: usize,
}

fn default_ema_alpha() -> f64 {
    0.2
}
fn default_session_ttl() -> u64 {
    3600
}
fn default_geo_secondary() -> SecondaryStrategy {
    SecondaryStrategy::RoundRobin
}
fn default_max_cost() -> f64 {
    f64::INFINITY
}
fn default_free_boost() -> f64 {
    10.0
}
fn default_max_sessions() -> usize {
    10_000
}
fn default_failure_penalty_ms() -> f64 {
    5000.0
}
fn default_cold_start_k() -> usize {
    5
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
            ema_alpha: default_ema_alpha(),
            session_stickiness_duration_seconds: default_session_ttl(),
            geo_fallback_enabled: false,
            geo_secondary_strategy: default_geo_secondary(),
            max_cost_per_request: default_max_cost(),
            free_proxy_boost: default_free_boost(),
            max_response_time_ms: None,
            min_success_rate: None,
            max_sessions: default_max_sessions(),
            failure_penalty_ms: default_failure_penalty_ms(),
            cold_start_k: default_cold_start_k(),
        }
    }
}
