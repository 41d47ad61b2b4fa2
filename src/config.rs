//! Rotator configuration.
//!
//! Shape follows spec.md §6. Loading follows the donor's `modules/config.rs`
//! (`load_app_config`/`save_app_config`, `toml` dependency) pattern of a
//! serde struct with `Default` plus a `from_toml_str` constructor; file
//! discovery/CLI wiring is explicitly out of core scope (spec.md §1) so this
//! module stops at parsing, it does not locate a config file on disk.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::StrategyConfig;
use crate::error::RotatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Constant,
    Linear,
    Exponential,
    JitteredExponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub l1_max: usize,
    pub l2_max: usize,
    /// 0 means unlimited.
    pub l3_max: usize,
    pub default_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub per_source_ttl: HashMap<String, u64>,
    pub failure_threshold: u32,
    pub health_check_invalidation: bool,
    pub l2_dir: String,
    pub l3_path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max: 1000,
            l2_max: 5000,
            l3_max: 0,
            default_ttl_seconds: 3600,
            cleanup_interval_seconds: 60,
            per_source_ttl: HashMap::new(),
            failure_threshold: 3,
            health_check_invalidation: true,
            l2_dir: ".cache/proxies".to_string(),
            l3_path: ".cache/db/proxywhirl.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
    pub retryable_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::JitteredExponential,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
            // Open Question 3 resolution, see SPEC_FULL.md.
            retryable_status: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub timeout_duration_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_duration_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationLevelConfig {
    Basic,
    Standard,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub failure_threshold: u32,
    pub concurrency: usize,
    pub validation_level: ValidationLevelConfig,
    pub probe_url: String,
    pub per_check_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            failure_threshold: 3,
            concurrency: 50,
            validation_level: ValidationLevelConfig::Standard,
            probe_url: "https://httpbin.org/ip".to_string(),
            per_check_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySelectionConfig {
    pub name: String,
    pub config: StrategyConfig,
}

impl Default for StrategySelectionConfig {
    fn default() -> Self {
        Self {
            name: "round_robin".to_string(),
            config: StrategyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RotatorConfig {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub health: HealthConfig,
    pub strategies: StrategySelectionConfig,
}

impl RotatorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, RotatorError> {
        toml::from_str(s).map_err(|e| RotatorError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), RotatorError> {
        if self.retry.multiplier <= 0.0 {
            return Err(RotatorError::InvalidConfig("retry.multiplier must be positive".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(RotatorError::InvalidConfig("retry.base_delay_ms exceeds max_delay_ms".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(RotatorError::InvalidConfig("breaker.failure_threshold must be > 0".into()));
        }
        Ok(())
    }
}
