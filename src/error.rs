//! Boundary-level error taxonomy. Individual modules keep their own narrow
//! error enums (`CacheError`, `VaultError`, `StrategyError`) and convert into
//! this one at the public surface, per spec.

use uuid::Uuid;

use crate::cache::CacheError;
use crate::pool::strategies::StrategyError;
use crate::vault::VaultError;

#[derive(Debug, thiserror::Error)]
pub enum RotatorError {
    #[error("no healthy proxy available in pool")]
    ProxyPoolEmpty,

    #[error("all proxies failed after {attempts} attempt(s)")]
    AllProxiesFailed { attempts: u32 },

    #[error("circuit open for proxy {proxy_id}")]
    CircuitOpen { proxy_id: Uuid },

    #[error("storage unavailable")]
    StorageUnavailable,

    #[error("cache entry corrupted for key {key}")]
    CacheCorruption { key: String },

    #[error("credential decryption failed")]
    DecryptionFailed,

    #[error("validation failed at level {level:?}: {kind}")]
    ValidationFailed { level: crate::validator::ValidationLevel, kind: String },

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<CacheError> for RotatorError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::StorageUnavailable => RotatorError::StorageUnavailable,
            CacheError::Corruption { key } => RotatorError::CacheCorruption { key },
            CacheError::Decryption => RotatorError::DecryptionFailed,
        }
    }
}

impl From<VaultError> for RotatorError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::DecryptionFailed => RotatorError::DecryptionFailed,
            VaultError::InvalidKey(msg) => RotatorError::InvalidConfig(msg),
        }
    }
}

impl From<StrategyError> for RotatorError {
    fn from(e: StrategyError) -> Self {
        match e {
            StrategyError::PoolEmpty => RotatorError::ProxyPoolEmpty,
        }
    }
}
