//! Three-tier cache substrate (L1/L2/L3) and the manager that orchestrates
//! them. Grounded on `examples/l11223-kiro-ai-gateway/src-tauri/src/modules/proxy_db.rs`
//! for the relational (L3) idiom — WAL pragmas, `CREATE TABLE IF NOT EXISTS`,
//! parameterized `rusqlite::params!` queries, retention sweeps via
//! `DELETE ... WHERE id NOT IN (SELECT ...)` — generalized from that file's
//! request-log schema to the `CacheEntry` schema spec'd here.

pub mod l1;
pub mod l2;
pub mod l3;
pub mod manager;
pub mod tier;

pub use manager::CacheManager;
pub use tier::{Tier, TierSnapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::HealthStatus;
use crate::vault::Vault;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("storage unavailable")]
    StorageUnavailable,
    #[error("corrupted entry for key {key}")]
    Corruption { key: String },
    #[error("credential decryption failed")]
    Decryption,
}

/// Durable view of a `Proxy`, keyed by a short hash of its normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub proxy_url: String,
    pub encrypted_username: Option<String>,
    pub encrypted_password: Option<String>,
    pub source: String,
    pub ttl_seconds: u64,
    pub fetch_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub health_status: HealthStatus,
    pub failure_count: u32,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        proxy_url: impl Into<String>,
        source: impl Into<String>,
        ttl_seconds: u64,
        username: Option<&str>,
        password: Option<&str>,
        vault: &Vault,
    ) -> Self {
        let proxy_url = proxy_url.into();
        let key = derive_key(&proxy_url);
        let now = Utc::now();
        Self {
            key,
            proxy_url,
            encrypted_username: username.map(|u| vault.encrypt(u)),
            encrypted_password: password.map(|p| vault.encrypt(p)),
            source: source.into(),
            ttl_seconds,
            fetch_time: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds as i64),
            health_status: HealthStatus::Unknown,
            failure_count: 0,
            access_count: 0,
            last_accessed_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.health_status, HealthStatus::Healthy)
    }

    pub fn decrypt_username(&self, vault: &Vault) -> Result<Option<String>, CacheError> {
        self.encrypted_username
            .as_deref()
            .map(|e| vault.decrypt(e).map_err(|_| CacheError::Decryption))
            .transpose()
    }

    pub fn decrypt_password(&self, vault: &Vault) -> Result<Option<String>, CacheError> {
        self.encrypted_password
            .as_deref()
            .map(|e| vault.decrypt(e).map_err(|_| CacheError::Decryption))
            .transpose()
    }
}

/// Normalizes a proxy URL (lowercase host, strip default ports) and derives
/// a stable 16-byte key, hex-encoded. Mirrors the donor's
/// `proxy/config.rs::normalize_proxy_url` normalization rule, extended with
/// the hashing `spec.md` §4.C requires.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return String::new();
    }
    let with_scheme = if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    match url::Url::parse(&with_scheme) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            let host = parsed.host_str().unwrap_or("").to_lowercase();
            let default_port = match scheme {
                "http" => Some(80),
                "https" => Some(443),
                _ => None,
            };
            match parsed.port() {
                Some(p) if Some(p) != default_port => format!("{}://{}:{}", scheme, host, p),
                _ => format!("{}://{}", scheme, host),
            }
        }
        Err(_) => with_scheme.to_lowercase(),
    }
}

pub fn derive_key(url: &str) -> String {
    let normalized = normalize_url(url);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest[..16])
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Aggregate snapshot across all three tiers plus manager-level counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatistics {
    pub l1: TierSnapshot,
    pub l2: TierSnapshot,
    pub l3: TierSnapshot,
    pub promotions: u64,
    pub demotions: u64,
}

impl CacheStatistics {
    pub fn overall_hit_rate(&self) -> f64 {
        let hits = self.l1.hits + self.l2.hits + self.l3.hits;
        let total = hits + self.l1.misses + self.l2.misses + self.l3.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_default_port_and_lowercases_host() {
        assert_eq!(normalize_url("HTTP://Example.com:80/"), "http://example.com");
        assert_eq!(normalize_url("http://example.com:8080"), "http://example.com:8080");
    }

    #[test]
    fn normalize_adds_scheme_when_missing() {
        assert_eq!(normalize_url("example.com"), "http://example.com");
    }

    #[test]
    fn derive_key_is_stable_and_16_bytes_hex() {
        let k1 = derive_key("http://example.com:8080");
        let k2 = derive_key("HTTP://EXAMPLE.COM:8080");
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 32); // 16 bytes hex-encoded
    }

    #[test]
    fn entry_expiry_boundary() {
        let vault = Vault::new(Some("k"), None);
        let entry = CacheEntry::new("http://1.2.3.4:8080", "test", 1, None, None, &vault);
        assert!(!entry.is_expired_at(entry.fetch_time + chrono::Duration::milliseconds(500)));
        assert!(entry.is_expired_at(entry.fetch_time + chrono::Duration::milliseconds(1500)));
    }

    #[test]
    fn credential_round_trip_through_entry() {
        let vault = Vault::new(Some("k"), None);
        let entry = CacheEntry::new("http://1.2.3.4:8080", "test", 60, Some("user"), Some("hunter2"), &vault);
        assert_eq!(entry.decrypt_username(&vault).unwrap().as_deref(), Some("user"));
        assert_eq!(entry.decrypt_password(&vault).unwrap().as_deref(), Some("hunter2"));
        assert!(entry.encrypted_password.as_deref() != Some("hunter2"));
    }
}
