//! Stateless proxy validator: BASIC (TCP reachability), STANDARD (+ HTTP
//! probe), FULL (+ anonymity classification). No side effects on the pool;
//! callers (the health monitor, or a direct caller) decide what to do with
//! the result. Grounded on
//! `examples/l11223-kiro-ai-gateway/src-tauri/src/proxy/proxy_pool.rs::check_proxy_health`'s
//! connect-and-measure-latency shape, extended with the STANDARD/FULL tiers
//! and the anonymity rule resolved in SPEC_FULL.md's Open Question 2.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::ProxyRef;
use crate::reliability::retry::{OutboundRequest, RequestExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationLevel {
    Basic,
    Standard,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anonymity {
    Elite,
    Anonymous,
    Transparent,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub ok: bool,
    pub level_reached: ValidationLevel,
    pub latency_ms: f64,
    pub error_kind: Option<String>,
    pub anonymity: Option<Anonymity>,
}

const FORWARDING_HEADERS: [&str; 3] = ["x-forwarded-for", "via", "x-real-ip"];

/// Pure classification rule, independent of how `local_ip`/`origin_ip`/
/// `headers` were obtained — see SPEC_FULL.md Open Question 2.
pub fn classify_anonymity(local_ip: &str, origin_ip: &str, headers: &HashMap<String, String>) -> Anonymity {
    let reveals_local_ip = headers.iter().any(|(k, v)| {
        let key = k.to_lowercase();
        FORWARDING_HEADERS.contains(&key.as_str()) && v.contains(local_ip)
    });
    if origin_ip == local_ip || reveals_local_ip {
        return Anonymity::Transparent;
    }
    let has_forwarding_header = headers.keys().any(|k| FORWARDING_HEADERS.contains(&k.to_lowercase().as_str()));
    if has_forwarding_header {
        Anonymity::Anonymous
    } else {
        Anonymity::Elite
    }
}

/// Best-effort local routable IP via a connected UDP socket; this performs
/// no actual I/O (`connect` on UDP just fixes the default peer) so it is
/// safe to call without network access, though it may return `None` on
/// sandboxes without a default route.
fn local_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

pub struct Validator {
    executor: Arc<dyn RequestExecutor>,
}

impl Validator {
    pub fn new(executor: Arc<dyn RequestExecutor>) -> Self {
        Self { executor }
    }

    pub async fn validate(&self, proxy: &ProxyRef, level: ValidationLevel, probe_url: &str, timeout: Duration) -> ValidationResult {
        let start = Instant::now();

        if tokio::net::lookup_host((proxy.host.as_str(), proxy.port)).await.is_err() {
            return ValidationResult {
                ok: false,
                level_reached: ValidationLevel::Basic,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                error_kind: Some("dns_or_connect_failed".to_string()),
                anonymity: None,
            };
        }
        let connect = tokio::time::timeout(timeout, tokio::net::TcpStream::connect((proxy.host.as_str(), proxy.port))).await;
        if !matches!(connect, Ok(Ok(_))) {
            return ValidationResult {
                ok: false,
                level_reached: ValidationLevel::Basic,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                error_kind: Some("tcp_connect_failed".to_string()),
                anonymity: None,
            };
        }
        if level == ValidationLevel::Basic {
            return ValidationResult {
                ok: true,
                level_reached: ValidationLevel::Basic,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                error_kind: None,
                anonymity: None,
            };
        }

        let request = OutboundRequest {
            method: "GET".to_string(),
            url: probe_url.to_string(),
            headers: HashMap::new(),
            body: None,
            timeout_ms: timeout.as_millis() as u64,
        };
        let response = match tokio::time::timeout(timeout, self.executor.execute(proxy, &request)).await {
            Ok(Ok(resp)) if (200..300).contains(&resp.status) => resp,
            Ok(Ok(resp)) => {
                return ValidationResult {
                    ok: false,
                    level_reached: ValidationLevel::Basic,
                    latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                    error_kind: Some(format!("probe_status_{}", resp.status)),
                    anonymity: None,
                }
            }
            Ok(Err(e)) => {
                return ValidationResult {
                    ok: false,
                    level_reached: ValidationLevel::Basic,
                    latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                    error_kind: Some(e.to_string()),
                    anonymity: None,
                }
            }
            Err(_) => {
                return ValidationResult {
                    ok: false,
                    level_reached: ValidationLevel::Basic,
                    latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                    error_kind: Some("probe_timeout".to_string()),
                    anonymity: None,
                }
            }
        };

        if level == ValidationLevel::Standard {
            return ValidationResult {
                ok: true,
                level_reached: ValidationLevel::Standard,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                error_kind: None,
                anonymity: None,
            };
        }

        let origin_ip = serde_json::from_slice::<serde_json::Value>(&response.body)
            .ok()
            .and_then(|v| v.get("origin").and_then(|o| o.as_str()).map(|s| s.to_string()))
            .unwrap_or_default();
        let anonymity = match local_ip() {
            Some(local) => Some(classify_anonymity(&local, &origin_ip, &response.headers)),
            None => None,
        };

        ValidationResult {
            ok: true,
            level_reached: ValidationLevel::Full,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            error_kind: None,
            anonymity,
        }
    }
}
