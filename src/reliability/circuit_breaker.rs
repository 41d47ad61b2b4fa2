//! Per-proxy circuit breaker: CLOSED/OPEN/HALF_OPEN state machine. Grounded
//! on `examples/l11223-kiro-ai-gateway/src-tauri/src/proxy/rate_limit.rs`'s
//! `RateLimitTracker` (per-key failure counting with auto-expiring lockouts,
//! structured `tracing` events on every transition) generalized from its
//! rate-limit-key map to a per-proxy state machine with probe semantics.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// One breaker per proxy. `allow()`/`record()` are short, lock-free
/// critical sections built from atomics, matching spec.md §5's "per-proxy
/// mutex; short critical sections" shared-resource policy without needing
/// an actual lock.
pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout_duration_ms: u64,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    probe_in_flight: AtomicBool,
    state: AtomicU32, // 0=Closed, 1=Open, 2=HalfOpen
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            timeout_duration_ms: config.timeout_duration_ms,
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            state: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::SeqCst) {
            0 => BreakerState::Closed,
            1 => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }

    /// Returns whether a request may proceed against this proxy right now.
    /// OPEN transitions to HALF_OPEN here once `timeout_duration` elapses;
    /// at most one probe is admitted while HALF_OPEN.
    pub fn allow(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                // Only the caller that wins this compare-exchange gets to probe.
                self.probe_in_flight.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
            }
            BreakerState::Open => {
                let elapsed = now_ms().saturating_sub(self.opened_at_ms.load(Ordering::SeqCst));
                if elapsed >= self.timeout_duration_ms {
                    self.state.store(2, Ordering::SeqCst);
                    tracing::info!("circuit breaker transitioning OPEN -> HALF_OPEN");
                    self.probe_in_flight.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
                } else {
                    false
                }
            }
        }
    }

    /// Records the outcome of a request gated by `allow()`.
    pub fn record(&self, success: bool) {
        match self.state() {
            BreakerState::HalfOpen => {
                self.probe_in_flight.store(false, Ordering::SeqCst);
                if success {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    self.state.store(0, Ordering::SeqCst);
                    tracing::info!("circuit breaker transitioning HALF_OPEN -> CLOSED");
                } else {
                    self.opened_at_ms.store(now_ms(), Ordering::SeqCst);
                    self.state.store(1, Ordering::SeqCst);
                    tracing::warn!("circuit breaker transitioning HALF_OPEN -> OPEN (probe failed)");
                }
            }
            BreakerState::Closed | BreakerState::Open => {
                if success {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                } else {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures >= self.failure_threshold && self.state.load(Ordering::SeqCst) == 0 {
                        self.opened_at_ms.store(now_ms(), Ordering::SeqCst);
                        self.state.store(1, Ordering::SeqCst);
                        tracing::warn!(failures, "circuit breaker transitioning CLOSED -> OPEN");
                    }
                }
            }
        }
    }
}
