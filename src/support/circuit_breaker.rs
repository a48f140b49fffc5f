//! Circuit breaker for KV-store and bus round-trips.
//!
//! Closed → Open after `failure_threshold` consecutive failures,
//! Open → HalfOpen after `cooldown`, HalfOpen → Closed after
//! `success_threshold` consecutive successes. While open, calls fast-fail
//! without touching the downstream.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long the breaker stays open before probing.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32 },
}

pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    /// Whether a call may proceed. Transitions Open → HalfOpen once the
    /// cooldown has elapsed.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match &*state {
            State::Closed { .. } | State::HalfOpen { .. } => true,
            State::Open { since } => {
                if since.elapsed() >= self.config.cooldown {
                    *state = State::HalfOpen { successes: 0 };
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            State::Closed { failures } => *failures = 0,
            State::HalfOpen { successes } => {
                *successes += 1;
                if *successes >= self.config.success_threshold {
                    *state = State::Closed { failures: 0 };
                }
            }
            State::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            State::Closed { failures } => {
                *failures += 1;
                if *failures >= self.config.failure_threshold {
                    warn!(breaker = self.name, "Circuit breaker opened");
                    metrics::counter!("gateway_breaker_opened_total", "breaker" => self.name)
                        .increment(1);
                    *state = State::Open {
                        since: Instant::now(),
                    };
                }
            }
            // A failed half-open probe re-opens immediately.
            State::HalfOpen { .. } => {
                warn!(breaker = self.name, "Circuit breaker re-opened");
                *state = State::Open {
                    since: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Open { since } if since.elapsed() < self.config.cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                cooldown: Duration::from_millis(cooldown_ms),
            },
        )
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let b = breaker(10_000);
        assert!(b.allow());
        b.record_failure();
        b.record_failure();
        assert!(b.allow());
        b.record_failure();
        assert!(!b.allow());
        assert!(b.is_open());
    }

    #[test]
    fn success_resets_failure_streak() {
        let b = breaker(10_000);
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert!(b.allow());
    }

    #[test]
    fn half_open_probe_then_close() {
        let b = breaker(0);
        b.record_failure();
        b.record_failure();
        b.record_failure();
        // Cooldown of zero: next allow() moves to half-open.
        assert!(b.allow());
        b.record_success();
        assert!(b.allow());
        b.record_success();
        // Closed again; a single failure must not re-open.
        b.record_failure();
        assert!(b.allow());
    }

    #[test]
    fn failed_probe_reopens() {
        let b = breaker(0);
        b.record_failure();
        b.record_failure();
        b.record_failure();
        assert!(b.allow());
        b.record_failure();
        // Cooldown is zero so it goes straight back to half-open on allow(),
        // but the open state was re-entered in between.
        assert!(b.allow());
    }
}
