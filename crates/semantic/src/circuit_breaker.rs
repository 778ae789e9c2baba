//! Circuit breaker for the embedding collaborator.
//!
//! After `failure_threshold` consecutive failures the breaker opens and
//! calls are refused without reaching the model. Once `reset_timeout` has
//! passed a single probe is let through (half-open); its outcome closes or
//! re-opens the breaker.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "crate::serde_millis", rename = "reset_timeout_ms")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    since: Instant,
    probe_in_flight: bool,
    consecutive_failures: u64,
    successes: u64,
}

impl Inner {
    fn enter(&mut self, state: CircuitState) {
        self.state = state;
        self.since = Instant::now();
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                since: Instant::now(),
                probe_in_flight: false,
                consecutive_failures: 0,
                successes: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may proceed now.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        let may_probe = match inner.state {
            CircuitState::Closed => return true,
            CircuitState::Open => inner.since.elapsed() >= self.config.reset_timeout,
            CircuitState::HalfOpen => !inner.probe_in_flight,
        };
        if may_probe {
            if inner.state == CircuitState::Open {
                inner.enter(CircuitState::HalfOpen);
            }
            inner.probe_in_flight = true;
        }
        may_probe
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.successes += 1;
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state == CircuitState::HalfOpen {
            inner.enter(CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        inner.probe_in_flight = false;
        let trips = match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures >= u64::from(self.config.failure_threshold)
            }
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trips {
            inner.enter(CircuitState::Open);
        }
    }

    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures since the last success.
    pub fn failure_count(&self) -> u64 {
        self.lock().consecutive_failures
    }

    pub fn success_count(&self) -> u64 {
        self.lock().successes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_reset_timeout(Duration::from_millis(reset_ms)),
        )
    }

    #[test]
    fn starts_closed() {
        let cb = breaker(3, 1000);
        assert_eq!(cb.current_state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn opens_after_threshold() {
        let cb = breaker(3, 60_000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = breaker(3, 60_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_one_probe() {
        let cb = breaker(1, 10);
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Open);
        thread::sleep(Duration::from_millis(30));

        assert!(cb.allow_request());
        assert_eq!(cb.current_state(), CircuitState::HalfOpen);
        assert!(!cb.allow_request());

        cb.record_success();
        assert_eq!(cb.current_state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn failed_probe_reopens() {
        let cb = breaker(1, 10);
        cb.record_failure();
        thread::sleep(Duration::from_millis(30));
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn config_serializes_reset_as_millis() {
        let cfg = CircuitBreakerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"reset_timeout_ms\":30000"), "{json}");
    }
}
