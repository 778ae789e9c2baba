//! Time-bounded, circuit-protected embedding calls.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::{Embedder, SemanticError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Upper bound on one embedding call.
    #[serde(with = "crate::serde_millis", rename = "timeout_ms")]
    pub timeout: Duration,
    pub circuit: CircuitBreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            circuit: CircuitBreakerConfig::default(),
        }
    }
}

impl ResilienceConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }
}

/// Wraps an [`Embedder`] with a call timeout and a circuit breaker.
///
/// The wrapped call runs on a helper thread. If it overruns the timeout the
/// caller gets [`SemanticError::Timeout`] immediately; the late result is
/// discarded when it arrives.
pub struct ResilientEmbedder<E> {
    inner: Arc<E>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl<E> ResilientEmbedder<E>
where
    E: Embedder + 'static,
{
    pub fn new(inner: E, config: ResilienceConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            breaker: CircuitBreaker::new(config.circuit),
            timeout: config.timeout,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.current_state()
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    fn call(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned = text.to_owned();
        thread::Builder::new()
            .name("embed-call".into())
            .spawn(move || {
                // The receiver is gone if we already timed out.
                let _ = tx.send(inner.embed(&owned));
            })
            .map_err(|e| SemanticError::Inference(format!("spawn embed worker: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(SemanticError::Timeout {
                millis: self.timeout.as_millis() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SemanticError::Inference(
                "embed worker exited without a result".into(),
            )),
        }
    }
}

impl<E> Embedder for ResilientEmbedder<E>
where
    E: Embedder + 'static,
{
    fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        if !self.breaker.allow_request() {
            return Err(SemanticError::CircuitOpen {
                model: self.inner.model_name().to_string(),
            });
        }
        match self.call(text) {
            Ok(v) if v.is_empty() => {
                self.breaker.record_failure();
                Err(SemanticError::EmptyEmbedding)
            }
            Ok(v) => {
                self.breaker.record_success();
                Ok(v)
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(
                    model = self.inner.model_name(),
                    error = %err,
                    state = ?self.breaker.current_state(),
                    "embed_failure"
                );
                Err(err)
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StubEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Slow(Duration);

    impl Embedder for Slow {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, SemanticError> {
            thread::sleep(self.0);
            Ok(vec![1.0])
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    struct Failing(AtomicUsize);

    impl Embedder for Failing {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, SemanticError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(SemanticError::Inference("model offline".into()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn passes_through_successful_calls() {
        let e = ResilientEmbedder::new(StubEmbedder::new(8).unwrap(), ResilienceConfig::default());
        assert_eq!(e.embed("x").unwrap().len(), 8);
        assert_eq!(e.model_name(), "stub-8");
        assert_eq!(e.circuit_state(), CircuitState::Closed);
    }

    #[test]
    fn slow_call_times_out() {
        let e = ResilientEmbedder::new(
            Slow(Duration::from_millis(500)),
            ResilienceConfig::default().with_timeout(Duration::from_millis(20)),
        );
        assert_eq!(e.embed("x"), Err(SemanticError::Timeout { millis: 20 }));
    }

    #[test]
    fn repeated_failures_open_the_circuit() {
        let e = ResilientEmbedder::new(
            Failing(AtomicUsize::new(0)),
            ResilienceConfig::default().with_circuit(
                CircuitBreakerConfig::default()
                    .with_failure_threshold(2)
                    .with_reset_timeout(Duration::from_secs(60)),
            ),
        );
        assert!(matches!(e.embed("a"), Err(SemanticError::Inference(_))));
        assert!(matches!(e.embed("b"), Err(SemanticError::Inference(_))));
        assert!(matches!(e.embed("c"), Err(SemanticError::CircuitOpen { .. })));
        // the third call never reached the model
        assert_eq!(e.inner().0.load(Ordering::SeqCst), 2);
    }
}
