// Metrics hooks for the `resolver` crate.
//
// Callers install a global `ResolveMetrics` implementation via
// [`set_resolve_metrics`]; every `DuplicateResolver` then reports the outcome
// and latency of each classification and rebuild. This keeps instrumentation
// decoupled from any specific metrics backend.
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::types::{Classification, Disposition, RebuildReport, ResolveError};

/// Metrics observer for resolver operations.
pub trait ResolveMetrics: Send + Sync {
    /// Outcome of one `classify` call. `Err` carries the error that was
    /// returned to the caller.
    fn record_classify(
        &self,
        latency: Duration,
        outcome: Result<(Classification, Disposition), &ResolveError>,
    );

    fn record_rebuild(&self, _latency: Duration, _report: &RebuildReport) {}
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn ResolveMetrics>>> {
    static METRICS: OnceCell<RwLock<Option<Arc<dyn ResolveMetrics>>>> = OnceCell::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

pub(crate) fn metrics_recorder() -> Option<Arc<dyn ResolveMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    guard.clone()
}

/// Install or clear the global resolver metrics recorder.
///
/// Typically called once at startup so every resolver in the process shares
/// one metrics backend.
pub fn set_resolve_metrics(recorder: Option<Arc<dyn ResolveMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *guard = recorder;
}
