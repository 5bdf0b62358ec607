#![allow(dead_code)] // This entire file is feature-gated
//! Vendor-agnostic metrics collection via a pluggable sink.
//!
//! The engine reports every authorization and every successful policy or
//! entity reload to a global [`MetricsSink`]. Nothing is tied to a specific
//! backend; implement the trait to forward to Prometheus, OpenTelemetry or
//! whatever the host uses.
//!
//! **Note:** This module is only available when the `observability` feature is enabled.
//!
//! ```ignore
//! use arbiter_core::metrics::{MetricsSink, EvaluationStats, ReloadStats};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! struct Counter(AtomicU64);
//!
//! impl MetricsSink for Counter {
//!     fn on_evaluation(&self, _stats: &EvaluationStats) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//!
//!     fn on_reload(&self, stats: &ReloadStats) {
//!         eprintln!("{} reloaded", stats.kind);
//!     }
//! }
//!
//! arbiter_core::metrics::set_sink(Arc::new(Counter(AtomicU64::new(0))));
//! ```

use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};
use strum_macros::Display;
use tracing::warn;

/// One authorization, passed to [`MetricsSink::on_evaluation`].
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationStats {
    /// Wall-clock time for the whole `authorize` call.
    pub duration: Duration,
    pub allowed: bool,
    /// Number of policies that failed with an evaluation error.
    pub policy_errors: usize,
    /// Principal uid, e.g. `User::"alice"`.
    pub principal_id: String,
    /// Action uid, e.g. `Action::"view"`.
    pub action_id: String,
}

/// Per-phase breakdown of one authorization, in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationPhases {
    /// Acquiring the current engine snapshot.
    pub snapshot_ms: f64,
    /// Running every policy against the request.
    pub authorize_ms: f64,
    pub total_ms: f64,
}

impl EvaluationPhases {
    /// Time not accounted for by the measured phases.
    pub fn overhead_ms(&self) -> f64 {
        self.total_ms - (self.snapshot_ms + self.authorize_ms)
    }
}

/// What a reload replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReloadKind {
    Policies,
    Entities,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadStats {
    pub kind: ReloadKind,
    /// Number of policies or entities now installed.
    pub count: usize,
    pub reload_time: SystemTime,
}

/// Consumer of engine metrics.
///
/// Called synchronously on the request path, so implementations must be
/// thread-safe and must not block.
pub trait MetricsSink: Send + Sync {
    fn on_evaluation(&self, stats: &EvaluationStats);

    /// Called after a successful `set_policies` or `load_entities`.
    fn on_reload(&self, stats: &ReloadStats);

    /// Optional per-phase timings for each evaluation.
    fn on_evaluation_phases(&self, _stats: &EvaluationStats, _phases: &EvaluationPhases) {}
}

/// Default sink; drops everything.
struct NoOpSink;

impl MetricsSink for NoOpSink {
    fn on_evaluation(&self, _stats: &EvaluationStats) {}
    fn on_reload(&self, _stats: &ReloadStats) {}
}

static SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

fn sink() -> Arc<dyn MetricsSink> {
    SINK.get_or_init(|| Arc::new(NoOpSink)).clone()
}

/// Install the global metrics sink.
///
/// The sink can be set once; call this at startup, before the first
/// evaluation. Later calls are ignored with a warning.
pub fn set_sink(sink: Arc<dyn MetricsSink>) {
    if SINK.set(sink).is_err() {
        warn!(
            event = "Metrics",
            phase = "SetSink",
            "Metrics sink was already initialized; ignoring set_sink"
        );
    }
}

pub(crate) fn record_evaluation(stats: EvaluationStats, phases: Option<EvaluationPhases>) {
    let sink = sink();
    sink.on_evaluation(&stats);
    if let Some(phases) = phases {
        sink.on_evaluation_phases(&stats, &phases);
    }
}

pub(crate) fn record_reload(kind: ReloadKind, count: usize) {
    sink().on_reload(&ReloadStats {
        kind,
        count,
        reload_time: SystemTime::now(),
    });
}
