//! Lifecycle events for runs, KPIs, alerts, schedules and the DSL.
//!
//! Every event carries a stable `event = "..."` field so log pipelines can
//! filter on it regardless of message text.

use tracing::{info, warn};

/// Guard holding the `kpibench.run` span entered until dropped. Sync code
/// only; see [`run_span`] for futures.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The run-scoped span, unentered. Use with `tracing::Instrument` for async
/// work, since an entered guard must not be held across `.await`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("kpibench.run", run_id = %run_id)
}

/// Emit event: run started for a benchmark/agent pair.
pub fn emit_run_started(run_id: &str, benchmark_id: &str, agent_id: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        benchmark_id = %benchmark_id,
        agent_id = %agent_id,
    );
}

/// Emit event: run reached COMPLETED.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, traces_processed: u64, metrics_computed: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        traces_processed = traces_processed,
        metrics_computed = metrics_computed,
    );
}

/// Emit event: run reached FAILED (warning level).
pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}

/// Emit event: one KPI scored.
pub fn emit_kpi_evaluated(run_id: &str, kpi_name: &str, value: f64, status: &str) {
    info!(
        event = "kpi.evaluated",
        run_id = %run_id,
        kpi = %kpi_name,
        value = value,
        status = %status,
    );
}

/// Emit event: an alert condition held and the alert fired.
pub fn emit_alert_triggered(alert_name: &str, kpi_name: &str, value: f64, threshold: f64) {
    warn!(
        event = "alert.triggered",
        alert = %alert_name,
        kpi = %kpi_name,
        value = value,
        threshold = threshold,
    );
}

/// Emit event: a schedule recorded a run outcome.
pub fn emit_schedule_run_recorded(schedule_id: &str, success: bool, consecutive_failures: u32) {
    info!(
        event = "schedule.run_recorded",
        schedule_id = %schedule_id,
        success = success,
        consecutive_failures = consecutive_failures,
    );
}

/// Emit event: the failure circuit breaker disabled a schedule.
pub fn emit_schedule_auto_disabled(schedule_id: &str, consecutive_failures: u32) {
    warn!(
        event = "schedule.auto_disabled",
        schedule_id = %schedule_id,
        consecutive_failures = consecutive_failures,
    );
}

/// Emit event: a DSL expression failed to compile (debug level; parse
/// failures are ordinary user input errors).
pub fn emit_parse_failed(expression: &str, error_count: usize) {
    tracing::debug!(
        event = "dsl.parse_failed",
        expression = %expression,
        error_count = error_count,
    );
}
