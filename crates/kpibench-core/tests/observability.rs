//! Observability tests for benchmark lifecycle tracing.
//!
//! These tests verify that structured tracing events are emitted with their
//! stable `event` field for run, KPI, alert and schedule bookkeeping.

use std::sync::Arc;

use kpibench_core::obs::{
    emit_alert_triggered, emit_kpi_evaluated, emit_run_failed, emit_run_finished,
    emit_run_started, emit_schedule_auto_disabled, RunSpan,
};
use kpibench_core::{
    Benchmark, BenchmarkOrchestrator, BenchmarkResult, BenchmarkRun, BenchmarkingConfig,
    KpiSpecification, PerformanceKpi, ScheduleConfig, StaticMetricSource, TriggerType,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_run_started_logs_benchmark_and_agent() {
    emit_run_started("run-123", "bench-1", "agent-7");
    assert!(logs_contain("run.started"));
    assert!(logs_contain("agent-7"));
}

#[traced_test]
#[test]
fn test_emit_run_finished_logs_counts() {
    emit_run_finished("run-456", 5000, 42, 84);
    assert!(logs_contain("run.finished"));
    assert!(logs_contain("traces_processed=42"));
}

#[traced_test]
#[test]
fn test_emit_run_failed_logs_warning() {
    let error_msg = "trace backend unavailable";
    emit_run_failed("run-err-001", &error_msg);
    assert!(logs_contain("run.failed"));
    assert!(logs_contain("WARN"));
}

#[traced_test]
#[test]
fn test_emit_kpi_and_alert_events() {
    emit_kpi_evaluated("run-1", "quality", 0.61, "CRITICAL");
    emit_alert_triggered("quality low", "quality", 0.61, 0.7);
    assert!(logs_contain("kpi.evaluated"));
    assert!(logs_contain("alert.triggered"));
}

#[traced_test]
#[test]
fn test_run_span_enter_creates_span() {
    let span = RunSpan::enter("test-span-run");
    emit_schedule_auto_disabled("sched-1", 3);
    drop(span);
    assert!(logs_contain("schedule.auto_disabled"));
}

#[traced_test]
#[test]
fn test_schedule_breaker_logs_auto_disable() {
    let mut schedule = ScheduleConfig::new("nightly", "bench-1", "agent-1").with_failure_policy(1, true);
    assert!(schedule.record_run_failure(None));
    assert!(logs_contain("schedule.run_recorded"));
    assert!(logs_contain("schedule.auto_disabled"));
}

#[tokio::test]
#[traced_test]
async fn test_execute_emits_lifecycle_events() {
    let orch = BenchmarkOrchestrator::new(
        Arc::new(StaticMetricSource::new(vec![BenchmarkResult::new("t1")
            .with_metric("ROUGE", 0.8)])),
        BenchmarkingConfig::default(),
    );
    let benchmark = Benchmark::new("bench-obs").with_kpi(PerformanceKpi::new(
        "rouge",
        KpiSpecification::from_dsl("MAX(ROUGE)", None),
    ));
    let mut run = BenchmarkRun::new("bench-obs", "agent-obs", TriggerType::Manual);
    orch.execute(&mut run, &benchmark, &mut [])
        .await
        .expect("execute");

    assert!(logs_contain("run.started"));
    assert!(logs_contain("kpi.evaluated"));
    assert!(logs_contain("run.finished"));
    assert!(logs_contain(&run.id.to_string()));
}
