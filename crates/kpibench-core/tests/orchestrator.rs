//! End-to-end benchmark execution against in-memory metric sources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use kpibench_core::{
    AlertCondition, AlertConfig, Benchmark, BenchmarkOrchestrator, BenchmarkResult, BenchmarkRun,
    BenchmarkingConfig, KpiError, KpiSpecification, KpiStatus, PerformanceKpi, RunStatus,
    RunSummaryArtifact, Severity, StaticMetricSource, TraceMetricSource, TriggerType,
};

/// Source whose backend is always down.
struct UnavailableSource {
    calls: AtomicUsize,
}

#[async_trait]
impl TraceMetricSource for UnavailableSource {
    async fn collect_results(
        &self,
        _run: &BenchmarkRun,
        _benchmark: &Benchmark,
    ) -> Result<Vec<BenchmarkResult>, KpiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(KpiError::Source("trace backend unavailable".to_string()))
    }
}

fn traces() -> Vec<BenchmarkResult> {
    vec![
        BenchmarkResult::new("t1")
            .with_metric("ROUGE", 0.9)
            .with_metric("BLEU", 0.5),
        BenchmarkResult::new("t2")
            .with_metric("rouge", 0.7)
            .with_metric("BLEU", 0.3),
    ]
}

fn benchmark() -> Benchmark {
    Benchmark::new("bench-1")
        .with_kpi(
            PerformanceKpi::new(
                "quality",
                KpiSpecification::from_dsl("AVERAGE(ROUGE, BLEU)", None),
            )
            .with_thresholds(Some(0.7), None)
            .with_baseline(0.5),
        )
        .with_kpi(PerformanceKpi::new(
            "rouge_gate",
            KpiSpecification::from_dsl("THRESHOLD(ROUGE, 0.75)", None),
        ))
}

fn orchestrator(source: Arc<dyn TraceMetricSource>, config: BenchmarkingConfig) -> BenchmarkOrchestrator {
    BenchmarkOrchestrator::new(source, config)
}

#[tokio::test]
async fn completed_run_scores_kpis_and_fires_alerts() {
    let orch = orchestrator(
        Arc::new(StaticMetricSource::new(traces())),
        BenchmarkingConfig::default(),
    );
    let mut alerts = vec![
        AlertConfig::new(
            "quality below target",
            "quality",
            AlertCondition::LessThan,
            0.7,
            Severity::Critical,
        )
        .for_benchmark("bench-1"),
        AlertConfig::new(
            "other benchmark",
            "quality",
            AlertCondition::LessThan,
            0.7,
            Severity::Info,
        )
        .for_benchmark("bench-2"),
    ];

    let mut run = BenchmarkRun::new("bench-1", "agent-1", TriggerType::Manual);
    let report = orch
        .execute(&mut run, &benchmark(), &mut alerts)
        .await
        .expect("execute");

    assert_eq!(run.status(), RunStatus::Completed);
    assert_eq!(report.run, run);
    assert_eq!(report.aggregated_metrics.len(), 2);
    assert!((report.aggregated_metrics["ROUGE"] - 0.8).abs() < 1e-9);

    let quality = &report.kpi_history[0];
    assert_eq!(quality.kpi_name, "quality");
    assert!((quality.value - 0.6).abs() < 1e-9);
    assert_eq!(quality.status, KpiStatus::Critical);
    assert!((quality.delta_from_baseline.expect("delta") - 0.1).abs() < 1e-9);
    assert_eq!(quality.run_id, Some(run.id));

    let gate = &report.kpi_history[1];
    assert_eq!(gate.value, 1.0);
    assert_eq!(gate.status, KpiStatus::Unknown);

    assert_eq!(report.triggered_alerts.len(), 1);
    assert_eq!(report.triggered_alerts[0].alert_name, "quality below target");
    assert!(alerts[0].last_triggered_at.is_some());
    assert!(alerts[1].last_triggered_at.is_none());

    // t2 has ROUGE 0.7 < 0.75
    assert_eq!(run.results[1].kpi_values["rouge_gate"], 0.0);
    assert_eq!(run.results[0].kpi_values["rouge_gate"], 1.0);

    let summary = RunSummaryArtifact::from_report(&report);
    assert_eq!(summary.kpis.len(), 2);
    assert_eq!(summary.traces_processed, 2);
    assert!(summary.error.is_none());
}

#[tokio::test]
async fn source_failure_fails_run_with_message() {
    let source = Arc::new(UnavailableSource {
        calls: AtomicUsize::new(0),
    });
    let orch = orchestrator(source.clone(), BenchmarkingConfig::default());
    let mut run = BenchmarkRun::new("bench-1", "agent-1", TriggerType::Manual);

    let report = orch
        .execute(&mut run, &benchmark(), &mut [])
        .await
        .expect("report");
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(run.status(), RunStatus::Failed);
    assert!(run
        .error_message()
        .expect("error message")
        .contains("trace backend unavailable"));
    assert!(report.kpi_history.is_empty());
    assert!(run.completed_at().is_some());
}

#[tokio::test]
async fn missing_metrics_fail_run_by_default() {
    let results = vec![BenchmarkResult::new("t1").with_metric("ACCURACY", 0.9)];
    let orch = orchestrator(
        Arc::new(StaticMetricSource::new(results)),
        BenchmarkingConfig::default(),
    );
    let mut run = BenchmarkRun::new("bench-1", "agent-1", TriggerType::Manual);
    orch.execute(&mut run, &benchmark(), &mut [])
        .await
        .expect("report");
    assert_eq!(run.status(), RunStatus::Failed);
    assert!(run.error_message().expect("message").contains("evaluation error"));
}

#[tokio::test]
async fn lenient_config_skips_unscorable_kpis() {
    let results = vec![BenchmarkResult::new("t1").with_metric("BLEU", 0.4)];
    let config = BenchmarkingConfig {
        fail_run_on_kpi_error: false,
        ..BenchmarkingConfig::default()
    };
    let orch = orchestrator(Arc::new(StaticMetricSource::new(results)), config);
    let mut run = BenchmarkRun::new("bench-1", "agent-1", TriggerType::Manual);

    let report = orch
        .execute(&mut run, &benchmark(), &mut [])
        .await
        .expect("report");
    assert_eq!(run.status(), RunStatus::Completed);
    assert_eq!(report.kpi_history.len(), 1);
    assert!((report.kpi_history[0].value - 0.4).abs() < 1e-9);
    assert_eq!(report.skipped_kpis, vec!["rouge_gate".to_string()]);
}

#[tokio::test]
async fn prebuilt_formula_from_json_matches_uppercased_metrics() {
    let benchmark: Benchmark = serde_json::from_str(
        r#"{
            "id": "bench-1",
            "measures": [{
                "name": "best",
                "specification": { "formula": { "type": "max", "metrics": ["rouge", "bleu"] } }
            }]
        }"#,
    )
    .expect("benchmark json");
    let orch = orchestrator(
        Arc::new(StaticMetricSource::new(traces())),
        BenchmarkingConfig::default(),
    );
    let mut run = BenchmarkRun::new("bench-1", "agent-1", TriggerType::Manual);

    let report = orch
        .execute(&mut run, &benchmark, &mut [])
        .await
        .expect("report");
    assert_eq!(run.status(), RunStatus::Completed, "{:?}", run.error_message());
    assert!((report.kpi_history[0].value - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn bad_dsl_fails_run_even_when_lenient() {
    let config = BenchmarkingConfig {
        fail_run_on_kpi_error: false,
        ..BenchmarkingConfig::default()
    };
    let orch = orchestrator(Arc::new(StaticMetricSource::new(traces())), config);
    let benchmark = Benchmark::new("bench-1").with_kpi(PerformanceKpi::new(
        "broken",
        KpiSpecification::from_dsl("AVERAGE(LATENCY)", None),
    ));
    let mut run = BenchmarkRun::new("bench-1", "agent-1", TriggerType::Manual);
    orch.execute(&mut run, &benchmark, &mut [])
        .await
        .expect("report");
    assert_eq!(run.status(), RunStatus::Failed);
    assert!(run.error_message().expect("message").contains("LATENCY"));
}

#[tokio::test]
async fn custom_metrics_from_config_are_parseable() {
    let config = BenchmarkingConfig {
        custom_metric_keys: vec!["latency".to_string()],
        ..BenchmarkingConfig::default()
    };
    let results = vec![BenchmarkResult::new("t1").with_metric("LATENCY", 120.0)];
    let orch = orchestrator(Arc::new(StaticMetricSource::new(results)), config);
    let benchmark = Benchmark::new("bench-1").with_kpi(PerformanceKpi::new(
        "latency_budget",
        KpiSpecification::from_dsl("THRESHOLD(latency, 100)", None),
    ));
    let mut run = BenchmarkRun::new("bench-1", "agent-1", TriggerType::Manual);
    let report = orch
        .execute(&mut run, &benchmark, &mut [])
        .await
        .expect("report");
    assert_eq!(run.status(), RunStatus::Completed);
    assert_eq!(report.kpi_history[0].value, 1.0);
}

#[tokio::test]
async fn repeated_scheduled_failures_disable_schedule() {
    let orch = orchestrator(
        Arc::new(UnavailableSource {
            calls: AtomicUsize::new(0),
        }),
        BenchmarkingConfig::default(),
    );
    let mut schedule = orch.new_schedule("nightly", "bench-1", "agent-1");
    let now = Utc::now();
    schedule.set_next_run_at(Some(now - Duration::seconds(1)));

    for attempt in 1..=3 {
        let report = orch
            .execute_scheduled(&mut schedule, &benchmark(), &mut [], now)
            .await
            .expect("execute")
            .expect("schedule due");
        assert_eq!(report.run.status(), RunStatus::Failed);
        assert_eq!(report.run.schedule_config_id, Some(schedule.id));
        assert_eq!(schedule.consecutive_failures(), attempt);
    }
    assert!(!schedule.enabled());

    let skipped = orch
        .execute_scheduled(&mut schedule, &benchmark(), &mut [], now)
        .await
        .expect("execute");
    assert!(skipped.is_none());
    assert_eq!(schedule.run_count(), 3);
}

#[tokio::test]
async fn scheduled_success_resets_streak() {
    let orch = orchestrator(
        Arc::new(StaticMetricSource::new(traces())),
        BenchmarkingConfig::default(),
    );
    let mut schedule = orch.new_schedule("nightly", "bench-1", "agent-1");
    schedule.record_run_failure(None);
    let now = Utc::now();
    schedule.set_next_run_at(Some(now));

    let report = orch
        .execute_scheduled(&mut schedule, &benchmark(), &mut [], now)
        .await
        .expect("execute")
        .expect("due");
    assert_eq!(report.run.status(), RunStatus::Completed);
    assert_eq!(schedule.consecutive_failures(), 0);
    assert_eq!(schedule.last_run_id(), Some(report.run.id));
}

#[tokio::test]
async fn scheduled_benchmark_mismatch_is_rejected() {
    let orch = orchestrator(
        Arc::new(StaticMetricSource::new(traces())),
        BenchmarkingConfig::default(),
    );
    let mut schedule = orch.new_schedule("nightly", "bench-other", "agent-1");
    let now = Utc::now();
    schedule.set_next_run_at(Some(now));
    let err = orch
        .execute_scheduled(&mut schedule, &benchmark(), &mut [], now)
        .await
        .unwrap_err();
    assert!(matches!(err, KpiError::Config(_)));
    assert_eq!(schedule.run_count(), 0);
}

#[tokio::test]
async fn retry_of_failed_run_can_be_executed() {
    let orch = orchestrator(
        Arc::new(StaticMetricSource::new(traces())),
        BenchmarkingConfig::default(),
    );
    let mut failed = BenchmarkRun::new("bench-1", "agent-1", TriggerType::Scheduled);
    failed.fail("boom").expect("fail");

    let mut retry = orch.retry(&failed).expect("retry");
    assert_eq!(retry.retry_count(), 1);
    orch.execute(&mut retry, &benchmark(), &mut [])
        .await
        .expect("execute");
    assert_eq!(retry.status(), RunStatus::Completed);
}
