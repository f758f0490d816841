//! Benchmark execution: collect trace metrics, score KPIs, fire alerts and
//! drive the run and schedule state machines.
//!
//! The trace/metrics backend sits behind the [`TraceMetricSource`] trait so
//! the orchestrator can run against a live client, a file, or a test fake.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Instrument};

use crate::config::BenchmarkingConfig;
use crate::domain::alert::{evaluate_alerts, AlertConfig, TriggeredAlert};
use crate::domain::benchmark::{aggregate_metrics, Benchmark, BenchmarkResult};
use crate::domain::digest::formula_digest;
use crate::domain::error::{KpiError, LifecycleError, Result};
use crate::domain::kpi::{KpiHistory, PerformanceKpi};
use crate::domain::run::{BenchmarkRun, RunStatus, TriggerType};
use crate::domain::schedule::ScheduleConfig;
use crate::dsl::KpiFormulaDslService;
use crate::formula::Formula;
use crate::metrics::METRICS;
use crate::obs::{
    emit_kpi_evaluated, emit_run_failed, emit_run_finished, emit_run_started, run_span, RunSpan,
};

/// External trace-and-metrics collaborator.
#[async_trait]
pub trait TraceMetricSource: Send + Sync {
    /// Per-trace results, with metric snapshots, for one run.
    async fn collect_results(
        &self,
        run: &BenchmarkRun,
        benchmark: &Benchmark,
    ) -> std::result::Result<Vec<BenchmarkResult>, KpiError>;
}

/// Source that hands out a fixed set of results for every run.
#[derive(Debug, Clone, Default)]
pub struct StaticMetricSource {
    results: Vec<BenchmarkResult>,
}

impl StaticMetricSource {
    pub fn new(results: Vec<BenchmarkResult>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl TraceMetricSource for StaticMetricSource {
    async fn collect_results(
        &self,
        _run: &BenchmarkRun,
        _benchmark: &Benchmark,
    ) -> std::result::Result<Vec<BenchmarkResult>, KpiError> {
        Ok(self.results.clone())
    }
}

/// Everything a finished execution produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    /// The run after its terminal transition.
    pub run: BenchmarkRun,
    pub aggregated_metrics: BTreeMap<String, f64>,
    pub kpi_history: Vec<KpiHistory>,
    pub triggered_alerts: Vec<TriggeredAlert>,
    /// KPIs that could not be evaluated and were skipped.
    pub skipped_kpis: Vec<String>,
}

#[derive(Default)]
struct Scoring {
    traces_processed: u64,
    metrics_computed: u64,
    aggregated: HashMap<String, f64>,
    history: Vec<KpiHistory>,
    triggered: Vec<TriggeredAlert>,
    skipped: Vec<String>,
}

pub struct BenchmarkOrchestrator {
    source: Arc<dyn TraceMetricSource>,
    dsl: KpiFormulaDslService,
    config: BenchmarkingConfig,
}

impl BenchmarkOrchestrator {
    pub fn new(source: Arc<dyn TraceMetricSource>, config: BenchmarkingConfig) -> Self {
        let dsl = KpiFormulaDslService::from_config(&config);
        Self {
            source,
            dsl,
            config,
        }
    }

    pub fn with_dsl_service(mut self, dsl: KpiFormulaDslService) -> Self {
        self.dsl = dsl;
        self
    }

    pub fn config(&self) -> &BenchmarkingConfig {
        &self.config
    }

    pub fn dsl(&self) -> &KpiFormulaDslService {
        &self.dsl
    }

    /// A schedule carrying this orchestrator's failure policy.
    pub fn new_schedule(
        &self,
        name: impl Into<String>,
        benchmark_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> ScheduleConfig {
        ScheduleConfig::new(name, benchmark_id, agent_id).with_failure_policy(
            self.config.max_consecutive_failures,
            self.config.auto_disable_on_failure,
        )
    }

    /// Execute a PENDING run to a terminal state.
    ///
    /// Only a run that cannot be started is an `Err`. Failures during
    /// execution fail the run, with the error text as its `error_message`,
    /// and still produce a report.
    pub async fn execute(
        &self,
        run: &mut BenchmarkRun,
        benchmark: &Benchmark,
        alerts: &mut [AlertConfig],
    ) -> Result<RunReport> {
        run.start()?;
        let run_id = run.id.to_string();
        emit_run_started(&run_id, &benchmark.id, &run.agent_id);

        let outcome = self
            .score(run, benchmark, alerts)
            .instrument(run_span(&run_id))
            .await;
        self.finish(run, outcome)
    }

    async fn score(
        &self,
        run: &mut BenchmarkRun,
        benchmark: &Benchmark,
        alerts: &mut [AlertConfig],
    ) -> Result<Scoring> {
        let results = self.source.collect_results(run, benchmark).await?;
        if results.is_empty() {
            warn!(benchmark_id = %benchmark.id, "no traces found for run");
        }

        let mut scoring = Scoring::default();
        for result in &results {
            scoring.traces_processed += 1;
            scoring.metrics_computed += result.metric_snapshots.len() as u64;
            run.update_progress(scoring.traces_processed, scoring.metrics_computed)?;
        }
        run.results = results;
        scoring.aggregated = aggregate_metrics(&run.results);

        for kpi in &benchmark.measures {
            let formula = self.dsl.build_from_specification(&kpi.specification)?;
            METRICS.inc_evaluations();
            let value = match formula.evaluate(&scoring.aggregated) {
                Ok(value) => value,
                Err(e) => {
                    METRICS.inc_evaluation_failures();
                    if self.config.fail_run_on_kpi_error {
                        return Err(e.into());
                    }
                    warn!(kpi = %kpi.name, error = %e, "failed to compute KPI, skipping");
                    scoring.skipped.push(kpi.name.clone());
                    continue;
                }
            };

            let history = self.record_kpi(run, benchmark, kpi, &formula, value)?;
            emit_kpi_evaluated(
                &run.id.to_string(),
                &kpi.name,
                value,
                &history.status.to_string(),
            );
            scoring.history.push(history);
            score_each_result(&mut run.results, &kpi.name, &formula);
        }

        scoring.triggered = evaluate_alerts(alerts, &scoring.history, Utc::now());
        Ok(scoring)
    }

    fn record_kpi(
        &self,
        run: &BenchmarkRun,
        benchmark: &Benchmark,
        kpi: &PerformanceKpi,
        formula: &Formula,
        value: f64,
    ) -> Result<KpiHistory> {
        let mut history = KpiHistory::new(&benchmark.id, &run.agent_id, &kpi.name, value)
            .with_thresholds(kpi.threshold_min, kpi.threshold_max);
        if let Some(baseline) = kpi.baseline_value {
            history = history.with_baseline(baseline);
        }
        history.run_id = Some(run.id);
        history.kpi_id = Some(kpi.id.clone());
        history.formula_digest = Some(formula_digest(formula)?);
        history.evaluate_status();
        Ok(history)
    }

    fn finish(&self, run: &mut BenchmarkRun, outcome: Result<Scoring>) -> Result<RunReport> {
        let _span = RunSpan::enter(&run.id.to_string());
        let run_id = run.id.to_string();

        let scoring = match outcome {
            Ok(scoring) => {
                run.complete(scoring.traces_processed, scoring.metrics_computed)?;
                METRICS.inc_runs_completed();
                emit_run_finished(
                    &run_id,
                    run.duration_millis(),
                    scoring.traces_processed,
                    scoring.metrics_computed,
                );
                scoring
            }
            Err(e) => {
                run.fail(e.to_string())?;
                METRICS.inc_runs_failed();
                emit_run_failed(&run_id, &e);
                Scoring::default()
            }
        };

        Ok(RunReport {
            run: run.clone(),
            aggregated_metrics: scoring.aggregated.into_iter().collect(),
            kpi_history: scoring.history,
            triggered_alerts: scoring.triggered,
            skipped_kpis: scoring.skipped,
        })
    }

    /// A fresh PENDING manual run repeating a FAILED or CANCELLED one.
    pub fn retry(&self, previous: &BenchmarkRun) -> std::result::Result<BenchmarkRun, LifecycleError> {
        if !matches!(previous.status(), RunStatus::Failed | RunStatus::Cancelled) {
            return Err(LifecycleError::InvalidTransition {
                run_id: previous.id,
                from: previous.status(),
                action: "retry",
            });
        }
        if previous.retry_count() >= self.config.max_retries {
            return Err(LifecycleError::RetryLimitExceeded {
                run_id: previous.id,
                max_retries: self.config.max_retries,
            });
        }

        let retry = BenchmarkRun::new(
            previous.benchmark_id.clone(),
            previous.agent_id.clone(),
            TriggerType::Manual,
        )
        .with_user("retry")
        .with_retry_count(previous.retry_count() + 1);
        debug!(previous = %previous.id, retry = %retry.id, "created retry run");
        Ok(retry)
    }

    /// Fire a due schedule: create a scheduled run, execute it, and record
    /// the outcome on the schedule. Returns `None` when the schedule is not
    /// due at `now`.
    pub async fn execute_scheduled(
        &self,
        schedule: &mut ScheduleConfig,
        benchmark: &Benchmark,
        alerts: &mut [AlertConfig],
        now: DateTime<Utc>,
    ) -> Result<Option<RunReport>> {
        if !schedule.is_due(now) {
            debug!(schedule = %schedule.name, "schedule not due");
            return Ok(None);
        }
        if schedule.benchmark_id != benchmark.id {
            return Err(KpiError::Config(format!(
                "schedule {} targets benchmark {}, got {}",
                schedule.id, schedule.benchmark_id, benchmark.id
            )));
        }

        let mut run = schedule.create_run();
        let report = self.execute(&mut run, benchmark, alerts).await?;
        schedule.record_run_outcome(&report.run, now);
        Ok(Some(report))
    }
}

/// Fill each result's `kpi_values` from its own metrics. Traces that lack
/// the data for this formula are left without a value.
fn score_each_result(results: &mut [BenchmarkResult], kpi_name: &str, formula: &Formula) {
    for result in results.iter_mut() {
        let own = aggregate_metrics(std::slice::from_ref(result));
        match formula.evaluate(&own) {
            Ok(value) => result.add_kpi_value(kpi_name, value),
            Err(e) => debug!(trace_id = %result.trace_id, kpi = kpi_name, error = %e, "no per-trace KPI value"),
        }
    }
}
