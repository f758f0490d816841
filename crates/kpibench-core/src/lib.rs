//! KPI Bench Core Library
//!
//! Compiles KPI formula expressions, evaluates them against aggregated
//! benchmark metrics, and tracks benchmark runs and recurring schedules
//! through their lifecycles.

pub mod config;
pub mod domain;
pub mod dsl;
pub mod formula;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod reporting;
pub mod telemetry;

pub use config::BenchmarkingConfig;

pub use domain::{
    aggregate_metrics, evaluate_alerts, formula_digest, AlertCondition, AlertConfig, Benchmark,
    BenchmarkResult, BenchmarkRun, DslError, EvaluationError, KpiError, KpiHistory,
    KpiSpecification, KpiStatus, LifecycleError, MetricSnapshot, PerformanceKpi, Result,
    RunStatus, ScheduleConfig, Severity, TriggerType, TriggeredAlert,
};

pub use dsl::{
    DslValidationError, ErrorCode, ErrorSeverity, KpiFormulaDslService, KpiFormulaParser,
    MetricRegistry, ParseResult, DEFAULT_METRIC_KEYS,
};

pub use formula::{Formula, FormulaKind, ThresholdComparison};

pub use orchestrator::{BenchmarkOrchestrator, RunReport, StaticMetricSource, TraceMetricSource};

pub use reporting::{render_run_summary_md, write_run_summary_json, RunSummaryArtifact};

pub use telemetry::init_tracing;

/// Crate version, for CLI `--version` output and artifacts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
