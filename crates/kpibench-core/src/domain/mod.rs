//! Domain models for KPI Bench.
//!
//! Canonical definitions for the core entities:
//! - `BenchmarkRun`: one execution attempt and its lifecycle
//! - `ScheduleConfig`: recurring runs with a failure circuit breaker
//! - `Benchmark` / `PerformanceKpi`: what to measure and how to score it
//! - `KpiHistory` / `AlertConfig`: recorded scores and the rules watching them

pub mod alert;
pub mod benchmark;
pub mod digest;
pub mod error;
pub mod kpi;
pub mod run;
pub mod schedule;

// Re-export main types and errors
pub use alert::{evaluate_alerts, AlertCondition, AlertConfig, Severity, TriggeredAlert};
pub use benchmark::{aggregate_metrics, Benchmark, BenchmarkResult, MetricSnapshot};
pub use digest::formula_digest;
pub use error::{DslError, EvaluationError, KpiError, LifecycleError, Result};
pub use kpi::{KpiHistory, KpiSpecification, KpiStatus, PerformanceKpi, DSL_VERSION};
pub use run::{BenchmarkRun, RunStatus, TriggerType};
pub use schedule::ScheduleConfig;
