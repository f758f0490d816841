//! Benchmarks, per-trace results and metric aggregation.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::kpi::PerformanceKpi;
use crate::dsl::registry::normalize_metric_key;

/// A benchmark definition: what dataset to run and which KPIs to score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Benchmark {
    pub id: String,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub dataset_ref: Option<String>,
    #[serde(default)]
    pub task_def: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Name of the trace-side run to pull data from.
    #[serde(default)]
    pub run_name: Option<String>,
    /// KPIs this benchmark measures.
    #[serde(default)]
    pub measures: Vec<PerformanceKpi>,
}

impl Benchmark {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: None,
            dataset_ref: None,
            task_def: None,
            protocol_version: None,
            run_name: None,
            measures: Vec::new(),
        }
    }

    pub fn with_kpi(mut self, kpi: PerformanceKpi) -> Self {
        self.measures.push(kpi);
        self
    }
}

/// One metric measurement taken from one trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSnapshot {
    pub metric_key: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl MetricSnapshot {
    pub fn new(metric_key: impl Into<String>, value: f64) -> Self {
        Self {
            metric_key: metric_key.into(),
            value,
            unit: None,
            trace_id: None,
            timestamp: Utc::now(),
        }
    }
}

/// Everything computed for one trace in a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkResult {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub trace_id: String,
    #[serde(default)]
    pub expected_text: Option<String>,
    #[serde(default)]
    pub generated_text: Option<String>,
    #[serde(default)]
    pub metric_snapshots: Vec<MetricSnapshot>,
    /// KPI name -> score, filled in after KPI evaluation.
    #[serde(default)]
    pub kpi_values: BTreeMap<String, f64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl BenchmarkResult {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trace_id: trace_id.into(),
            expected_text: None,
            generated_text: None,
            metric_snapshots: Vec::new(),
            kpi_values: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metric(mut self, metric_key: impl Into<String>, value: f64) -> Self {
        let mut snapshot = MetricSnapshot::new(metric_key, value);
        snapshot.trace_id = Some(self.trace_id.clone());
        self.metric_snapshots.push(snapshot);
        self
    }

    pub fn add_kpi_value(&mut self, kpi_name: impl Into<String>, value: f64) {
        self.kpi_values.insert(kpi_name.into(), value);
    }
}

/// Mean value per metric across every snapshot of every result.
///
/// Keys are normalized to uppercase so they line up with formula metric
/// names. Non-finite values are skipped.
pub fn aggregate_metrics(results: &[BenchmarkResult]) -> HashMap<String, f64> {
    let mut sums: HashMap<String, (f64, u32)> = HashMap::new();
    for snapshot in results.iter().flat_map(|r| &r.metric_snapshots) {
        if !snapshot.value.is_finite() {
            continue;
        }
        let entry = sums
            .entry(normalize_metric_key(&snapshot.metric_key))
            .or_insert((0.0, 0));
        entry.0 += snapshot.value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(key, (sum, count))| (key, sum / f64::from(count)))
        .collect()
}
