//! KPI definitions and recorded KPI values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::formula::Formula;

/// Current DSL grammar version stamped on new specifications.
pub const DSL_VERSION: &str = "1.0";

/// How a KPI is computed: DSL text, a pre-built formula, or just a type
/// name to fall back on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KpiSpecification {
    /// `AVERAGE`, `WEIGHTED_SUM`, `MIN`, `MAX`, `THRESHOLD` or `CUSTOM`.
    #[serde(default)]
    pub formula_type: Option<String>,
    /// Opaque serialized configuration carried alongside the formula.
    #[serde(default)]
    pub formula_config: Option<String>,
    #[serde(default)]
    pub dsl_text: Option<String>,
    #[serde(default)]
    pub dsl_version: Option<String>,
    #[serde(default)]
    pub formula: Option<Formula>,
}

impl KpiSpecification {
    pub fn from_dsl(dsl_text: impl Into<String>, formula_type: Option<String>) -> Self {
        Self {
            formula_type,
            dsl_text: Some(dsl_text.into()),
            dsl_version: Some(DSL_VERSION.to_string()),
            ..Self::default()
        }
    }

    pub fn from_formula(formula: Formula) -> Self {
        Self {
            formula_type: Some(formula.kind().as_str().to_string()),
            formula: Some(formula),
            ..Self::default()
        }
    }

    pub fn has_dsl_text(&self) -> bool {
        self.dsl_text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn has_formula(&self) -> bool {
        self.formula.is_some()
    }
}

fn new_kpi_id() -> String {
    Uuid::new_v4().to_string()
}

/// A KPI measured by a benchmark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceKpi {
    #[serde(default = "new_kpi_id")]
    pub id: String,
    /// Human name; also the key in results and history.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Metric keys this KPI draws on.
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub specification: KpiSpecification,
    #[serde(default)]
    pub threshold_min: Option<f64>,
    #[serde(default)]
    pub threshold_max: Option<f64>,
    #[serde(default)]
    pub baseline_value: Option<f64>,
}

impl PerformanceKpi {
    pub fn new(name: impl Into<String>, specification: KpiSpecification) -> Self {
        Self {
            id: new_kpi_id(),
            name: name.into(),
            description: None,
            includes: Vec::new(),
            specification,
            threshold_min: None,
            threshold_max: None,
            baseline_value: None,
        }
    }

    pub fn with_thresholds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.threshold_min = min;
        self.threshold_max = max;
        self
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline_value = Some(baseline);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum KpiStatus {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

impl fmt::Display for KpiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "HEALTHY",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Unknown => "UNKNOWN",
        })
    }
}

/// One KPI value recorded for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KpiHistory {
    pub id: Uuid,
    pub benchmark_id: String,
    pub agent_id: String,
    pub run_id: Option<Uuid>,
    pub kpi_id: Option<String>,
    pub kpi_name: String,
    pub value: f64,
    pub baseline_value: Option<f64>,
    pub threshold_min: Option<f64>,
    pub threshold_max: Option<f64>,
    pub delta_from_baseline: Option<f64>,
    pub delta_percentage: Option<f64>,
    pub status: KpiStatus,
    /// Digest of the formula that produced `value`.
    pub formula_digest: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl KpiHistory {
    pub fn new(
        benchmark_id: impl Into<String>,
        agent_id: impl Into<String>,
        kpi_name: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            benchmark_id: benchmark_id.into(),
            agent_id: agent_id.into(),
            run_id: None,
            kpi_id: None,
            kpi_name: kpi_name.into(),
            value,
            baseline_value: None,
            threshold_min: None,
            threshold_max: None,
            delta_from_baseline: None,
            delta_percentage: None,
            status: KpiStatus::Unknown,
            formula_digest: None,
            recorded_at: Utc::now(),
        }
    }

    /// Set the baseline and derive the deltas. The percentage is left
    /// unset for a zero baseline.
    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline_value = Some(baseline);
        let delta = self.value - baseline;
        self.delta_from_baseline = Some(delta);
        self.delta_percentage = (baseline != 0.0).then(|| delta / baseline * 100.0);
        self
    }

    pub fn with_thresholds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.threshold_min = min;
        self.threshold_max = max;
        self
    }

    /// Below min is CRITICAL, above max is WARNING, inside a configured band
    /// is HEALTHY, and no band at all is UNKNOWN.
    pub fn evaluate_status(&mut self) -> KpiStatus {
        self.status = match (self.threshold_min, self.threshold_max) {
            (Some(min), _) if self.value < min => KpiStatus::Critical,
            (_, Some(max)) if self.value > max => KpiStatus::Warning,
            (None, None) => KpiStatus::Unknown,
            _ => KpiStatus::Healthy,
        };
        self.status
    }
}
