//! KPI formulas and their evaluation.
//!
//! A [`Formula`] is a closed set of five shapes produced by the DSL parser or
//! built directly. Evaluation takes aggregated metric values keyed by the
//! uppercase metric name and yields a single score.
//!
//! Missing-data policy differs per shape:
//! - `Average`, `Min`, `Max` use whichever referenced metrics are present and
//!   fail only when none are.
//! - `WeightedSum` and `Threshold` require every referenced metric.
//! - Any shape fails on an empty input map, and a weighted sum fails with no
//!   weights. No shape ever defaults to 0.
//! - A referenced metric that is present but NaN or infinite is an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::EvaluationError;
use crate::dsl::registry::normalize_metric_key;

/// Comparison applied by [`Formula::Threshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdComparison {
    /// `value >= threshold`. What the DSL produces.
    #[default]
    AtLeast,
    /// `value > threshold`.
    GreaterThan,
    /// `value < threshold`.
    LessThan,
}

impl ThresholdComparison {
    fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::AtLeast => value >= threshold,
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
        }
    }
}

/// Shape of a formula, named by its DSL keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormulaKind {
    Average,
    WeightedSum,
    Min,
    Max,
    Threshold,
}

impl FormulaKind {
    pub const ALL: [FormulaKind; 5] = [
        FormulaKind::Average,
        FormulaKind::WeightedSum,
        FormulaKind::Min,
        FormulaKind::Max,
        FormulaKind::Threshold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::WeightedSum => "WEIGHTED_SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Threshold => "THRESHOLD",
        }
    }

    /// Look up a kind by keyword, case-insensitively.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for FormulaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An evaluable KPI formula.
///
/// Deserialization goes through the constructors, so metric names read from
/// JSON are uppercased like those of directly built formulas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", from = "FormulaRepr")]
pub enum Formula {
    Average {
        metrics: Vec<String>,
    },
    WeightedSum {
        weights: BTreeMap<String, f64>,
    },
    Min {
        metrics: Vec<String>,
    },
    Max {
        metrics: Vec<String>,
    },
    Threshold {
        metric: String,
        threshold: f64,
        comparison: ThresholdComparison,
    },
}

/// Wire shape of [`Formula`], before name normalization.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FormulaRepr {
    Average {
        metrics: Vec<String>,
    },
    WeightedSum {
        weights: BTreeMap<String, f64>,
    },
    Min {
        metrics: Vec<String>,
    },
    Max {
        metrics: Vec<String>,
    },
    Threshold {
        metric: String,
        threshold: f64,
        #[serde(default)]
        comparison: ThresholdComparison,
    },
}

impl From<FormulaRepr> for Formula {
    fn from(repr: FormulaRepr) -> Self {
        match repr {
            FormulaRepr::Average { metrics } => Formula::average(metrics),
            FormulaRepr::WeightedSum { weights } => Formula::weighted_sum(weights),
            FormulaRepr::Min { metrics } => Formula::min(metrics),
            FormulaRepr::Max { metrics } => Formula::max(metrics),
            FormulaRepr::Threshold {
                metric,
                threshold,
                comparison,
            } => Formula::threshold_with(&metric, threshold, comparison),
        }
    }
}

fn normalize_all<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| normalize_metric_key(n.as_ref()))
        .collect()
}

impl Formula {
    pub fn average<I, S>(metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Average {
            metrics: normalize_all(metrics),
        }
    }

    pub fn weighted_sum<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        Self::WeightedSum {
            weights: weights
                .into_iter()
                .map(|(name, w)| (normalize_metric_key(name.as_ref()), w))
                .collect(),
        }
    }

    pub fn min<I, S>(metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Min {
            metrics: normalize_all(metrics),
        }
    }

    pub fn max<I, S>(metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Max {
            metrics: normalize_all(metrics),
        }
    }

    /// Meets-or-exceeds threshold, as the DSL builds it.
    pub fn threshold(metric: &str, threshold: f64) -> Self {
        Self::threshold_with(metric, threshold, ThresholdComparison::AtLeast)
    }

    pub fn threshold_with(metric: &str, threshold: f64, comparison: ThresholdComparison) -> Self {
        Self::Threshold {
            metric: normalize_metric_key(metric),
            threshold,
            comparison,
        }
    }

    pub fn kind(&self) -> FormulaKind {
        match self {
            Self::Average { .. } => FormulaKind::Average,
            Self::WeightedSum { .. } => FormulaKind::WeightedSum,
            Self::Min { .. } => FormulaKind::Min,
            Self::Max { .. } => FormulaKind::Max,
            Self::Threshold { .. } => FormulaKind::Threshold,
        }
    }

    /// Every metric name this formula reads.
    pub fn referenced_metrics(&self) -> BTreeSet<String> {
        match self {
            Self::Average { metrics } | Self::Min { metrics } | Self::Max { metrics } => {
                metrics.iter().cloned().collect()
            }
            Self::WeightedSum { weights } => weights.keys().cloned().collect(),
            Self::Threshold { metric, .. } => BTreeSet::from([metric.clone()]),
        }
    }

    /// Compute the KPI score from aggregated metric values.
    ///
    /// Keys are matched exactly against the uppercase names stored in the
    /// formula.
    pub fn evaluate(&self, metric_values: &HashMap<String, f64>) -> Result<f64, EvaluationError> {
        if metric_values.is_empty() {
            return Err(EvaluationError::EmptyInput);
        }

        match self {
            Self::Average { metrics } => {
                let present = present_values(metrics, metric_values)?;
                Ok(present.iter().sum::<f64>() / present.len() as f64)
            }
            Self::WeightedSum { weights } => {
                if weights.is_empty() {
                    return Err(EvaluationError::InsufficientData {
                        metrics: Vec::new(),
                    });
                }
                let mut sum = 0.0;
                for (name, weight) in weights {
                    sum += required_value(name, metric_values)? * weight;
                }
                Ok(sum)
            }
            Self::Min { metrics } => {
                let present = present_values(metrics, metric_values)?;
                Ok(present.into_iter().fold(f64::INFINITY, f64::min))
            }
            Self::Max { metrics } => {
                let present = present_values(metrics, metric_values)?;
                Ok(present.into_iter().fold(f64::NEG_INFINITY, f64::max))
            }
            Self::Threshold {
                metric,
                threshold,
                comparison,
            } => {
                let value = required_value(metric, metric_values)?;
                Ok(if comparison.holds(value, *threshold) {
                    1.0
                } else {
                    0.0
                })
            }
        }
    }

    /// Canonical DSL text for this formula.
    ///
    /// Strict threshold comparisons have no DSL spelling and render with the
    /// DSL's meets-or-exceeds form; see [`Formula::is_dsl_expressible`].
    pub fn to_dsl(&self) -> String {
        self.to_string()
    }

    /// Whether [`Formula::to_dsl`] re-parses to an equal formula.
    pub fn is_dsl_expressible(&self) -> bool {
        match self {
            Self::Threshold { comparison, .. } => *comparison == ThresholdComparison::AtLeast,
            Self::Average { metrics } | Self::Min { metrics } | Self::Max { metrics } => {
                !metrics.is_empty()
            }
            Self::WeightedSum { weights } => !weights.is_empty(),
        }
    }
}

/// The value for `metric`, if present. Present values must be finite.
fn lookup(metric: &str, metric_values: &HashMap<String, f64>) -> Result<Option<f64>, EvaluationError> {
    match metric_values.get(metric) {
        Some(v) if !v.is_finite() => Err(EvaluationError::NonFiniteValue {
            metric: metric.to_string(),
        }),
        other => Ok(other.copied()),
    }
}

fn required_value(metric: &str, metric_values: &HashMap<String, f64>) -> Result<f64, EvaluationError> {
    lookup(metric, metric_values)?.ok_or_else(|| EvaluationError::MissingMetric {
        metric: metric.to_string(),
    })
}

fn present_values(
    metrics: &[String],
    metric_values: &HashMap<String, f64>,
) -> Result<Vec<f64>, EvaluationError> {
    let mut present = Vec::with_capacity(metrics.len());
    for m in metrics {
        if let Some(v) = lookup(m, metric_values)? {
            present.push(v);
        }
    }
    if present.is_empty() {
        return Err(EvaluationError::InsufficientData {
            metrics: metrics.to_vec(),
        });
    }
    Ok(present)
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Average { metrics } | Self::Min { metrics } | Self::Max { metrics } => {
                write!(f, "{}({})", self.kind(), metrics.join(", "))
            }
            Self::WeightedSum { weights } => {
                let pairs: Vec<String> = weights
                    .iter()
                    .map(|(name, weight)| format!("{name}: {weight}"))
                    .collect();
                write!(f, "{}({})", self.kind(), pairs.join(", "))
            }
            Self::Threshold {
                metric, threshold, ..
            } => write!(f, "{}({}, {})", self.kind(), metric, threshold),
        }
    }
}
