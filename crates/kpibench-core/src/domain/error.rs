//! Domain-level error taxonomy for KPI Bench.

use crate::domain::run::RunStatus;
use crate::dsl::DslValidationError;

/// Errors produced while evaluating a formula against metric values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("no metric values provided")]
    EmptyInput,

    #[error("missing required metric: {metric}")]
    MissingMetric { metric: String },

    #[error("insufficient data: none of the referenced metrics are present ({})", .metrics.join(", "))]
    InsufficientData { metrics: Vec<String> },

    #[error("metric {metric} has a non-finite value")]
    NonFiniteValue { metric: String },
}

/// Errors produced by benchmark run lifecycle transitions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot {action} run {run_id} in status {from}")]
    InvalidTransition {
        run_id: uuid::Uuid,
        from: RunStatus,
        action: &'static str,
    },

    #[error("max retries ({max_retries}) exceeded for run {run_id}")]
    RetryLimitExceeded { run_id: uuid::Uuid, max_retries: u32 },
}

/// Errors surfaced by the DSL service facade.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DslError {
    #[error("{}", render_parse_errors(.errors))]
    Parse { errors: Vec<DslValidationError> },

    #[error("invalid KPI specification: {0}")]
    InvalidSpecification(String),
}

fn render_parse_errors(errors: &[DslValidationError]) -> String {
    let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("DSL parse failed: {}", lines.join("; "))
}

/// KPI Bench domain errors.
#[derive(Debug, thiserror::Error)]
pub enum KpiError {
    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Dsl(#[from] DslError),

    #[error("metric source error: {0}")]
    Source(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for KPI Bench domain operations.
pub type Result<T> = std::result::Result<T, KpiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::ErrorCode;

    #[test]
    fn test_evaluation_error_display() {
        let err = EvaluationError::MissingMetric {
            metric: "BLEU".to_string(),
        };
        assert_eq!(err.to_string(), "missing required metric: BLEU");

        let err = EvaluationError::InsufficientData {
            metrics: vec!["ROUGE".to_string(), "BLEU".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("ROUGE, BLEU"));
    }

    #[test]
    fn test_lifecycle_error_names_action_and_status() {
        let id = uuid::Uuid::new_v4();
        let err = LifecycleError::InvalidTransition {
            run_id: id,
            from: RunStatus::Completed,
            action: "start",
        };
        let msg = err.to_string();
        assert!(msg.contains("cannot start"));
        assert!(msg.contains("COMPLETED"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_dsl_error_lists_every_location() {
        let err = DslError::Parse {
            errors: vec![
                DslValidationError::new(ErrorCode::UnknownMetric, "Unknown metric 'FOO'", 1, 9),
                DslValidationError::new(ErrorCode::UnknownMetric, "Unknown metric 'BAR'", 1, 14),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("Line 1, Column 9: Unknown metric 'FOO'"));
        assert!(msg.contains("Line 1, Column 14: Unknown metric 'BAR'"));
    }

    #[test]
    fn test_kpi_error_wraps_evaluation() {
        let err: KpiError = EvaluationError::EmptyInput.into();
        assert!(err.to_string().contains("evaluation error"));
        assert!(err.to_string().contains("no metric values provided"));
    }
}
