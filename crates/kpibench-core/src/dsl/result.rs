//! Parse outcomes and structured diagnostics for the formula DSL.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::formula::Formula;

/// Machine-readable classification of a DSL diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Input was absent, empty, or only whitespace.
    EmptyExpression,
    /// Input did not match any of the supported formula shapes.
    UnrecognizedPattern,
    /// A weight or threshold literal is not a finite decimal number.
    MalformedNumber,
    /// An argument has the wrong shape, or the argument count is wrong.
    InvalidArgument,
    /// A metric identifier is not in the parser's registry.
    UnknownMetric,
    /// A referenced metric is not produced by the current pipeline.
    MetricNotAvailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyExpression => "EMPTY_EXPRESSION",
            Self::UnrecognizedPattern => "UNRECOGNIZED_PATTERN",
            Self::MalformedNumber => "MALFORMED_NUMBER",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::UnknownMetric => "UNKNOWN_METRIC",
            Self::MetricNotAvailable => "METRIC_NOT_AVAILABLE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorSeverity {
    Error,
    Warning,
    Info,
}

/// A single problem found while parsing or validating an expression.
///
/// `line` and `column` are 1-based and point into the caller's original,
/// untrimmed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DslValidationError {
    pub code: ErrorCode,
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub severity: ErrorSeverity,
}

impl DslValidationError {
    /// Create an error-severity diagnostic.
    pub fn new(code: ErrorCode, message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            code,
            message: message.into(),
            line,
            column,
            severity: ErrorSeverity::Error,
        }
    }

    /// Render as `Line {line}, Column {column}: {message}`.
    pub fn formatted_message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DslValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Line {}, Column {}: {}",
            self.line, self.column, self.message
        )
    }
}

/// Outcome of compiling a DSL expression.
///
/// Exactly one of success or failure holds. On success the referenced
/// metric set equals the identifiers written in the source expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Success {
        formula: Formula,
        referenced_metrics: BTreeSet<String>,
        source: String,
    },
    Failure {
        errors: Vec<DslValidationError>,
        source: String,
    },
}

impl ParseResult {
    pub(crate) fn failure(errors: Vec<DslValidationError>, source: impl Into<String>) -> Self {
        Self::Failure {
            errors,
            source: source.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn has_errors(&self) -> bool {
        !self.errors().is_empty()
    }

    /// Diagnostics in the order they were found; empty on success.
    pub fn errors(&self) -> &[DslValidationError] {
        match self {
            Self::Success { .. } => &[],
            Self::Failure { errors, .. } => errors,
        }
    }

    /// The compiled formula.
    ///
    /// # Panics
    ///
    /// Panics when called on a failed result. Check [`ParseResult::is_success`]
    /// or use [`ParseResult::try_formula`] first.
    pub fn formula(&self) -> &Formula {
        match self {
            Self::Success { formula, .. } => formula,
            Self::Failure { errors, .. } => panic!(
                "cannot get formula from failed parse result ({} error(s)); check errors first",
                errors.len()
            ),
        }
    }

    pub fn try_formula(&self) -> Option<&Formula> {
        match self {
            Self::Success { formula, .. } => Some(formula),
            Self::Failure { .. } => None,
        }
    }

    pub fn into_formula(self) -> Option<Formula> {
        match self {
            Self::Success { formula, .. } => Some(formula),
            Self::Failure { .. } => None,
        }
    }

    /// Metric identifiers written in the expression; empty on failure.
    pub fn referenced_metrics(&self) -> BTreeSet<String> {
        match self {
            Self::Success {
                referenced_metrics, ..
            } => referenced_metrics.clone(),
            Self::Failure { .. } => BTreeSet::new(),
        }
    }

    /// The expression text exactly as the caller supplied it.
    pub fn source(&self) -> &str {
        match self {
            Self::Success { source, .. } | Self::Failure { source, .. } => source,
        }
    }

    /// All diagnostics in a block suitable for direct display; empty on success.
    pub fn errors_as_string(&self) -> String {
        let errors = self.errors();
        if errors.is_empty() {
            return String::new();
        }
        let mut out = format!("DSL Validation Errors ({}):\n", errors.len());
        for error in errors {
            out.push_str("  - ");
            out.push_str(&error.formatted_message());
            out.push('\n');
        }
        out
    }
}
