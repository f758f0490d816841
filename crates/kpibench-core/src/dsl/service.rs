//! Error-returning facade over [`KpiFormulaParser`] for KPI definitions.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::parser::KpiFormulaParser;
use super::result::ParseResult;
use crate::config::BenchmarkingConfig;
use crate::domain::error::DslError;
use crate::domain::kpi::{KpiSpecification, DSL_VERSION};
use crate::formula::{Formula, FormulaKind};

/// Formula type recorded when an expression starts with no known keyword.
pub const CUSTOM_FORMULA_TYPE: &str = "CUSTOM";

/// Builds formulas from DSL text and KPI specifications.
#[derive(Debug, Default)]
pub struct KpiFormulaDslService {
    parser: KpiFormulaParser,
}

impl KpiFormulaDslService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parser(parser: KpiFormulaParser) -> Self {
        Self { parser }
    }

    /// Service whose parser also knows the configured custom metric keys.
    pub fn from_config(config: &BenchmarkingConfig) -> Self {
        let service = Self::new();
        if !config.custom_metric_keys.is_empty() {
            service.register_custom_metric_keys(&config.custom_metric_keys);
        }
        service
    }

    pub fn parser(&self) -> &KpiFormulaParser {
        &self.parser
    }

    /// Parse an expression, turning diagnostics into [`DslError::Parse`].
    pub fn parse_formula(&self, expression: &str) -> Result<Formula, DslError> {
        debug!(expression, "parsing DSL formula");
        match self.parser.parse(expression) {
            ParseResult::Success { formula, .. } => Ok(formula),
            ParseResult::Failure { errors, .. } => {
                warn!(expression, errors = errors.len(), "DSL parsing failed");
                Err(DslError::Parse { errors })
            }
        }
    }

    pub fn validate_formula(&self, expression: &str) -> ParseResult {
        self.parser.validate(expression)
    }

    pub fn validate_formula_against_metrics<I, S>(&self, expression: &str, available_metrics: I) -> ParseResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parser.validate_against_metrics(expression, available_metrics)
    }

    /// Resolve the formula a KPI specification describes.
    ///
    /// DSL text wins, then a pre-built formula, then a default expression
    /// for the declared formula type. A specification with none of these is
    /// rejected.
    pub fn build_from_specification(&self, spec: &KpiSpecification) -> Result<Formula, DslError> {
        if let Some(text) = spec.dsl_text.as_deref().filter(|_| spec.has_dsl_text()) {
            return self.parse_formula(text);
        }
        if let Some(formula) = &spec.formula {
            return Ok(formula.clone());
        }
        match spec.formula_type.as_deref().map(str::trim) {
            Some(formula_type) if !formula_type.is_empty() => {
                let dsl = default_dsl_for_type(formula_type);
                debug!(formula_type, dsl, "no DSL text, using default for formula type");
                self.parse_formula(dsl)
            }
            _ => Err(DslError::InvalidSpecification(
                "specification has no DSL text, formula or formula type".to_string(),
            )),
        }
    }

    /// Validate `expression` and wrap it in a specification. The formula
    /// type is detected from the leading keyword when not supplied.
    pub fn create_specification(
        &self,
        expression: &str,
        formula_type: Option<&str>,
    ) -> Result<KpiSpecification, DslError> {
        let result = self.validate_formula(expression);
        if let ParseResult::Failure { errors, .. } = result {
            return Err(DslError::Parse { errors });
        }

        let formula_type = formula_type
            .map(str::to_string)
            .unwrap_or_else(|| detect_formula_type(expression).to_string());
        info!(expression, formula_type = %formula_type, "created KPI specification");
        Ok(KpiSpecification {
            formula_type: Some(formula_type),
            dsl_text: Some(expression.to_string()),
            dsl_version: Some(DSL_VERSION.to_string()),
            ..KpiSpecification::default()
        })
    }

    pub fn known_metric_keys(&self) -> BTreeSet<String> {
        self.parser.known_metric_keys()
    }

    pub fn register_custom_metric_keys<I, S>(&self, metric_keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let added = self.parser.register_metric_keys(metric_keys);
        info!(added, "registered custom metric keys");
        added
    }

    /// Reference text for the DSL, listing the metrics this service knows.
    pub fn syntax_help(&self) -> String {
        let metrics: Vec<String> = self.known_metric_keys().into_iter().collect();
        format!(
            "KPI Formula DSL Syntax\n\
             ======================\n\
             \n\
             Function names and metric names are case-insensitive.\n\
             \n\
             1. AVERAGE(metric1, metric2, ...)\n   \
                Arithmetic mean of the metrics that are present.\n   \
                Example: AVERAGE(ROUGE, BLEU, F1_SCORE)\n\
             \n\
             2. WEIGHTED_SUM(metric1: weight1, metric2: weight2, ...)\n   \
                Weighted sum; every metric must be present.\n   \
                Example: WEIGHTED_SUM(ROUGE: 0.6, BLEU: 0.4)\n\
             \n\
             3. MIN(metric1, metric2, ...)\n   \
                Smallest value among the metrics that are present.\n   \
                Example: MIN(ROUGE, BLEU)\n\
             \n\
             4. MAX(metric1, metric2, ...)\n   \
                Largest value among the metrics that are present.\n   \
                Example: MAX(ROUGE, BLEU)\n\
             \n\
             5. THRESHOLD(metric, value)\n   \
                1.0 if metric >= value, 0.0 otherwise.\n   \
                Example: THRESHOLD(ROUGE, 0.7)\n\
             \n\
             Available Metrics:\n\
             - {}\n\
             - Custom metrics can be registered at runtime.\n",
            metrics.join(", ")
        )
    }
}

/// Formula type named by the expression's leading keyword, or `CUSTOM`.
pub fn detect_formula_type(expression: &str) -> &'static str {
    let upper = expression.trim().to_uppercase();
    FormulaKind::ALL
        .into_iter()
        .find(|kind| upper.starts_with(kind.as_str()))
        .map_or(CUSTOM_FORMULA_TYPE, |kind| kind.as_str())
}

/// Default expression for a formula type name with no DSL text.
pub fn default_dsl_for_type(formula_type: &str) -> &'static str {
    match formula_type.to_uppercase().as_str() {
        "WEIGHTED_SUM" => "WEIGHTED_SUM(ROUGE: 0.5, BLEU: 0.5)",
        "THRESHOLD" => "THRESHOLD(ROUGE, 0.7)",
        _ => "AVERAGE(ROUGE, BLEU)",
    }
}
