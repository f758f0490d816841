//! KPI formula DSL: tokenizer, metric registry, parser and service facade.

pub mod lexer;
pub mod parser;
pub mod registry;
pub mod result;
pub mod service;

pub use parser::KpiFormulaParser;
pub use registry::{MetricRegistry, DEFAULT_METRIC_KEYS};
pub use result::{DslValidationError, ErrorCode, ErrorSeverity, ParseResult};
pub use service::{detect_formula_type, KpiFormulaDslService};
