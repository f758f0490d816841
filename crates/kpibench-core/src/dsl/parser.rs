//! Formula DSL compiler.
//!
//! Grammar (keywords and identifiers are case-insensitive; identifiers are
//! normalized to uppercase):
//!
//! ```text
//! AVERAGE(id, id, ...)
//! WEIGHTED_SUM(id: weight, id: weight, ...)
//! MIN(id, id, ...)
//! MAX(id, id, ...)
//! THRESHOLD(id, value)
//! ```
//!
//! The recognizer matches the leading keyword, splits the parenthesized
//! argument list on commas, and checks each argument's shape for that
//! keyword. Problems are accumulated so a caller sees every independent
//! error from one call.

use std::collections::BTreeSet;

use tracing::debug;

use super::lexer::{tokenize, Position, Token, TokenKind};
use super::registry::{normalize_metric_key, MetricRegistry};
use super::result::{DslValidationError, ErrorCode, ParseResult};
use crate::formula::{Formula, FormulaKind};
use crate::metrics::METRICS;
use crate::obs::emit_parse_failed;

const SUPPORTED_PATTERNS: &str = "Supported: AVERAGE, WEIGHTED_SUM, MIN, MAX, THRESHOLD";

/// Compiles formula expressions against an owned metric registry.
///
/// Parsing is safe to call from many threads at once, including while
/// other threads register metric keys.
#[derive(Debug, Default)]
pub struct KpiFormulaParser {
    registry: MetricRegistry,
}

/// The keyword and argument tokens of a recognized `KEYWORD( ... )` call.
struct Call<'a> {
    kind: FormulaKind,
    open: Position,
    close: Position,
    inner: &'a [Token],
}

/// One comma-separated argument. `pos` falls back to the delimiter that
/// ended it when the argument is empty.
struct Argument<'a> {
    tokens: &'a [Token],
    pos: Position,
}

/// A metric identifier as written, with where it was written.
struct MetricRef {
    name: String,
    pos: Position,
}

impl KpiFormulaParser {
    /// Parser seeded with the default metric set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: MetricRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Compile `expression` into a formula plus diagnostics. Never fails;
    /// every problem is reported in the returned [`ParseResult`].
    pub fn parse(&self, expression: &str) -> ParseResult {
        let result = self.compile(expression);
        match &result {
            ParseResult::Success { .. } => METRICS.inc_formulas_parsed(),
            ParseResult::Failure { errors, .. } => {
                METRICS.inc_parse_failures();
                emit_parse_failed(expression, errors.len());
            }
        }
        result
    }

    /// [`KpiFormulaParser::parse`] for callers holding an optional
    /// expression. `None` is an empty expression.
    pub fn parse_optional(&self, expression: Option<&str>) -> ParseResult {
        self.parse(expression.unwrap_or_default())
    }

    /// Same behavior as [`KpiFormulaParser::parse`].
    pub fn validate(&self, expression: &str) -> ParseResult {
        self.parse(expression)
    }

    /// Validate, then check that every referenced metric is among
    /// `available_metrics` (compared case-insensitively).
    ///
    /// This answers "does the pipeline currently produce these metrics",
    /// which is separate from the registry check done by `parse`.
    pub fn validate_against_metrics<I, S>(&self, expression: &str, available_metrics: I) -> ParseResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let result = self.validate(expression);
        if !result.is_success() {
            return result;
        }

        let available: BTreeSet<String> = available_metrics
            .into_iter()
            .map(|m| normalize_metric_key(m.as_ref()))
            .collect();
        let missing: Vec<String> = result
            .referenced_metrics()
            .into_iter()
            .filter(|m| !available.contains(m))
            .collect();

        if missing.is_empty() {
            return result;
        }

        let available_list = if available.is_empty() {
            "(none)".to_string()
        } else {
            available.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        let error = DslValidationError::new(
            ErrorCode::MetricNotAvailable,
            format!(
                "Metrics referenced but not available: {}. Available metrics: {}",
                missing.join(", "),
                available_list
            ),
            Position::START.line,
            Position::START.column,
        );
        ParseResult::failure(vec![error], expression)
    }

    /// Add metric names to the registry. Returns how many were new.
    pub fn register_metric_keys<I, S>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let added = self.registry.register(names);
        debug!(added, total = self.registry.len(), "registered metric keys");
        added
    }

    /// Snapshot of the known metric names.
    pub fn known_metric_keys(&self) -> BTreeSet<String> {
        self.registry.snapshot()
    }

    fn compile(&self, expression: &str) -> ParseResult {
        if expression.trim().is_empty() {
            return ParseResult::failure(
                vec![DslValidationError::new(
                    ErrorCode::EmptyExpression,
                    "DSL expression cannot be empty",
                    1,
                    1,
                )],
                expression,
            );
        }

        debug!(expression = %expression.trim(), "parsing DSL expression");
        let tokens = tokenize(expression);
        let call = match recognize_call(&tokens) {
            Ok(call) => call,
            Err(error) => return ParseResult::failure(vec![error], expression),
        };

        let args = split_arguments(call.inner, call.close);
        let mut errors = Vec::new();
        let mut refs = Vec::new();

        let formula = match call.kind {
            FormulaKind::Average | FormulaKind::Min | FormulaKind::Max => {
                build_metric_list(call.kind, call.open, &args, &mut refs, &mut errors)
            }
            FormulaKind::WeightedSum => build_weighted_sum(call.open, &args, &mut refs, &mut errors),
            FormulaKind::Threshold => build_threshold(call.open, &args, &mut refs, &mut errors),
        };

        self.check_known(&refs, &mut errors);

        match formula {
            Some(formula) if errors.is_empty() => ParseResult::Success {
                formula,
                referenced_metrics: refs.into_iter().map(|r| r.name).collect(),
                source: expression.to_string(),
            },
            _ => {
                errors.sort_by_key(|e| (e.line, e.column));
                ParseResult::failure(errors, expression)
            }
        }
    }

    /// One UNKNOWN_METRIC per distinct unregistered name, at its first use.
    fn check_known(&self, refs: &[MetricRef], errors: &mut Vec<DslValidationError>) {
        let known = self.registry.read();
        let mut reported = BTreeSet::new();
        for r in refs {
            if known.contains(&r.name) || !reported.insert(r.name.as_str()) {
                continue;
            }
            let known_list: Vec<&str> = known.iter().map(String::as_str).collect();
            errors.push(DslValidationError::new(
                ErrorCode::UnknownMetric,
                format!(
                    "Unknown metric '{}'. Known metrics: {}",
                    r.name,
                    known_list.join(", ")
                ),
                r.pos.line,
                r.pos.column,
            ));
        }
    }
}

fn unrecognized(pos: Position, detail: impl AsRef<str>) -> DslValidationError {
    DslValidationError::new(
        ErrorCode::UnrecognizedPattern,
        format!(
            "Unrecognized formula pattern: {}. {}",
            detail.as_ref(),
            SUPPORTED_PATTERNS
        ),
        pos.line,
        pos.column,
    )
}

fn invalid_argument(pos: Position, message: impl Into<String>) -> DslValidationError {
    DslValidationError::new(ErrorCode::InvalidArgument, message, pos.line, pos.column)
}

/// Match `KEYWORD ( ... )` with nothing after the closing parenthesis and
/// no nesting inside it.
fn recognize_call(tokens: &[Token]) -> Result<Call<'_>, DslValidationError> {
    let Some((head, rest)) = tokens.split_first() else {
        return Err(unrecognized(Position::START, "empty input"));
    };

    let kind = match &head.kind {
        TokenKind::Ident(word) => FormulaKind::from_keyword(word)
            .ok_or_else(|| unrecognized(head.pos, format!("unknown function '{word}'")))?,
        _ => {
            return Err(unrecognized(
                head.pos,
                format!("expected a function name, found {}", head.describe()),
            ))
        }
    };

    let open = match rest.first() {
        Some(t) if t.kind == TokenKind::LParen => t.pos,
        Some(t) => {
            return Err(unrecognized(
                t.pos,
                format!("expected '(' after {kind}, found {}", t.describe()),
            ))
        }
        None => return Err(unrecognized(head.pos, format!("expected '(' after {kind}"))),
    };

    let body = &rest[1..];
    let mut close_idx = None;
    for (i, tok) in body.iter().enumerate() {
        match tok.kind {
            TokenKind::RParen => {
                close_idx = Some(i);
                break;
            }
            TokenKind::LParen => {
                return Err(unrecognized(tok.pos, "nested expressions are not supported"))
            }
            TokenKind::Unexpected(c) => {
                return Err(unrecognized(tok.pos, format!("unexpected character '{c}'")))
            }
            _ => {}
        }
    }

    let Some(close_idx) = close_idx else {
        let last = body.last().map_or(open, |t| t.pos);
        return Err(unrecognized(last, "missing closing ')'"));
    };

    if let Some(trailing) = body.get(close_idx + 1) {
        return Err(unrecognized(
            trailing.pos,
            format!("unexpected {} after closing ')'", trailing.describe()),
        ));
    }

    Ok(Call {
        kind,
        open,
        close: body[close_idx].pos,
        inner: &body[..close_idx],
    })
}

/// Split argument tokens on commas. No tokens means no arguments.
fn split_arguments(inner: &[Token], close: Position) -> Vec<Argument<'_>> {
    if inner.is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut start = 0;
    for (i, tok) in inner.iter().enumerate() {
        if tok.kind == TokenKind::Comma {
            args.push(Argument::new(&inner[start..i], tok.pos));
            start = i + 1;
        }
    }
    args.push(Argument::new(&inner[start..], close));
    args
}

impl<'a> Argument<'a> {
    fn new(tokens: &'a [Token], fallback: Position) -> Self {
        let pos = tokens.first().map_or(fallback, |t| t.pos);
        Self { tokens, pos }
    }
}

/// Two tokens in one argument slot, as in `AVERAGE(ROUGE BLEU)`.
fn missing_comma(next: &Token) -> DslValidationError {
    invalid_argument(next.pos, format!("missing ',' before {}", next.describe()))
}

fn expect_identifier(arg: &Argument<'_>) -> Result<MetricRef, DslValidationError> {
    match arg.tokens {
        [] => Err(invalid_argument(arg.pos, "empty argument")),
        [Token {
            kind: TokenKind::Ident(name),
            pos,
        }] => Ok(MetricRef {
            name: name.clone(),
            pos: *pos,
        }),
        [Token {
            kind: TokenKind::Ident(name),
            ..
        }, Token {
            kind: TokenKind::Colon,
            ..
        }, ..] => Err(invalid_argument(
            arg.pos,
            format!("weight on '{name}' is only allowed in WEIGHTED_SUM"),
        )),
        [Token {
            kind: TokenKind::Ident(_),
            ..
        }, next, ..] => Err(missing_comma(next)),
        [first, ..] => Err(invalid_argument(
            arg.pos,
            format!("expected a metric identifier, found {}", first.describe()),
        )),
    }
}

fn parse_number(raw: &str, pos: Position, what: &str) -> Result<f64, DslValidationError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DslValidationError::new(
            ErrorCode::MalformedNumber,
            format!("{what} '{raw}' is not a valid decimal number"),
            pos.line,
            pos.column,
        )),
    }
}

/// A literal where a number is expected. Identifiers in that slot are
/// malformed numbers, not shape errors.
fn expect_number(arg: &Argument<'_>, what: &str) -> Result<f64, DslValidationError> {
    match arg.tokens {
        [] => Err(invalid_argument(arg.pos, format!("missing {what}"))),
        [Token {
            kind: TokenKind::Number(raw),
            pos,
        }] => parse_number(raw, *pos, what),
        [Token {
            kind: TokenKind::Ident(word),
            pos,
        }] => parse_number(word, *pos, what),
        [first, ..] => Err(invalid_argument(
            arg.pos,
            format!("expected {what}, found {}", first.describe()),
        )),
    }
}

fn build_metric_list(
    kind: FormulaKind,
    open: Position,
    args: &[Argument<'_>],
    refs: &mut Vec<MetricRef>,
    errors: &mut Vec<DslValidationError>,
) -> Option<Formula> {
    if args.is_empty() {
        errors.push(invalid_argument(
            open,
            format!("{kind} requires at least one metric"),
        ));
        return None;
    }

    let mut names = Vec::with_capacity(args.len());
    for arg in args {
        match expect_identifier(arg) {
            Ok(r) => {
                names.push(r.name.clone());
                refs.push(r);
            }
            Err(e) => errors.push(e),
        }
    }

    Some(match kind {
        FormulaKind::Average => Formula::Average { metrics: names },
        FormulaKind::Min => Formula::Min { metrics: names },
        _ => Formula::Max { metrics: names },
    })
}

fn build_weighted_sum(
    open: Position,
    args: &[Argument<'_>],
    refs: &mut Vec<MetricRef>,
    errors: &mut Vec<DslValidationError>,
) -> Option<Formula> {
    if args.is_empty() {
        errors.push(invalid_argument(
            open,
            "WEIGHTED_SUM requires at least one 'METRIC: weight' pair",
        ));
        return None;
    }

    let mut pairs = Vec::with_capacity(args.len());
    for arg in args {
        let (name_tok, weight_toks) = match arg.tokens {
            [name @ Token {
                kind: TokenKind::Ident(_),
                ..
            }, Token {
                kind: TokenKind::Colon,
                pos: colon,
            }, weight @ ..] => (name, Argument::new(weight, *colon)),
            [] => {
                errors.push(invalid_argument(arg.pos, "empty argument"));
                continue;
            }
            [first, rest @ ..] => {
                let error = match (&first.kind, rest.first()) {
                    (TokenKind::Ident(name), Some(next)) => invalid_argument(
                        next.pos,
                        format!("expected ':' after '{name}', found {}", next.describe()),
                    ),
                    _ => invalid_argument(
                        arg.pos,
                        format!("expected 'METRIC: weight', found {}", first.describe()),
                    ),
                };
                errors.push(error);
                if let TokenKind::Ident(name) = &first.kind {
                    refs.push(MetricRef {
                        name: name.clone(),
                        pos: first.pos,
                    });
                }
                continue;
            }
        };

        let TokenKind::Ident(name) = &name_tok.kind else {
            continue;
        };
        if pairs.iter().any(|(existing, _): &(String, f64)| existing == name) {
            errors.push(invalid_argument(
                name_tok.pos,
                format!("metric '{name}' is weighted more than once"),
            ));
        }
        refs.push(MetricRef {
            name: name.clone(),
            pos: name_tok.pos,
        });

        match expect_number(&weight_toks, &format!("weight for '{name}'")) {
            Ok(weight) => pairs.push((name.clone(), weight)),
            Err(e) => errors.push(e),
        }
    }

    Some(Formula::WeightedSum {
        weights: pairs.into_iter().collect(),
    })
}

fn build_threshold(
    open: Position,
    args: &[Argument<'_>],
    refs: &mut Vec<MetricRef>,
    errors: &mut Vec<DslValidationError>,
) -> Option<Formula> {
    if args.len() != 2 {
        errors.push(invalid_argument(
            open,
            format!(
                "THRESHOLD takes exactly two arguments (metric, value), found {}",
                args.len()
            ),
        ));
    }

    let metric = match args.first().map(expect_identifier) {
        Some(Ok(r)) => {
            let name = r.name.clone();
            refs.push(r);
            Some(name)
        }
        Some(Err(e)) => {
            errors.push(e);
            None
        }
        None => None,
    };

    let threshold = match args.get(1).map(|a| expect_number(a, "threshold")) {
        Some(Ok(v)) => Some(v),
        Some(Err(e)) => {
            errors.push(e);
            None
        }
        None => None,
    };

    Some(Formula::threshold(&metric?, threshold?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(result: &ParseResult) -> Vec<ErrorCode> {
        result.errors().iter().map(|e| e.code).collect()
    }

    #[test]
    fn test_parse_average() {
        let parser = KpiFormulaParser::new();
        let result = parser.parse("AVERAGE(ROUGE, BLEU)");
        assert!(result.is_success(), "{}", result.errors_as_string());
        assert_eq!(result.formula(), &Formula::average(["ROUGE", "BLEU"]));
        assert_eq!(
            result.referenced_metrics(),
            BTreeSet::from(["ROUGE".to_string(), "BLEU".to_string()])
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let parser = KpiFormulaParser::new();
        let result = parser.parse("  average( rouge ,bleu )  ");
        assert_eq!(result.formula(), &Formula::average(["ROUGE", "BLEU"]));
    }

    #[test]
    fn test_parse_weighted_sum() {
        let parser = KpiFormulaParser::new();
        let result = parser.parse("WEIGHTED_SUM(ROUGE: 0.6, BLEU:0.4)");
        assert_eq!(
            result.formula(),
            &Formula::weighted_sum([("ROUGE", 0.6), ("BLEU", 0.4)])
        );
    }

    #[test]
    fn test_parse_min_max_threshold() {
        let parser = KpiFormulaParser::new();
        assert_eq!(
            parser.parse("MIN(ROUGE, BLEU)").formula(),
            &Formula::min(["ROUGE", "BLEU"])
        );
        assert_eq!(
            parser.parse("max(recall)").formula(),
            &Formula::max(["RECALL"])
        );
        let threshold = parser.parse("THRESHOLD(ROUGE, 0.7)");
        assert_eq!(threshold.formula(), &Formula::threshold("ROUGE", 0.7));
        assert_eq!(
            threshold.referenced_metrics(),
            BTreeSet::from(["ROUGE".to_string()])
        );
    }

    #[test]
    fn test_empty_expressions() {
        let parser = KpiFormulaParser::new();
        for input in ["", "   ", "\n\t"] {
            let result = parser.parse(input);
            assert_eq!(codes(&result), vec![ErrorCode::EmptyExpression]);
        }
        assert!(!parser.parse_optional(None).is_success());
    }

    #[test]
    fn test_unrecognized_patterns() {
        let parser = KpiFormulaParser::new();
        for input in [
            "MEDIAN(ROUGE, BLEU)",
            "ROUGE + BLEU",
            "AVERAGE ROUGE, BLEU",
            "AVERAGE(ROUGE, BLEU",
            "AVERAGE(ROUGE, BLEU) extra",
            "AVERAGE(MAX(ROUGE), BLEU)",
            "AVERAGE(ROUGE * BLEU)",
            "0.5",
        ] {
            let result = parser.parse(input);
            assert_eq!(
                codes(&result),
                vec![ErrorCode::UnrecognizedPattern],
                "input: {input}"
            );
        }
    }

    #[test]
    fn test_unknown_metric_reported_with_position() {
        let parser = KpiFormulaParser::new();
        let result = parser.parse("AVERAGE(ROUGE, UNKNOWN_METRIC)");
        assert_eq!(codes(&result), vec![ErrorCode::UnknownMetric]);
        let err = &result.errors()[0];
        assert!(err.message.contains("UNKNOWN_METRIC"));
        assert_eq!((err.line, err.column), (1, 16));
    }

    #[test]
    fn test_collects_every_independent_error() {
        let parser = KpiFormulaParser::new();
        let result = parser.parse("WEIGHTED_SUM(FOO: 0.5, BLEU: x1, BAR: 0.2.1)");
        assert_eq!(
            codes(&result),
            vec![
                ErrorCode::UnknownMetric,
                ErrorCode::MalformedNumber,
                ErrorCode::UnknownMetric,
                ErrorCode::MalformedNumber,
            ]
        );
    }

    #[test]
    fn test_unknown_metric_reported_once_per_name() {
        let parser = KpiFormulaParser::new();
        let result = parser.parse("MAX(FOO, foo, ROUGE)");
        assert_eq!(codes(&result), vec![ErrorCode::UnknownMetric]);
    }

    #[test]
    fn test_malformed_threshold_value() {
        let parser = KpiFormulaParser::new();
        let result = parser.parse("THRESHOLD(ROUGE, high)");
        assert_eq!(codes(&result), vec![ErrorCode::MalformedNumber]);
        assert_eq!(result.errors()[0].column, 18);
    }

    #[test]
    fn test_invalid_arguments() {
        let parser = KpiFormulaParser::new();
        let cases = [
            "AVERAGE()",
            "AVERAGE(ROUGE,)",
            "MIN(ROUGE, 0.5)",
            "MAX(ROUGE: 0.5)",
            "WEIGHTED_SUM(ROUGE)",
            "WEIGHTED_SUM(ROUGE:)",
            "WEIGHTED_SUM(ROUGE: 0.5, ROUGE: 0.5)",
            "THRESHOLD(ROUGE)",
            "THRESHOLD(ROUGE, 0.5, 0.7)",
        ];
        for input in cases {
            let result = parser.parse(input);
            assert!(!result.is_success(), "input should fail: {input}");
            assert!(
                codes(&result).contains(&ErrorCode::InvalidArgument),
                "input: {input}, got {:?}",
                codes(&result)
            );
        }
    }

    #[test]
    fn test_adjacent_identifiers_report_missing_comma() {
        let parser = KpiFormulaParser::new();

        let result = parser.parse("AVERAGE(ROUGE BLEU)");
        assert_eq!(codes(&result), vec![ErrorCode::InvalidArgument]);
        let err = &result.errors()[0];
        assert_eq!(err.column, 15);
        assert!(err.message.contains("missing ','"), "{}", err.message);
        assert!(err.message.contains("'BLEU'"), "{}", err.message);

        let dotted = parser.parse("AVERAGE(ROUGE.BLEU)");
        assert_eq!(codes(&dotted), vec![ErrorCode::InvalidArgument]);
        assert_eq!(dotted.errors()[0].column, 14);
        assert!(!dotted.errors()[0].message.contains("expected a metric identifier"));

        let weighted = parser.parse("WEIGHTED_SUM(ROUGE 0.5)");
        assert_eq!(codes(&weighted), vec![ErrorCode::InvalidArgument]);
        assert!(weighted.errors()[0].message.contains("expected ':' after 'ROUGE'"));
        assert_eq!(weighted.errors()[0].column, 20);
    }

    #[test]
    fn test_registration_enables_custom_metrics() {
        let parser = KpiFormulaParser::new();
        assert!(!parser.parse("AVERAGE(LATENCY_SCORE, ROUGE)").is_success());
        assert_eq!(parser.register_metric_keys(["latency_score"]), 1);
        assert!(parser.parse("AVERAGE(LATENCY_SCORE, ROUGE)").is_success());
        assert!(parser.known_metric_keys().contains("LATENCY_SCORE"));
    }

    #[test]
    fn test_validate_matches_parse() {
        let parser = KpiFormulaParser::new();
        for input in ["AVERAGE(ROUGE, BLEU)", "AVERAGE(NOPE)", ""] {
            assert_eq!(parser.parse(input), parser.validate(input));
        }
    }

    #[test]
    fn test_validate_against_available_metrics() {
        let parser = KpiFormulaParser::new();
        let ok = parser.validate_against_metrics("AVERAGE(ROUGE, BLEU)", ["rouge", "BLEU", "F1_SCORE"]);
        assert!(ok.is_success());

        let missing = parser.validate_against_metrics("AVERAGE(ROUGE, BLEU, RECALL)", ["ROUGE"]);
        assert_eq!(codes(&missing), vec![ErrorCode::MetricNotAvailable]);
        let message = &missing.errors()[0].message;
        assert!(message.contains("BLEU, RECALL"), "{message}");

        let unknown = parser.validate_against_metrics("AVERAGE(NOPE)", ["NOPE"]);
        assert_eq!(codes(&unknown), vec![ErrorCode::UnknownMetric]);
    }

    #[test]
    fn test_multiline_positions() {
        let parser = KpiFormulaParser::new();
        let result = parser.parse("AVERAGE(\n  ROUGE,\n  NOPE)");
        let err = &result.errors()[0];
        assert_eq!((err.line, err.column), (3, 3));
        assert!(err.to_string().starts_with("Line 3, Column 3: "));
    }

    #[test]
    fn test_to_dsl_reparses_to_same_formula() {
        let parser = KpiFormulaParser::new();
        let formula = Formula::weighted_sum([("ROUGE", 0.25), ("F1_SCORE", 0.75)]);
        let reparsed = parser.parse(&formula.to_dsl());
        assert_eq!(reparsed.formula(), &formula);
    }
}
