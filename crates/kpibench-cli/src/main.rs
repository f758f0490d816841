//! KPI Bench CLI
//!
//! The `kpibench` command compiles and evaluates KPI formulas and runs
//! benchmarks over recorded trace results.
//!
//! ## Commands
//!
//! - `parse`: Compile a formula and show its structure
//! - `validate`: Check a formula, optionally against the metrics a pipeline produces
//! - `eval`: Evaluate a formula against metric values
//! - `metrics`: List known metric names
//! - `syntax`: Print the formula language reference
//! - `run`: Execute a benchmark over a results file

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kpibench_core::config::split_list;
use kpibench_core::metrics::METRICS;
use kpibench_core::{
    render_run_summary_md, write_run_summary_json, AlertConfig, Benchmark, BenchmarkOrchestrator,
    BenchmarkResult, BenchmarkRun, BenchmarkingConfig, Formula, KpiFormulaDslService,
    ParseResult, RunStatus, RunSummaryArtifact, StaticMetricSource, TriggerType,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "kpibench")]
#[command(author = "Stevedores Org")]
#[command(version = kpibench_core::VERSION)]
#[command(about = "KPI formulas and benchmark runs for agent repositories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Output format for command results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Benchmarking config as JSON (default: KPIBENCH_* environment variables)
    #[arg(long, global = true, env = "KPIBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Extra metric names to register, comma-separated
    #[arg(long, global = true)]
    register: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a formula and show its structure
    Parse {
        /// Formula expression, e.g. "AVERAGE(ROUGE, BLEU)"
        expression: String,
    },

    /// Validate a formula
    Validate {
        /// Formula expression
        expression: String,

        /// Metrics the pipeline currently produces, comma-separated
        #[arg(long)]
        available: Option<String>,
    },

    /// Evaluate a formula against metric values
    Eval {
        /// Formula expression
        expression: String,

        /// Metric value as NAME=VALUE (repeatable)
        #[arg(short, long = "metric", value_name = "NAME=VALUE")]
        metrics: Vec<String>,
    },

    /// List known metric names
    Metrics,

    /// Print the formula language reference
    Syntax,

    /// Execute a benchmark over recorded trace results
    Run {
        /// Benchmark definition (JSON)
        #[arg(long)]
        benchmark: PathBuf,

        /// Per-trace results with metric snapshots (JSON array)
        #[arg(long)]
        results: PathBuf,

        /// Alert rules (JSON array)
        #[arg(long)]
        alerts: Option<PathBuf>,

        /// Agent under test
        #[arg(long, default_value = "default")]
        agent: String,

        /// Write run_summary.json to this path
        #[arg(long)]
        summary: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    kpibench_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref(), cli.register.as_deref())?;
    let service = KpiFormulaDslService::from_config(&config);

    let result = match cli.command {
        Commands::Parse { expression } => cmd_parse(&service, &expression, cli.format),
        Commands::Validate {
            expression,
            available,
        } => cmd_validate(&service, &expression, available.as_deref(), cli.format),
        Commands::Eval {
            expression,
            metrics,
        } => cmd_eval(&service, &expression, &metrics, cli.format),
        Commands::Metrics => cmd_metrics(&service, cli.format),
        Commands::Syntax => {
            println!("{}", service.syntax_help());
            Ok(())
        }
        Commands::Run {
            benchmark,
            results,
            alerts,
            agent,
            summary,
        } => {
            cmd_run(
                config,
                service,
                &RunArgs {
                    benchmark: &benchmark,
                    results: &results,
                    alerts: alerts.as_deref(),
                    agent: &agent,
                    summary: summary.as_deref(),
                },
                cli.format,
            )
            .await
        }
    };

    METRICS.flush();
    result
}

/// JSON file or the environment, plus any `--register` names.
fn load_config(path: Option<&Path>, register: Option<&str>) -> Result<BenchmarkingConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            BenchmarkingConfig::from_json_str(&raw)
                .with_context(|| format!("Invalid config in {:?}", path))?
        }
        None => BenchmarkingConfig::from_env().context("Invalid KPIBENCH_* environment")?,
    };
    if let Some(names) = register {
        config.custom_metric_keys.extend(split_list(names));
    }
    Ok(config)
}

#[derive(Debug, Serialize)]
struct ParseOutput {
    valid: bool,
    expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    formula: Option<Formula>,
    #[serde(skip_serializing_if = "Option::is_none")]
    canonical: Option<String>,
    referenced_metrics: BTreeSet<String>,
    errors: Vec<String>,
}

impl From<&ParseResult> for ParseOutput {
    fn from(result: &ParseResult) -> Self {
        let formula = result.try_formula().cloned();
        Self {
            valid: result.is_success(),
            expression: result.source().to_string(),
            canonical: formula.as_ref().map(Formula::to_dsl),
            formula,
            referenced_metrics: result.referenced_metrics(),
            errors: result
                .errors()
                .iter()
                .map(|e| format!("[{}] {}", e.code, e.formatted_message()))
                .collect(),
        }
    }
}

fn render_parse_output(output: &ParseOutput, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(output)?);
    }

    let mut out = String::new();
    if output.valid {
        out.push_str("✓ Valid formula\n");
        if let Some(canonical) = &output.canonical {
            out.push_str(&format!("  Canonical: {}\n", canonical));
        }
        let metrics: Vec<&str> = output.referenced_metrics.iter().map(String::as_str).collect();
        out.push_str(&format!("  Metrics:   {}\n", metrics.join(", ")));
    } else {
        out.push_str(&format!("✗ Invalid formula ({} errors)\n", output.errors.len()));
        for error in &output.errors {
            out.push_str(&format!("  - {}\n", error));
        }
    }
    Ok(out)
}

fn report_parse(result: &ParseResult, format: OutputFormat) -> Result<()> {
    let output = ParseOutput::from(result);
    print!("{}", render_parse_output(&output, format)?);
    if output.valid {
        Ok(())
    } else {
        Err(anyhow!("formula is invalid"))
    }
}

fn cmd_parse(service: &KpiFormulaDslService, expression: &str, format: OutputFormat) -> Result<()> {
    let result = service.parser().parse(expression);
    report_parse(&result, format)
}

fn cmd_validate(
    service: &KpiFormulaDslService,
    expression: &str,
    available: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let result = match available {
        Some(list) => service.validate_formula_against_metrics(expression, split_list(list)),
        None => service.validate_formula(expression),
    };
    report_parse(&result, format)
}

/// Parse `NAME=VALUE` pairs. Names are kept as given; formula metric names
/// are uppercase, so lowercase input will not match.
fn parse_metric_values(pairs: &[String]) -> Result<HashMap<String, f64>> {
    let mut values = HashMap::with_capacity(pairs.len());
    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{}'", pair))?;
        let value: f64 = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for metric '{}': '{}'", name, raw))?;
        values.insert(name.trim().to_string(), value);
    }
    Ok(values)
}

#[derive(Debug, Serialize)]
struct EvalOutput {
    formula: String,
    score: f64,
}

fn evaluate_expression(
    service: &KpiFormulaDslService,
    expression: &str,
    pairs: &[String],
) -> Result<EvalOutput> {
    let formula = service.parse_formula(expression)?;
    let values = parse_metric_values(pairs)?;
    let score = formula
        .evaluate(&values)
        .with_context(|| format!("Failed to evaluate {}", formula))?;
    Ok(EvalOutput {
        formula: formula.to_dsl(),
        score,
    })
}

fn cmd_eval(
    service: &KpiFormulaDslService,
    expression: &str,
    pairs: &[String],
    format: OutputFormat,
) -> Result<()> {
    let output = evaluate_expression(service, expression, pairs)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => println!("{} = {}", output.formula, output.score),
    }
    Ok(())
}

fn cmd_metrics(service: &KpiFormulaDslService, format: OutputFormat) -> Result<()> {
    let keys = service.known_metric_keys();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&keys)?),
        OutputFormat::Text => {
            for key in keys {
                println!("{}", key);
            }
        }
    }
    Ok(())
}

struct RunArgs<'a> {
    benchmark: &'a Path,
    results: &'a Path,
    alerts: Option<&'a Path>,
    agent: &'a str,
    summary: Option<&'a Path>,
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

async fn execute_run(
    config: BenchmarkingConfig,
    service: KpiFormulaDslService,
    args: &RunArgs<'_>,
) -> Result<RunSummaryArtifact> {
    let benchmark: Benchmark = read_json_file(args.benchmark)?;
    let results: Vec<BenchmarkResult> = read_json_file(args.results)?;
    let mut alerts: Vec<AlertConfig> = match args.alerts {
        Some(path) => read_json_file(path)?,
        None => Vec::new(),
    };

    let orchestrator = BenchmarkOrchestrator::new(Arc::new(StaticMetricSource::new(results)), config)
        .with_dsl_service(service);
    let mut run = BenchmarkRun::new(benchmark.id.clone(), args.agent, TriggerType::Manual)
        .with_user("cli");

    let report = orchestrator
        .execute(&mut run, &benchmark, &mut alerts)
        .await
        .context("Failed to execute benchmark run")?;
    let artifact = RunSummaryArtifact::from_report(&report);

    if let Some(path) = args.summary {
        write_run_summary_json(path, &artifact)?;
        info!(path = ?path, "wrote run summary");
    }
    Ok(artifact)
}

async fn cmd_run(
    config: BenchmarkingConfig,
    service: KpiFormulaDslService,
    args: &RunArgs<'_>,
    format: OutputFormat,
) -> Result<()> {
    let artifact = execute_run(config, service, args).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&artifact)?),
        OutputFormat::Text => print!("{}", render_run_summary_md(&artifact)),
    }

    if artifact.status == RunStatus::Failed {
        return Err(anyhow!(
            "run {} failed: {}",
            artifact.run_id,
            artifact.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}
