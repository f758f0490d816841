//! Benchmarking configuration.
//!
//! Defaults match the stock failure policy. Values can be overridden from
//! environment variables or a JSON document where missing fields keep their
//! defaults.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::{KpiError, Result};
use crate::domain::schedule::DEFAULT_MAX_CONSECUTIVE_FAILURES;

pub const ENV_MAX_RETRIES: &str = "KPIBENCH_MAX_RETRIES";
pub const ENV_MAX_CONSECUTIVE_FAILURES: &str = "KPIBENCH_MAX_CONSECUTIVE_FAILURES";
pub const ENV_AUTO_DISABLE: &str = "KPIBENCH_AUTO_DISABLE";
pub const ENV_CUSTOM_METRICS: &str = "KPIBENCH_CUSTOM_METRICS";
pub const ENV_FAIL_ON_KPI_ERROR: &str = "KPIBENCH_FAIL_ON_KPI_ERROR";

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BenchmarkingConfig {
    /// Retry ceiling for failed or cancelled runs.
    pub max_retries: u32,
    /// Stamped into schedules created from this config.
    pub max_consecutive_failures: u32,
    /// Stamped into schedules created from this config.
    pub auto_disable_on_failure: bool,
    /// Extra metric identifiers registered with the DSL parser.
    pub custom_metric_keys: Vec<String>,
    /// Fail the run when a KPI cannot be evaluated. When off, the KPI is
    /// skipped with a warning.
    pub fail_run_on_kpi_error: bool,
}

impl Default for BenchmarkingConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            auto_disable_on_failure: true,
            custom_metric_keys: Vec::new(),
            fail_run_on_kpi_error: true,
        }
    }
}

impl BenchmarkingConfig {
    /// Defaults overridden by the `KPIBENCH_*` environment variables.
    ///
    /// Reads:
    /// - KPIBENCH_MAX_RETRIES
    /// - KPIBENCH_MAX_CONSECUTIVE_FAILURES
    /// - KPIBENCH_AUTO_DISABLE (`true`/`false`)
    /// - KPIBENCH_CUSTOM_METRICS (comma-separated)
    /// - KPIBENCH_FAIL_ON_KPI_ERROR (`true`/`false`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`BenchmarkingConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_MAX_RETRIES) {
            config.max_retries = parse_var(ENV_MAX_RETRIES, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_CONSECUTIVE_FAILURES) {
            config.max_consecutive_failures = parse_var(ENV_MAX_CONSECUTIVE_FAILURES, &v)?;
        }
        if let Some(v) = lookup(ENV_AUTO_DISABLE) {
            config.auto_disable_on_failure = parse_var(ENV_AUTO_DISABLE, &v.to_lowercase())?;
        }
        if let Some(v) = lookup(ENV_CUSTOM_METRICS) {
            config.custom_metric_keys = split_list(&v);
        }
        if let Some(v) = lookup(ENV_FAIL_ON_KPI_ERROR) {
            config.fail_run_on_kpi_error = parse_var(ENV_FAIL_ON_KPI_ERROR, &v.to_lowercase())?;
        }
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| KpiError::Config(format!("invalid value for {key}: '{raw}'")))
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
