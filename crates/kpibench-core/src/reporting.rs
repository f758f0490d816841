use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::domain::alert::TriggeredAlert;
use crate::domain::run::RunStatus;
use crate::orchestrator::RunReport;

pub const RUN_SUMMARY_SCHEMA_VERSION: &str = "1.0";

/// One KPI line in the run summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KpiValueArtifact {
    pub name: String,
    pub value: f64,
    pub status: String,
    pub delta_from_baseline: Option<f64>,
}

/// Canonical run summary artifact written after a benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummaryArtifact {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub run_id: Uuid,
    pub benchmark_id: String,
    pub agent_id: String,
    pub status: RunStatus,
    pub duration_ms: u64,
    pub traces_processed: u64,
    pub metrics_computed: u64,
    pub metrics: BTreeMap<String, f64>,
    pub kpis: Vec<KpiValueArtifact>,
    pub triggered_alerts: Vec<TriggeredAlert>,
    pub skipped_kpis: Vec<String>,
    pub error: Option<String>,
}

impl RunSummaryArtifact {
    pub fn from_report(report: &RunReport) -> Self {
        let run = &report.run;
        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            run_id: run.id,
            benchmark_id: run.benchmark_id.clone(),
            agent_id: run.agent_id.clone(),
            status: run.status(),
            duration_ms: run.duration_millis(),
            traces_processed: run.traces_processed().unwrap_or(0),
            metrics_computed: run.metrics_computed().unwrap_or(0),
            metrics: report.aggregated_metrics.clone(),
            kpis: report
                .kpi_history
                .iter()
                .map(|h| KpiValueArtifact {
                    name: h.kpi_name.clone(),
                    value: h.value,
                    status: h.status.to_string(),
                    delta_from_baseline: h.delta_from_baseline,
                })
                .collect(),
            triggered_alerts: report.triggered_alerts.clone(),
            skipped_kpis: report.skipped_kpis.clone(),
            error: run.error_message().map(str::to_string),
        }
    }
}

/// Write run_summary.json in pretty JSON format.
pub fn write_run_summary_json(path: &Path, artifact: &RunSummaryArtifact) -> Result<()> {
    let content = serde_json::to_string_pretty(artifact).context("serialize run summary")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render markdown summary for a run.
pub fn render_run_summary_md(artifact: &RunSummaryArtifact) -> String {
    let mut out = String::new();
    out.push_str("# Benchmark Run Summary\n\n");
    out.push_str(&format!(
        "- run: `{}`\n- benchmark: {}\n- agent: {}\n- status: {}\n- duration: {} ms\n- traces: {}\n- metrics: {}\n",
        artifact.run_id,
        artifact.benchmark_id,
        artifact.agent_id,
        artifact.status,
        artifact.duration_ms,
        artifact.traces_processed,
        artifact.metrics_computed
    ));
    if let Some(error) = &artifact.error {
        out.push_str(&format!("- error: {}\n", error));
    }
    out.push('\n');

    if !artifact.kpis.is_empty() {
        out.push_str("## KPIs\n");
        out.push_str("| KPI | Value | Status |\n|---|---|---|\n");
        for kpi in &artifact.kpis {
            out.push_str(&format!(
                "| {} | {:.4} | {} |\n",
                kpi.name, kpi.value, kpi.status
            ));
        }
        out.push('\n');
    }

    if !artifact.skipped_kpis.is_empty() {
        out.push_str("## Skipped KPIs\n");
        for name in &artifact.skipped_kpis {
            out.push_str(&format!("- {}\n", name));
        }
        out.push('\n');
    }

    if !artifact.triggered_alerts.is_empty() {
        out.push_str("## Alerts\n");
        for alert in &artifact.triggered_alerts {
            out.push_str(&format!(
                "- {} ({:?}): {} = {:.4}, threshold {}\n",
                alert.alert_name, alert.severity, alert.kpi_name, alert.value, alert.threshold
            ));
        }
    }
    out
}
