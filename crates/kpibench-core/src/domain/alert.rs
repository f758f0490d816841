//! KPI alert rules and their evaluation.
//!
//! Only deciding whether an alert fires lives here. Delivering the
//! notification is up to whoever consumes the returned [`TriggeredAlert`]s.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::kpi::KpiHistory;
use crate::obs::emit_alert_triggered;

/// Tolerance for `EQUALS` / `NOT_EQUALS`.
pub const EQUALITY_EPSILON: f64 = 1e-4;

pub const DEFAULT_COOLDOWN_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCondition {
    LessThan,
    GreaterThan,
    Equals,
    NotEquals,
    /// Needs a value history; never fires from a single value.
    PercentageDrop,
    /// Needs a value history; never fires from a single value.
    PercentageRise,
    /// Needs a value history; never fires from a single value.
    AnomalyDetected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

fn default_true() -> bool {
    true
}

fn default_cooldown() -> u32 {
    DEFAULT_COOLDOWN_MINUTES
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub benchmark_id: Option<String>,
    pub kpi_name: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: u32,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl AlertConfig {
    pub fn new(
        name: impl Into<String>,
        kpi_name: impl Into<String>,
        condition: AlertCondition,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            benchmark_id: None,
            kpi_name: kpi_name.into(),
            condition,
            threshold,
            severity,
            enabled: true,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            last_triggered_at: None,
        }
    }

    pub fn for_benchmark(mut self, benchmark_id: impl Into<String>) -> Self {
        self.benchmark_id = Some(benchmark_id.into());
        self
    }

    pub fn check_condition(&self, value: f64) -> bool {
        match self.condition {
            AlertCondition::LessThan => value < self.threshold,
            AlertCondition::GreaterThan => value > self.threshold,
            AlertCondition::Equals => (value - self.threshold).abs() < EQUALITY_EPSILON,
            AlertCondition::NotEquals => (value - self.threshold).abs() >= EQUALITY_EPSILON,
            AlertCondition::PercentageDrop
            | AlertCondition::PercentageRise
            | AlertCondition::AnomalyDetected => false,
        }
    }

    pub fn is_in_cooldown_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered_at {
            Some(last) => now < last + Duration::minutes(i64::from(self.cooldown_minutes)),
            None => false,
        }
    }

    pub fn mark_triggered_at(&mut self, now: DateTime<Utc>) {
        self.last_triggered_at = Some(now);
    }

    fn applies_to(&self, history: &KpiHistory) -> bool {
        self.kpi_name == history.kpi_name
            && self
                .benchmark_id
                .as_deref()
                .map_or(true, |b| b == history.benchmark_id)
    }
}

/// An alert that fired for a specific KPI value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggeredAlert {
    pub alert_id: Uuid,
    pub alert_name: String,
    pub kpi_name: String,
    pub value: f64,
    pub threshold: f64,
    pub condition: AlertCondition,
    pub severity: Severity,
    pub run_id: Option<Uuid>,
    pub triggered_at: DateTime<Utc>,
}

/// Fire every enabled, non-cooling alert whose KPI matches a history entry
/// and whose condition holds. Fired alerts are marked triggered at `now`,
/// which puts them in cooldown for later entries in the same call.
pub fn evaluate_alerts(
    alerts: &mut [AlertConfig],
    history: &[KpiHistory],
    now: DateTime<Utc>,
) -> Vec<TriggeredAlert> {
    let mut fired = Vec::new();
    for entry in history {
        for alert in alerts.iter_mut() {
            if !alert.enabled || !alert.applies_to(entry) {
                continue;
            }
            if alert.is_in_cooldown_at(now) {
                debug!(alert = %alert.name, "alert in cooldown, skipping");
                continue;
            }
            if !alert.check_condition(entry.value) {
                continue;
            }

            alert.mark_triggered_at(now);
            emit_alert_triggered(&alert.name, &entry.kpi_name, entry.value, alert.threshold);
            fired.push(TriggeredAlert {
                alert_id: alert.id,
                alert_name: alert.name.clone(),
                kpi_name: entry.kpi_name.clone(),
                value: entry.value,
                threshold: alert.threshold,
                condition: alert.condition,
                severity: alert.severity,
                run_id: entry.run_id,
                triggered_at: now,
            });
        }
    }
    fired
}
