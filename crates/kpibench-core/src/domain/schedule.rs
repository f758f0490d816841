//! Recurring benchmark schedules and the failure circuit breaker.
//!
//! A schedule counts run outcomes. After `max_consecutive_failures` failures
//! in a row (with `auto_disable_on_failure` set) it disables itself and stays
//! disabled until an operator calls [`ScheduleConfig::enable`]. Nothing here
//! decides when the next run fires; `next_run_at` is set by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{BenchmarkRun, RunStatus, TriggerType};
use crate::metrics::METRICS;
use crate::obs::{emit_schedule_auto_disabled, emit_schedule_run_recorded};

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

fn default_true() -> bool {
    true
}

fn default_max_consecutive_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_FAILURES
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub benchmark_id: String,
    pub agent_id: String,

    /// Stored for the external trigger; not interpreted here.
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_true")]
    pub auto_disable_on_failure: bool,

    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,

    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    run_count: u64,
    #[serde(default)]
    failure_count: u64,
    #[serde(default)]
    consecutive_failures: u32,
    #[serde(default)]
    last_run_id: Option<Uuid>,
    #[serde(default)]
    last_run_status: Option<RunStatus>,
    #[serde(default)]
    last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    next_run_at: Option<DateTime<Utc>>,
}

impl ScheduleConfig {
    /// Enabled schedule with zeroed counters and the default failure policy.
    pub fn new(
        name: impl Into<String>,
        benchmark_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            benchmark_id: benchmark_id.into(),
            agent_id: agent_id.into(),
            cron_expression: None,
            timezone: default_timezone(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            auto_disable_on_failure: true,
            created_by: None,
            created_at: Utc::now(),
            enabled: true,
            run_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_run_id: None,
            last_run_status: None,
            last_run_at: None,
            next_run_at: None,
        }
    }

    pub fn with_cron(mut self, cron_expression: impl Into<String>) -> Self {
        self.cron_expression = Some(cron_expression.into());
        self
    }

    pub fn with_failure_policy(mut self, max_consecutive_failures: u32, auto_disable_on_failure: bool) -> Self {
        self.max_consecutive_failures = max_consecutive_failures;
        self.auto_disable_on_failure = auto_disable_on_failure;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_run_id(&self) -> Option<Uuid> {
        self.last_run_id
    }

    pub fn last_run_status(&self) -> Option<RunStatus> {
        self.last_run_status
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.next_run_at
    }

    pub fn set_next_run_at(&mut self, next_run_at: Option<DateTime<Utc>>) {
        self.next_run_at = next_run_at;
    }

    /// Enabled and `next_run_at` has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|next| next <= now)
    }

    /// Operator re-enable. Clears the consecutive-failure streak so the
    /// next failure does not immediately trip the breaker again.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.consecutive_failures = 0;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// A PENDING scheduled run for this schedule's benchmark and agent.
    pub fn create_run(&self) -> BenchmarkRun {
        BenchmarkRun::new(
            self.benchmark_id.clone(),
            self.agent_id.clone(),
            TriggerType::Scheduled,
        )
        .with_user("scheduler")
        .with_schedule(self.id)
    }

    pub fn record_run_success(&mut self, run_id: Option<Uuid>) {
        self.record_run_success_at(run_id, Utc::now());
    }

    /// Count a success and reset the failure streak. `enabled` is untouched.
    pub fn record_run_success_at(&mut self, run_id: Option<Uuid>, now: DateTime<Utc>) {
        self.stamp_last_run(run_id, RunStatus::Completed, now);
        self.consecutive_failures = 0;
        emit_schedule_run_recorded(&self.id.to_string(), true, 0);
    }

    pub fn record_run_failure(&mut self, run_id: Option<Uuid>) -> bool {
        self.record_run_failure_at(run_id, Utc::now())
    }

    /// Count a failure and apply the circuit breaker.
    ///
    /// Returns `true` when this call disabled the schedule.
    pub fn record_run_failure_at(&mut self, run_id: Option<Uuid>, now: DateTime<Utc>) -> bool {
        self.stamp_last_run(run_id, RunStatus::Failed, now);
        self.failure_count = self.failure_count.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        emit_schedule_run_recorded(&self.id.to_string(), false, self.consecutive_failures);

        let trip = self.auto_disable_on_failure
            && self.consecutive_failures >= self.max_consecutive_failures;
        if !trip || !self.enabled {
            return false;
        }

        self.enabled = false;
        METRICS.inc_schedules_auto_disabled();
        emit_schedule_auto_disabled(&self.id.to_string(), self.consecutive_failures);
        true
    }

    /// Record a terminal run's outcome. COMPLETED counts as success, FAILED
    /// as failure; CANCELLED and non-terminal runs record nothing.
    ///
    /// Returns `true` when the outcome disabled the schedule.
    pub fn record_run_outcome(&mut self, run: &BenchmarkRun, now: DateTime<Utc>) -> bool {
        match run.status() {
            RunStatus::Completed => {
                self.record_run_success_at(Some(run.id), now);
                false
            }
            RunStatus::Failed => self.record_run_failure_at(Some(run.id), now),
            _ => false,
        }
    }

    fn stamp_last_run(&mut self, run_id: Option<Uuid>, status: RunStatus, now: DateTime<Utc>) {
        self.last_run_id = run_id;
        self.last_run_status = Some(status);
        self.last_run_at = Some(now);
        self.run_count = self.run_count.saturating_add(1);
    }
}
