//! Benchmark run lifecycle.
//!
//! A run moves `PENDING -> RUNNING -> {COMPLETED | FAILED | CANCELLED}` and
//! never back. Lifecycle fields are private so the only way to change them
//! is through the transition methods, which reject illegal moves with
//! [`LifecycleError::InvalidTransition`] and leave the run untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::benchmark::BenchmarkResult;
use crate::domain::error::LifecycleError;

/// Status of a benchmark run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a run to be submitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Event,
    Webhook,
}

/// One execution attempt of an agent against a benchmark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkRun {
    pub id: Uuid,
    pub benchmark_id: String,
    pub agent_id: String,
    pub triggered_by: TriggerType,

    /// User or subsystem that submitted the run, if known.
    #[serde(default)]
    pub triggered_by_user: Option<String>,

    /// Schedule that fired this run, for scheduled runs.
    #[serde(default)]
    pub schedule_config_id: Option<Uuid>,

    /// Per-trace results collected during execution.
    #[serde(default)]
    pub results: Vec<BenchmarkResult>,

    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    traces_processed: Option<u64>,
    metrics_computed: Option<u64>,
    #[serde(default)]
    retry_count: u32,
}

impl BenchmarkRun {
    /// Create a new PENDING run.
    pub fn new(
        benchmark_id: impl Into<String>,
        agent_id: impl Into<String>,
        triggered_by: TriggerType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            benchmark_id: benchmark_id.into(),
            agent_id: agent_id.into(),
            triggered_by,
            triggered_by_user: None,
            schedule_config_id: None,
            results: Vec::new(),
            status: RunStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            traces_processed: None,
            metrics_computed: None,
            retry_count: 0,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.triggered_by_user = Some(user.into());
        self
    }

    pub fn with_schedule(mut self, schedule_id: Uuid) -> Self {
        self.schedule_config_id = Some(schedule_id);
        self
    }

    pub(crate) fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn traces_processed(&self) -> Option<u64> {
        self.traces_processed
    }

    pub fn metrics_computed(&self) -> Option<u64> {
        self.metrics_computed
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn reject(&self, action: &'static str) -> LifecycleError {
        LifecycleError::InvalidTransition {
            run_id: self.id,
            from: self.status,
            action,
        }
    }

    /// PENDING -> RUNNING. Stamps `started_at`.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.start_at(Utc::now())
    }

    pub fn start_at(&mut self, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if self.status != RunStatus::Pending {
            return Err(self.reject("start"));
        }
        self.status = RunStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// RUNNING -> COMPLETED. Stamps `completed_at` and the final counts.
    pub fn complete(&mut self, traces_processed: u64, metrics_computed: u64) -> Result<(), LifecycleError> {
        self.complete_at(traces_processed, metrics_computed, Utc::now())
    }

    pub fn complete_at(
        &mut self,
        traces_processed: u64,
        metrics_computed: u64,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if self.status != RunStatus::Running {
            return Err(self.reject("complete"));
        }
        self.status = RunStatus::Completed;
        self.completed_at = Some(now);
        self.traces_processed = Some(traces_processed);
        self.metrics_computed = Some(metrics_computed);
        Ok(())
    }

    /// PENDING or RUNNING -> FAILED. Stamps `completed_at` and the message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), LifecycleError> {
        self.fail_at(message, Utc::now())
    }

    pub fn fail_at(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if self.is_terminal() {
            return Err(self.reject("fail"));
        }
        self.status = RunStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some(message.into());
        Ok(())
    }

    /// PENDING or RUNNING -> CANCELLED. Stamps `completed_at`.
    pub fn cancel(&mut self) -> Result<(), LifecycleError> {
        self.cancel_at(Utc::now())
    }

    pub fn cancel_at(&mut self, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if self.is_terminal() {
            return Err(self.reject("cancel"));
        }
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Record interim counts while the run is in flight.
    pub fn update_progress(&mut self, traces_processed: u64, metrics_computed: u64) -> Result<(), LifecycleError> {
        if self.is_terminal() {
            return Err(self.reject("update progress of"));
        }
        self.traces_processed = Some(traces_processed);
        self.metrics_computed = Some(metrics_computed);
        Ok(())
    }

    /// Independent of status.
    pub fn increment_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// `completed_at - started_at` in milliseconds, or 0 unless both are set.
    pub fn duration_millis(&self) -> u64 {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
            }
            _ => 0,
        }
    }
}
