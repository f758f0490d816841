//! Process-wide counters for parses, evaluations, runs and schedule trips.
//!
//! Increments are silent. [`Metrics::flush`] reports every value in one
//! `info!` event; the CLI calls it once per command.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared by every parser, orchestrator and schedule in the process.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Metrics {
    formulas_parsed: AtomicU64,
    parse_failures: AtomicU64,
    evaluations: AtomicU64,
    evaluation_failures: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    schedules_auto_disabled: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            formulas_parsed: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            evaluations: AtomicU64::new(0),
            evaluation_failures: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            schedules_auto_disabled: AtomicU64::new(0),
        }
    }

    counter!(inc_formulas_parsed, formulas_parsed, formulas_parsed);
    counter!(inc_parse_failures, parse_failures, parse_failures);
    counter!(inc_evaluations, evaluations, evaluations);
    counter!(inc_evaluation_failures, evaluation_failures, evaluation_failures);
    counter!(inc_runs_completed, runs_completed, runs_completed);
    counter!(inc_runs_failed, runs_failed, runs_failed);
    counter!(
        inc_schedules_auto_disabled,
        schedules_auto_disabled,
        schedules_auto_disabled
    );

    /// Log every counter in one event.
    pub fn flush(&self) {
        tracing::info!(
            event = "metrics.flush",
            formulas_parsed = self.formulas_parsed(),
            parse_failures = self.parse_failures(),
            evaluations = self.evaluations(),
            evaluation_failures = self.evaluation_failures(),
            runs_completed = self.runs_completed(),
            runs_failed = self.runs_failed(),
            schedules_auto_disabled = self.schedules_auto_disabled(),
        );
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.formulas_parsed,
            &self.parse_failures,
            &self.evaluations,
            &self.evaluation_failures,
            &self.runs_completed,
            &self.runs_failed,
            &self.schedules_auto_disabled,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_independent() {
        let m = Metrics::new();
        assert_eq!(m.formulas_parsed(), 0);
        m.inc_formulas_parsed();
        m.inc_formulas_parsed();
        assert_eq!(m.formulas_parsed(), 2);

        m.inc_parse_failures();
        assert_eq!(m.parse_failures(), 1);

        m.inc_runs_failed();
        m.inc_runs_failed();
        m.inc_runs_failed();
        assert_eq!(m.runs_failed(), 3);
        assert_eq!(m.runs_completed(), 0);
    }

    #[test]
    fn test_reset() {
        let m = Metrics::new();
        m.inc_evaluations();
        m.inc_evaluation_failures();
        m.inc_runs_completed();
        m.inc_schedules_auto_disabled();
        m.reset();
        assert_eq!(m.evaluations(), 0);
        assert_eq!(m.evaluation_failures(), 0);
        assert_eq!(m.runs_completed(), 0);
        assert_eq!(m.schedules_auto_disabled(), 0);
    }
}
