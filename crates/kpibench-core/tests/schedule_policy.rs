//! Schedule failure circuit breaker.

use chrono::{Duration, Utc};
use kpibench_core::{BenchmarkRun, RunStatus, ScheduleConfig, TriggerType};
use uuid::Uuid;

fn schedule() -> ScheduleConfig {
    ScheduleConfig::new("nightly", "bench-1", "agent-1").with_cron("0 0 * * *")
}

#[test]
fn defaults() {
    let s = schedule();
    assert!(s.enabled());
    assert_eq!(s.max_consecutive_failures, 3);
    assert!(s.auto_disable_on_failure);
    assert_eq!(s.timezone, "UTC");
    assert_eq!((s.run_count(), s.failure_count(), s.consecutive_failures()), (0, 0, 0));
}

#[test]
fn third_consecutive_failure_disables() {
    let mut s = schedule();
    assert!(!s.record_run_failure(Some(Uuid::new_v4())));
    assert!(!s.record_run_failure(Some(Uuid::new_v4())));
    assert!(s.enabled());

    let last = Uuid::new_v4();
    assert!(s.record_run_failure(Some(last)));
    assert!(!s.enabled());
    assert_eq!(s.consecutive_failures(), 3);
    assert_eq!(s.failure_count(), 3);
    assert_eq!(s.run_count(), 3);
    assert_eq!(s.last_run_id(), Some(last));
    assert_eq!(s.last_run_status(), Some(RunStatus::Failed));

    // Further failures keep counting but do not report a new disable.
    assert!(!s.record_run_failure(None));
    assert_eq!(s.consecutive_failures(), 4);
    assert!(!s.enabled());
}

#[test]
fn success_resets_streak_only() {
    let mut s = schedule();
    s.record_run_failure(None);
    s.record_run_failure(None);
    s.record_run_success(None);
    assert_eq!(s.consecutive_failures(), 0);
    assert_eq!(s.failure_count(), 2);
    assert_eq!(s.run_count(), 3);
    assert_eq!(s.last_run_status(), Some(RunStatus::Completed));

    s.record_run_failure(None);
    s.record_run_failure(None);
    assert!(s.enabled());
}

#[test]
fn success_never_re_enables() {
    let mut s = schedule().with_failure_policy(1, true);
    s.record_run_failure(None);
    assert!(!s.enabled());
    s.record_run_success(None);
    assert!(!s.enabled());
    assert_eq!(s.consecutive_failures(), 0);
}

#[test]
fn auto_disable_off_keeps_schedule_enabled() {
    let mut s = schedule().with_failure_policy(2, false);
    for _ in 0..5 {
        assert!(!s.record_run_failure(None));
    }
    assert!(s.enabled());
    assert_eq!(s.consecutive_failures(), 5);
}

#[test]
fn operator_enable_clears_streak() {
    let mut s = schedule().with_failure_policy(2, true);
    s.record_run_failure(None);
    s.record_run_failure(None);
    assert!(!s.enabled());

    s.enable();
    assert!(s.enabled());
    assert_eq!(s.consecutive_failures(), 0);
    assert!(!s.record_run_failure(None));
    assert!(s.enabled());
}

#[test]
fn outcome_follows_run_status() {
    let now = Utc::now();
    let mut s = schedule();

    let mut ok = s.create_run();
    assert_eq!(ok.triggered_by, TriggerType::Scheduled);
    assert_eq!(ok.schedule_config_id, Some(s.id));
    ok.start().expect("start");
    ok.complete(1, 1).expect("complete");
    assert!(!s.record_run_outcome(&ok, now));
    assert_eq!(s.last_run_id(), Some(ok.id));
    assert_eq!(s.last_run_at(), Some(now));

    let mut cancelled = s.create_run();
    cancelled.cancel().expect("cancel");
    s.record_run_outcome(&cancelled, now);
    assert_eq!(s.run_count(), 1);

    let pending = BenchmarkRun::new("bench-1", "agent-1", TriggerType::Scheduled);
    s.record_run_outcome(&pending, now);
    assert_eq!(s.run_count(), 1);

    let mut failed = s.create_run();
    failed.fail("boom").expect("fail");
    s.record_run_outcome(&failed, now);
    assert_eq!(s.consecutive_failures(), 1);
    assert_eq!(s.last_run_status(), Some(RunStatus::Failed));
}

#[test]
fn due_only_when_enabled_and_time_passed() {
    let now = Utc::now();
    let mut s = schedule();
    assert!(!s.is_due(now));

    s.set_next_run_at(Some(now - Duration::minutes(1)));
    assert!(s.is_due(now));

    s.set_next_run_at(Some(now + Duration::minutes(1)));
    assert!(!s.is_due(now));

    s.set_next_run_at(Some(now));
    s.disable();
    assert!(!s.is_due(now));
}

#[test]
fn legacy_record_without_counters_deserializes_with_defaults() {
    let raw = serde_json::json!({
        "id": Uuid::new_v4(),
        "name": "legacy",
        "benchmark_id": "bench-1",
        "agent_id": "agent-1",
        "created_at": Utc::now(),
    });
    let mut s: ScheduleConfig = serde_json::from_value(raw).expect("deserialize");
    assert!(s.enabled());
    assert_eq!(s.consecutive_failures(), 0);
    s.record_run_failure(None);
    assert_eq!(s.failure_count(), 1);
}
