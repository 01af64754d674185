use std::collections::HashSet;
use std::process::Command;
use std::time::Duration;

use chrono::Utc;
use orc_core::orphan::{mark_as_interrupted, LivenessProbe, OrphanDetector, OrphanReason};
use orc_core::state::State;
use orc_core::types::TaskStatus;

struct FixedProbe(HashSet<u32>);

impl LivenessProbe for FixedProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.0.contains(&pid)
    }
}

fn detector(alive: &[u32]) -> OrphanDetector<FixedProbe> {
    OrphanDetector::new(FixedProbe(alive.iter().copied().collect()))
}

fn running(pid: u32) -> State {
    let mut s = State::new("TASK-001");
    s.start_phase("implement");
    s.start_execution(pid, "host");
    s
}

#[test]
fn only_running_states_are_checked() {
    let d = detector(&[]);
    for status in [
        TaskStatus::Pending,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Paused,
        TaskStatus::Interrupted,
    ] {
        let mut s = running(99);
        s.status = status;
        assert_eq!(d.check(&s), None, "{status}");
    }
}

#[test]
fn running_without_execution_is_orphaned() {
    let mut s = State::new("TASK-001");
    s.start_phase("implement");
    let reason = detector(&[]).check(&s).unwrap();
    assert_eq!(reason, OrphanReason::NoExecutionInfo);
    assert_eq!(
        reason.to_string(),
        "no execution info (legacy state or incomplete)"
    );
}

#[test]
fn zero_pid_counts_as_missing_execution_info() {
    // A liveness check would report pid 0 alive; the verdict must not reach it.
    let s = running(0);
    assert_eq!(detector(&[0]).check(&s), Some(OrphanReason::NoExecutionInfo));
    assert_eq!(detector(&[]).check(&s), Some(OrphanReason::NoExecutionInfo));
}

#[test]
fn live_pid_wins_over_stale_heartbeat() {
    let mut s = running(100);
    s.execution.as_mut().unwrap().last_heartbeat = Utc::now() - chrono::Duration::days(3);
    let d = detector(&[100]).with_stale_threshold(Duration::from_secs(1));
    assert_eq!(d.check(&s), None);
}

#[test]
fn dead_pid_with_fresh_heartbeat_is_orphaned() {
    let s = running(200);
    let reason = detector(&[]).check(&s).unwrap();
    assert_eq!(reason.to_string(), "executor process not running");
}

#[test]
fn dead_pid_with_stale_heartbeat_adds_context() {
    let mut s = running(200);
    s.execution.as_mut().unwrap().last_heartbeat = Utc::now() - chrono::Duration::minutes(6);
    let reason = detector(&[]).check(&s).unwrap();
    assert_eq!(
        reason.to_string(),
        "executor process not running (heartbeat stale)"
    );
}

#[cfg(unix)]
#[test]
fn reaped_child_pid_is_dead_for_os_probe() {
    let mut child = Command::new("true").spawn().expect("spawn true");
    let pid = child.id();
    child.wait().expect("wait for child");

    let s = running(pid);
    let reason = OrphanDetector::os().check(&s);
    assert_eq!(reason, Some(OrphanReason::ExecutorDead));
}

#[test]
fn own_process_is_never_orphaned() {
    let s = running(std::process::id());
    assert_eq!(OrphanDetector::os().check(&s), None);
}

#[test]
fn mark_as_interrupted_makes_state_resumable() {
    let mut s = running(200);
    mark_as_interrupted(&mut s);

    assert_eq!(s.status, TaskStatus::Interrupted);
    assert_eq!(s.phases["implement"].status, TaskStatus::Interrupted);
    assert!(s.execution.is_none());
    assert_eq!(
        s.resume_phase(["spec", "implement", "review"]).as_deref(),
        Some("implement")
    );
    assert_eq!(detector(&[]).check(&s), None);
}
