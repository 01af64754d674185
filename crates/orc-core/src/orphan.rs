//! Orphan detection: a task marked running whose executor process is gone.
//!
//! Liveness is judged from the recorded executor PID only. A live PID keeps
//! the task alive no matter how old its heartbeat is; heartbeat age is only
//! reported as context once the process is known to be dead.

use std::fmt;
use std::time::Duration;

use chrono::Utc;

use crate::state::State;
use crate::types::TaskStatus;

/// Heartbeat age past which a dead executor's reason gets a staleness note.
pub const DEFAULT_STALE_HEARTBEAT: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// Liveness probes
// ---------------------------------------------------------------------------

/// Answers whether a process id currently names a running process.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

impl<P: LivenessProbe + ?Sized> LivenessProbe for &P {
    fn is_alive(&self, pid: u32) -> bool {
        (**self).is_alive(pid)
    }
}

impl<P: LivenessProbe + ?Sized> LivenessProbe for Box<P> {
    fn is_alive(&self, pid: u32) -> bool {
        (**self).is_alive(pid)
    }
}

/// Probes the local process table with `kill(pid, 0)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLivenessProbe;

#[cfg(unix)]
impl LivenessProbe for OsLivenessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs the permission and existence checks only.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(not(unix))]
impl LivenessProbe for OsLivenessProbe {
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

/// Hostname of this machine, or `"unknown"` if it cannot be read.
#[cfg(unix)]
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes for the whole call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "unknown".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(not(unix))]
pub fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string())
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanReason {
    /// Running, but no executor was ever recorded.
    NoExecutionInfo,
    ExecutorDead,
    /// Executor is dead and had also stopped heartbeating.
    ExecutorDeadStaleHeartbeat,
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrphanReason::NoExecutionInfo => "no execution info (legacy state or incomplete)",
            OrphanReason::ExecutorDead => "executor process not running",
            OrphanReason::ExecutorDeadStaleHeartbeat => {
                "executor process not running (heartbeat stale)"
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

pub struct OrphanDetector<P = OsLivenessProbe> {
    probe: P,
    stale_threshold: Duration,
}

impl OrphanDetector<OsLivenessProbe> {
    pub fn os() -> Self {
        Self::new(OsLivenessProbe)
    }
}

impl<P: LivenessProbe> OrphanDetector<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            stale_threshold: DEFAULT_STALE_HEARTBEAT,
        }
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// `Some(reason)` when `state` is running but its executor is gone.
    pub fn check(&self, state: &State) -> Option<OrphanReason> {
        if state.status != TaskStatus::Running {
            return None;
        }
        let Some(exec) = state.execution.as_ref() else {
            tracing::warn!(task_id = %state.task_id, "running task has no execution info");
            return Some(OrphanReason::NoExecutionInfo);
        };
        // PID 0 never names an executor; kill(0, 0) targets our own process group.
        if exec.pid == 0 {
            tracing::warn!(task_id = %state.task_id, "running task has no executor pid");
            return Some(OrphanReason::NoExecutionInfo);
        }
        if self.probe.is_alive(exec.pid) {
            return None;
        }

        let heartbeat_age = Utc::now()
            .signed_duration_since(exec.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let reason = if heartbeat_age > self.stale_threshold {
            OrphanReason::ExecutorDeadStaleHeartbeat
        } else {
            OrphanReason::ExecutorDead
        };
        tracing::warn!(
            task_id = %state.task_id,
            pid = exec.pid,
            heartbeat_age_secs = heartbeat_age.as_secs(),
            %reason,
            "orphaned task detected"
        );
        Some(reason)
    }
}

/// Turn an orphaned running state into a resumable interrupted one and drop
/// its executor record.
pub fn mark_as_interrupted(state: &mut State) {
    match state.current_phase.clone() {
        Some(phase) => state.interrupt_phase(&phase),
        None => {
            state.status = TaskStatus::Interrupted;
            state.updated_at = Utc::now();
        }
    }
    state.clear_execution();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
