//! Per-task execution state.
//!
//! A [`State`] is owned by exactly one task and mutated only through the
//! transition methods below, each of which advances `updated_at`. Phase
//! records live in a map, so every "first matching phase" query takes the
//! caller's phase ordering (normally [`Plan::phase_ids`](crate::plan::Plan::phase_ids))
//! instead of relying on map iteration order.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TaskStatus;

/// Prefix stored in [`PhaseState::error`] for skipped phases.
const SKIP_PREFIX: &str = "skipped: ";

/// Gate type recorded for [`State::skip_phase`].
pub const SKIP_GATE_TYPE: &str = "skip";

fn is_zero(n: &u64) -> bool {
    *n == 0
}

// ---------------------------------------------------------------------------
// TokenUsage
// ---------------------------------------------------------------------------

/// Token counters. `total_tokens` always equals `input_tokens + output_tokens`;
/// cache counters are informational and tracked on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cache_creation_input_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, input: u64, output: u64, cache_creation: u64, cache_read: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
        self.total_tokens += input + output;
        self.cache_creation_input_tokens += cache_creation;
        self.cache_read_input_tokens += cache_read;
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationDecision {
    Continue,
    Retry,
    Stop,
}

/// One validation verdict taken while a phase iterates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub iteration: u32,
    /// What was validated, e.g. `progress` or `criteria`.
    #[serde(rename = "type")]
    pub kind: String,
    pub decision: ValidationDecision,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Runtime record for one phase of one task.
///
/// `completed_at` is set exactly when `status` is completed or skipped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseState {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_history: Vec<ValidationEntry>,
    /// Agent session to resume when this phase runs again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl PhaseState {
    fn clear_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.error = None;
        self.completed_at = None;
        self.interrupted_at = None;
    }
}

/// Append-only audit record of a gate evaluation (or a skip).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub phase: String,
    pub gate_type: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Why an earlier phase is being re-run after a later one failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryContext {
    pub from_phase: String,
    pub to_phase: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context_file: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// The process presumed to be executing the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CostTracking {
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub phase_costs: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("phase '{0}' is not in the supplied phase order")]
    UnknownPhase(String),
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub current_iteration: u32,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gates: Vec<GateDecision>,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default)]
    pub cost: CostTracking,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_context: Option<RetryContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionInfo>,
}

impl State {
    /// Fresh pending state for `task_id`.
    pub fn new(task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            current_phase: None,
            current_iteration: 0,
            status: TaskStatus::Pending,
            started_at: Some(now),
            updated_at: now,
            completed_at: None,
            phases: BTreeMap::new(),
            gates: Vec::new(),
            tokens: TokenUsage::default(),
            cost: CostTracking::default(),
            error: None,
            retry_context: None,
            execution: None,
        }
    }

    fn touch(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.updated_at = now;
        now
    }

    fn phase_entry(&mut self, phase_id: &str) -> &mut PhaseState {
        self.phases.entry(phase_id.to_string()).or_default()
    }

    fn current_phase_state_mut(&mut self) -> Option<&mut PhaseState> {
        let id = self.current_phase.as_deref()?;
        self.phases.get_mut(id)
    }

    pub fn phase(&self, phase_id: &str) -> Option<&PhaseState> {
        self.phases.get(phase_id)
    }

    // -----------------------------------------------------------------------
    // Phase transitions
    // -----------------------------------------------------------------------

    pub fn start_phase(&mut self, phase_id: &str) {
        let now = self.touch();
        self.current_phase = Some(phase_id.to_string());
        self.status = TaskStatus::Running;

        let phase = self.phase_entry(phase_id);
        phase.status = TaskStatus::Running;
        phase.started_at = Some(now);
        phase.completed_at = None;
        tracing::debug!(task_id = %self.task_id, phase = phase_id, "phase started");
    }

    /// Mark a phase completed. Task-level status is left alone.
    pub fn complete_phase(&mut self, phase_id: &str, commit_sha: impl Into<String>) {
        let now = self.touch();
        let commit_sha = commit_sha.into();

        let phase = self.phase_entry(phase_id);
        phase.status = TaskStatus::Completed;
        phase.completed_at = Some(now);
        phase.commit_sha = (!commit_sha.is_empty()).then_some(commit_sha);
        tracing::debug!(task_id = %self.task_id, phase = phase_id, "phase completed");
    }

    /// Fail a phase and the task with it.
    pub fn fail_phase(&mut self, phase_id: &str, err: impl fmt::Display) {
        self.touch();
        let message = err.to_string();
        self.status = TaskStatus::Failed;
        self.error = Some(message.clone());

        let phase = self.phase_entry(phase_id);
        phase.status = TaskStatus::Failed;
        phase.completed_at = None;
        phase.error = Some(message);
        tracing::debug!(task_id = %self.task_id, phase = phase_id, "phase failed");
    }

    /// Mark a phase, and the task, as interrupted and resumable.
    pub fn interrupt_phase(&mut self, phase_id: &str) {
        let now = self.touch();
        self.status = TaskStatus::Interrupted;

        let phase = self.phase_entry(phase_id);
        phase.status = TaskStatus::Interrupted;
        phase.completed_at = None;
        phase.interrupted_at = Some(now);
        tracing::debug!(task_id = %self.task_id, phase = phase_id, "phase interrupted");
    }

    /// Skip a phase, recording the skip in the gate audit trail.
    pub fn skip_phase(&mut self, phase_id: &str, reason: &str) {
        let now = self.touch();

        let phase = self.phase_entry(phase_id);
        phase.status = TaskStatus::Skipped;
        phase.completed_at = Some(now);
        if !reason.is_empty() {
            phase.error = Some(format!("{SKIP_PREFIX}{reason}"));
        }
        tracing::debug!(task_id = %self.task_id, phase = phase_id, reason, "phase skipped");

        self.record_gate_decision(phase_id, SKIP_GATE_TYPE, true, reason);
    }

    pub fn increment_iteration(&mut self) {
        self.touch();
        self.current_iteration += 1;
        if let Some(phase) = self.current_phase_state_mut() {
            phase.iterations += 1;
        }
    }

    /// Add token usage to the task and, if one is set, the current phase.
    pub fn add_tokens(&mut self, input: u64, output: u64, cache_creation: u64, cache_read: u64) {
        self.touch();
        self.tokens.add(input, output, cache_creation, cache_read);
        if let Some(phase) = self.current_phase_state_mut() {
            phase.tokens.add(input, output, cache_creation, cache_read);
        }
    }

    /// Add spend to the task and, if one is set, the current phase.
    pub fn add_cost(&mut self, cost_usd: f64) {
        let now = self.touch();
        self.cost.total_cost_usd += cost_usd;
        self.cost.last_updated_at = Some(now);
        if let Some(phase) = self.current_phase.clone() {
            *self.cost.phase_costs.entry(phase).or_insert(0.0) += cost_usd;
        }
    }

    pub fn record_gate_decision(&mut self, phase: &str, gate_type: &str, approved: bool, reason: &str) {
        let now = self.touch();
        self.gates.push(GateDecision {
            phase: phase.to_string(),
            gate_type: gate_type.to_string(),
            approved,
            reason: reason.to_string(),
            timestamp: now,
        });
    }

    pub fn record_validation(&mut self, phase_id: &str, entry: ValidationEntry) {
        self.touch();
        self.phase_entry(phase_id).validation_history.push(entry);
    }

    pub fn last_validation(&self, phase_id: &str) -> Option<&ValidationEntry> {
        self.phases.get(phase_id)?.validation_history.last()
    }

    pub fn set_phase_session_id(&mut self, phase_id: &str, session_id: impl Into<String>) {
        self.touch();
        self.phase_entry(phase_id).session_id = Some(session_id.into());
    }

    pub fn phase_session_id(&self, phase_id: &str) -> Option<&str> {
        self.phases.get(phase_id)?.session_id.as_deref()
    }

    /// Mark the whole task completed.
    pub fn complete(&mut self) {
        let now = self.touch();
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
    }

    // -----------------------------------------------------------------------
    // Resets
    // -----------------------------------------------------------------------

    /// Put one phase back to pending for a retry. Commit SHA and iteration
    /// count are kept.
    pub fn reset_phase(&mut self, phase_id: &str) {
        self.touch();
        if let Some(phase) = self.phases.get_mut(phase_id) {
            phase.clear_for_retry();
        }
    }

    /// Reset `phase_id` and every phase after it in `order` to pending,
    /// leaving earlier phases untouched, and put the task back to pending.
    ///
    /// Nothing changes when `phase_id` is not part of `order`.
    pub fn reset_phases_from<I, S>(&mut self, phase_id: &str, order: I) -> Result<(), StateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let order: Vec<S> = order.into_iter().collect();
        let start = order
            .iter()
            .position(|id| id.as_ref() == phase_id)
            .ok_or_else(|| StateError::UnknownPhase(phase_id.to_string()))?;

        self.touch();
        for id in &order[start..] {
            if let Some(phase) = self.phases.get_mut(id.as_ref()) {
                phase.clear_for_retry();
            }
        }
        self.error = None;
        self.retry_context = None;
        self.status = TaskStatus::Pending;
        tracing::debug!(task_id = %self.task_id, from = phase_id, "phases reset");
        Ok(())
    }

    /// Return the task to its initial pending state.
    ///
    /// Token usage, cost, and the gate audit trail are historical records and
    /// survive the reset.
    pub fn reset(&mut self) {
        self.touch();
        for phase in self.phases.values_mut() {
            phase.clear_for_retry();
        }
        self.status = TaskStatus::Pending;
        self.current_phase = None;
        self.current_iteration = 0;
        self.completed_at = None;
        self.error = None;
        self.retry_context = None;
        self.execution = None;
        tracing::debug!(task_id = %self.task_id, "state reset");
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// First phase in `order` that is interrupted or still marked running.
    pub fn resume_phase<I, S>(&self, order: I) -> Option<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        order
            .into_iter()
            .find(|id| {
                self.phases
                    .get(id.as_ref())
                    .is_some_and(|p| p.status.is_resumable())
            })
            .map(|id| id.as_ref().to_string())
    }

    /// `true` for completed and skipped phases; neither is pending work.
    pub fn is_phase_completed(&self, phase_id: &str) -> bool {
        self.phases
            .get(phase_id)
            .is_some_and(|p| matches!(p.status, TaskStatus::Completed | TaskStatus::Skipped))
    }

    pub fn is_phase_skipped(&self, phase_id: &str) -> bool {
        self.phases
            .get(phase_id)
            .is_some_and(|p| p.status == TaskStatus::Skipped)
    }

    /// The reason given when the phase was skipped, if it was.
    pub fn skip_reason(&self, phase_id: &str) -> Option<&str> {
        let phase = self.phases.get(phase_id)?;
        if phase.status != TaskStatus::Skipped {
            return None;
        }
        let error = phase.error.as_deref()?;
        Some(error.strip_prefix(SKIP_PREFIX).unwrap_or(error))
    }

    // -----------------------------------------------------------------------
    // Retry context
    // -----------------------------------------------------------------------

    pub fn set_retry_context(
        &mut self,
        from_phase: &str,
        to_phase: &str,
        reason: &str,
        failure_output: &str,
        attempt: u32,
    ) {
        let now = self.touch();
        self.retry_context = Some(RetryContext {
            from_phase: from_phase.to_string(),
            to_phase: to_phase.to_string(),
            reason: reason.to_string(),
            failure_output: failure_output.to_string(),
            context_file: String::new(),
            attempt,
            timestamp: now,
        });
    }

    /// Attach a detailed context file to the active retry context, if any.
    pub fn set_retry_context_file(&mut self, context_file: &str) {
        if self.retry_context.is_none() {
            return;
        }
        self.touch();
        if let Some(ctx) = self.retry_context.as_mut() {
            ctx.context_file = context_file.to_string();
        }
    }

    pub fn clear_retry_context(&mut self) {
        self.touch();
        self.retry_context = None;
    }

    pub fn retry_context(&self) -> Option<&RetryContext> {
        self.retry_context.as_ref()
    }

    pub fn has_retry_context(&self) -> bool {
        self.retry_context.is_some()
    }

    // -----------------------------------------------------------------------
    // Execution tracking
    // -----------------------------------------------------------------------

    /// Record the executor process now running this task.
    ///
    /// The task's own `started_at` is only set when missing, so a resumed
    /// task keeps measuring from its original start.
    pub fn start_execution(&mut self, pid: u32, hostname: impl Into<String>) {
        let now = self.touch();
        self.execution = Some(ExecutionInfo {
            pid,
            hostname: hostname.into(),
            started_at: now,
            last_heartbeat: now,
        });
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        tracing::debug!(task_id = %self.task_id, pid, "execution started");
    }

    pub fn update_heartbeat(&mut self) {
        let now = self.touch();
        if let Some(exec) = self.execution.as_mut() {
            exec.last_heartbeat = now;
        }
    }

    pub fn clear_execution(&mut self) {
        self.touch();
        self.execution = None;
    }

    pub fn executor_pid(&self) -> Option<u32> {
        self.execution.as_ref().map(|e| e.pid)
    }

    /// Time since the task started; zero when no start time is recorded.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .and_then(|start| Utc::now().signed_duration_since(start).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn with_debug_logs(f: impl FnOnce()) -> String {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = logs.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn every_phase_transition_is_logged() {
        let text = with_debug_logs(|| {
            let mut s = State::new("TASK-LOG");
            s.start_phase("spec");
            s.complete_phase("spec", "abc123");
            s.skip_phase("review", "trivial change");
            s.start_phase("implement");
            s.fail_phase("implement", "boom");
            s.interrupt_phase("implement");
        });
        for msg in [
            "phase started",
            "phase completed",
            "phase skipped",
            "phase failed",
            "phase interrupted",
        ] {
            assert!(text.contains(msg), "missing {msg:?} in:\n{text}");
        }
        assert!(text.contains("phase=\"review\"") || text.contains("phase=review"));
        assert!(text.contains("task_id=TASK-LOG"));
    }

    #[test]
    fn new_state_is_pending() {
        let s = State::new("TASK-001");
        assert_eq!(s.status, TaskStatus::Pending);
        assert!(s.phases.is_empty());
        assert!(s.current_phase.is_none());
        assert!(s.started_at.is_some());
    }

    #[test]
    fn restart_clears_completed_at() {
        let mut s = State::new("TASK-001");
        s.start_phase("implement");
        s.complete_phase("implement", "abc");
        assert!(s.phases["implement"].completed_at.is_some());

        s.start_phase("implement");
        assert_eq!(s.phases["implement"].status, TaskStatus::Running);
        assert!(s.phases["implement"].completed_at.is_none());
    }

    #[test]
    fn empty_commit_sha_is_not_stored() {
        let mut s = State::new("TASK-001");
        s.complete_phase("spec", "");
        assert!(s.phases["spec"].commit_sha.is_none());
    }

    #[test]
    fn skip_reason_without_prefix_is_returned_verbatim() {
        let mut s = State::new("TASK-001");
        s.skip_phase("docs", "");
        assert_eq!(s.skip_reason("docs"), None);

        s.phases.get_mut("docs").unwrap().error = Some("manual".to_string());
        assert_eq!(s.skip_reason("docs"), Some("manual"));
    }

    #[test]
    fn cost_attributed_to_current_phase() {
        let mut s = State::new("TASK-001");
        s.add_cost(0.5);
        s.start_phase("implement");
        s.add_cost(1.25);
        assert!((s.cost.total_cost_usd - 1.75).abs() < f64::EPSILON);
        assert_eq!(s.cost.phase_costs.len(), 1);
        assert!((s.cost.phase_costs["implement"] - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn validation_history_tracks_last_entry() {
        let mut s = State::new("TASK-001");
        assert!(s.last_validation("implement").is_none());
        for (i, decision) in [ValidationDecision::Continue, ValidationDecision::Stop]
            .into_iter()
            .enumerate()
        {
            s.record_validation(
                "implement",
                ValidationEntry {
                    iteration: i as u32 + 1,
                    kind: "progress".to_string(),
                    decision,
                    reason: String::new(),
                    timestamp: Utc::now(),
                },
            );
        }
        let last = s.last_validation("implement").unwrap();
        assert_eq!(last.iteration, 2);
        assert_eq!(last.decision, ValidationDecision::Stop);
    }

    #[test]
    fn phase_session_ids() {
        let mut s = State::new("TASK-001");
        assert_eq!(s.phase_session_id("spec"), None);
        s.set_phase_session_id("spec", "sess-1");
        assert_eq!(s.phase_session_id("spec"), Some("sess-1"));
    }

    #[test]
    fn retry_context_file_needs_context() {
        let mut s = State::new("TASK-001");
        s.set_retry_context_file("/tmp/ctx.md");
        assert!(!s.has_retry_context());

        s.set_retry_context("review", "implement", "tests failed", "FAIL x", 1);
        s.set_retry_context_file("/tmp/ctx.md");
        let ctx = s.retry_context().unwrap();
        assert_eq!(ctx.context_file, "/tmp/ctx.md");
        assert_eq!(ctx.attempt, 1);

        s.clear_retry_context();
        assert!(s.retry_context().is_none());
    }

    #[test]
    fn unset_start_time_gives_zero_elapsed() {
        let mut s = State::new("TASK-001");
        s.started_at = None;
        assert_eq!(s.elapsed(), Duration::ZERO);
    }
}
