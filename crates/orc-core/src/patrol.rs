//! Maintenance sweep that turns orphaned running tasks into interrupted ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::orphan::{mark_as_interrupted, LivenessProbe, OrphanDetector};
use crate::storage::{PersistenceBackend, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedTask {
    pub task_id: String,
    pub reason: String,
    /// Phase a scheduler should resume, when the plan is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_phase: Option<String>,
}

/// Result of a single patrol sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatrolReport {
    /// Task states that were loaded and inspected.
    pub scanned: usize,
    pub orphaned: Vec<OrphanedTask>,
    /// States that exist but could not be read. Never aborts the sweep.
    pub load_failures: usize,
    /// Interrupted states that could not be written back.
    pub save_failures: usize,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
}

/// Runs orphan sweeps over every stored task.
pub struct Patrol<'a, P: LivenessProbe> {
    detector: &'a OrphanDetector<P>,
    dry_run: bool,
}

impl<'a, P: LivenessProbe> Patrol<'a, P> {
    pub fn new(detector: &'a OrphanDetector<P>) -> Self {
        Self {
            detector,
            dry_run: false,
        }
    }

    /// Report orphans without interrupting or saving them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Execute one sweep. Only listing the task ids can fail the sweep.
    pub fn run(&self, backend: &dyn PersistenceBackend) -> Result<PatrolReport, StorageError> {
        let now = Utc::now();
        debug!(dry_run = self.dry_run, "patrol sweep starting");

        let mut report = PatrolReport {
            scanned: 0,
            orphaned: Vec::new(),
            load_failures: 0,
            save_failures: 0,
            dry_run: self.dry_run,
            timestamp: now,
        };

        for task_id in backend.list_task_ids()? {
            let mut state = match backend.load_state(&task_id) {
                Ok(s) => s,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "failed to load state");
                    report.load_failures += 1;
                    continue;
                }
            };
            report.scanned += 1;

            let Some(reason) = self.detector.check(&state) else {
                continue;
            };

            let order = match backend.load_plan(&task_id) {
                Ok(plan) => Some(plan.phase_ids().into_iter().map(str::to_string).collect::<Vec<_>>()),
                Err(e) => {
                    debug!(task_id = %task_id, error = %e, "plan unavailable for resume lookup");
                    None
                }
            };

            if !self.dry_run {
                mark_as_interrupted(&mut state);
                if let Err(e) = backend.save_state(&state) {
                    warn!(task_id = %task_id, error = %e, "failed to save interrupted state");
                    report.save_failures += 1;
                    continue;
                }
                info!(task_id = %task_id, %reason, "orphaned task marked interrupted");
            }

            let resume_phase = match order {
                Some(order) if !self.dry_run => state.resume_phase(&order),
                _ => state.current_phase.clone(),
            };

            report.orphaned.push(OrphanedTask {
                task_id,
                reason: reason.to_string(),
                resume_phase,
            });
        }

        debug!(
            scanned = report.scanned,
            orphaned = report.orphaned.len(),
            load_failures = report.load_failures,
            save_failures = report.save_failures,
            "patrol sweep completed"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
