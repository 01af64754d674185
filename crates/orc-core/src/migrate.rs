//! Plan regeneration across template upgrades and task re-weighting.
//!
//! A regenerated plan always takes its phase list from the current template.
//! Phases whose id also appears in the old plan with status `completed` or
//! `skipped` keep that status and commit SHA; everything else starts over as
//! pending. Phases that only exist in the old plan are dropped.

use std::collections::HashMap;

use crate::plan::{Generator, Plan, PlanError};
use crate::staleness::{is_plan_stale, StaleReason};
use crate::types::{PhaseStatus, Task};

/// Reason reported by [`Generator::migrate_plan`] when there was no plan.
pub const NO_EXISTING_PLAN: &str = "no existing plan";

/// Outcome of [`Generator::regenerate_plan`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegenerateResult {
    pub new_plan: Plan,
    /// Phases whose completed/skipped status was carried over.
    pub preserved_phases: Vec<String>,
    /// Phases that start (again) as pending.
    pub reset_phases: Vec<String>,
}

/// Outcome of [`Generator::migrate_plan`].
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationResult {
    pub new_plan: Plan,
    pub old_phases: Vec<String>,
    pub new_phases: Vec<String>,
    pub preserved_count: usize,
    pub reset_count: usize,
    pub reason: String,
}

impl Generator<'_> {
    /// Rebuild `task`'s plan from the template for its current weight,
    /// carrying over terminal phase statuses from `old_plan`.
    ///
    /// Fails with [`PlanError::MigrationFailure`] when the template cannot be
    /// loaded; [`Plan::fallback`] is left to the caller.
    pub fn regenerate_plan(
        &self,
        task: &Task,
        old_plan: Option<&Plan>,
    ) -> Result<RegenerateResult, PlanError> {
        let template = self
            .load_template(&task.weight)
            .map_err(|source| PlanError::MigrationFailure {
                weight: task.weight.clone(),
                source,
            })?;
        let mut new_plan = Plan::from_template(task, &template);

        let Some(old_plan) = old_plan else {
            let reset_phases = new_plan.phases.iter().map(|p| p.id.clone()).collect();
            return Ok(RegenerateResult {
                new_plan,
                preserved_phases: Vec::new(),
                reset_phases,
            });
        };

        let terminal: HashMap<&str, (PhaseStatus, &str)> = old_plan
            .phases
            .iter()
            .filter(|p| p.status.is_done())
            .map(|p| (p.id.as_str(), (p.status, p.commit_sha.as_str())))
            .collect();

        let mut preserved_phases = Vec::new();
        let mut reset_phases = Vec::new();
        for phase in &mut new_plan.phases {
            match terminal.get(phase.id.as_str()) {
                Some((status, commit_sha)) => {
                    phase.status = *status;
                    phase.commit_sha = (*commit_sha).to_string();
                    preserved_phases.push(phase.id.clone());
                }
                None => reset_phases.push(phase.id.clone()),
            }
        }

        tracing::debug!(
            task_id = %task.id,
            weight = %task.weight,
            preserved = preserved_phases.len(),
            reset = reset_phases.len(),
            "plan regenerated"
        );

        Ok(RegenerateResult {
            new_plan,
            preserved_phases,
            reset_phases,
        })
    }

    /// Regenerate `task`'s plan and strip inline prompts from the result so
    /// phase instructions always come from the current template.
    pub fn migrate_plan(
        &self,
        task: &Task,
        old_plan: Option<&Plan>,
    ) -> Result<MigrationResult, PlanError> {
        let reason = match old_plan {
            None => NO_EXISTING_PLAN.to_string(),
            Some(_) => self
                .is_plan_stale(old_plan, task)
                .map(|r| r.to_string())
                .unwrap_or_default(),
        };

        let RegenerateResult {
            mut new_plan,
            preserved_phases,
            reset_phases,
        } = self.regenerate_plan(task, old_plan)?;

        for phase in &mut new_plan.phases {
            phase.prompt.clear();
        }

        let old_phases = old_plan
            .map(|p| p.phases.iter().map(|ph| ph.id.clone()).collect())
            .unwrap_or_default();
        let new_phases = new_plan.phases.iter().map(|p| p.id.clone()).collect();

        tracing::info!(
            task_id = %task.id,
            weight = %task.weight,
            reason = %reason,
            preserved = preserved_phases.len(),
            reset = reset_phases.len(),
            "plan migrated"
        );

        Ok(MigrationResult {
            new_plan,
            old_phases,
            new_phases,
            preserved_count: preserved_phases.len(),
            reset_count: reset_phases.len(),
            reason,
        })
    }

    /// [`is_plan_stale`] against this generator's template store.
    pub fn is_plan_stale(&self, plan: Option<&Plan>, task: &Task) -> Option<StaleReason> {
        is_plan_stale(self.store(), plan, task)
    }
}
