//! Detects plans that no longer match their weight's current template.

use std::fmt;

use crate::plan::Plan;
use crate::template::TemplateStore;
use crate::types::Task;

/// Why a plan must be migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    NilPlan,
    NoPhases,
    VersionBehind { plan: u32, template: u32 },
    PhaseSequence,
    InlinePrompts,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::NilPlan => f.write_str("plan is nil"),
            StaleReason::NoPhases => f.write_str("plan has no phases"),
            StaleReason::VersionBehind { plan, template } => {
                write!(f, "plan version {plan} is older than template version {template}")
            }
            StaleReason::PhaseSequence => f.write_str("phase sequence differs from template"),
            StaleReason::InlinePrompts => f.write_str("has inline prompts (legacy format)"),
        }
    }
}

/// Decide whether `plan` diverges from the template for `task.weight`.
///
/// Checks run in a fixed order and the first match wins. A template that
/// cannot be loaded makes the plan unverifiable, which is reported as
/// not stale so an unrelated template problem never blocks execution.
pub fn is_plan_stale(
    store: &dyn TemplateStore,
    plan: Option<&Plan>,
    task: &Task,
) -> Option<StaleReason> {
    let Some(plan) = plan else {
        return Some(StaleReason::NilPlan);
    };
    if plan.phases.is_empty() {
        return Some(StaleReason::NoPhases);
    }

    let template = match store.load(&task.weight) {
        Ok(tmpl) => tmpl,
        Err(e) => {
            tracing::debug!(
                task_id = %task.id,
                weight = %task.weight,
                error = %e,
                "template unavailable, skipping staleness check"
            );
            return None;
        }
    };

    if plan.version < template.version {
        return Some(StaleReason::VersionBehind {
            plan: plan.version,
            template: template.version,
        });
    }

    let same_sequence = plan.phases.len() == template.phases.len()
        && plan
            .phases
            .iter()
            .zip(&template.phases)
            .all(|(have, want)| have.id == want.id);
    if !same_sequence {
        return Some(StaleReason::PhaseSequence);
    }

    if plan.has_inline_prompts() {
        return Some(StaleReason::InlinePrompts);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Generator;
    use crate::template::BuiltinTemplates;
    use crate::types::Weight;

    fn small_task() -> Task {
        Task::new("TASK-001", "small", Weight::Small)
    }

    fn current_small_plan() -> Plan {
        Generator::new(&BuiltinTemplates)
            .create_from_template(&small_task())
            .unwrap()
    }

    #[test]
    fn nil_plan_is_stale() {
        let reason = is_plan_stale(&BuiltinTemplates, None, &small_task());
        assert_eq!(reason.map(|r| r.to_string()).as_deref(), Some("plan is nil"));
    }

    #[test]
    fn empty_plan_is_stale_even_for_unknown_weight() {
        let mut plan = current_small_plan();
        plan.phases.clear();
        let task = Task::new("TASK-001", "x", Weight::from("nonexistent"));
        assert_eq!(
            is_plan_stale(&BuiltinTemplates, Some(&plan), &task),
            Some(StaleReason::NoPhases)
        );
    }

    #[test]
    fn version_check_precedes_sequence_check() {
        let mut plan = current_small_plan();
        plan.version = 0;
        plan.phases.pop();
        let reason = is_plan_stale(&BuiltinTemplates, Some(&plan), &small_task()).unwrap();
        assert_eq!(reason, StaleReason::VersionBehind { plan: 0, template: 1 });
        assert!(reason.to_string().contains('0'));
        assert!(reason.to_string().contains('1'));
    }

    #[test]
    fn reordered_phases_are_stale() {
        let mut plan = current_small_plan();
        plan.phases.swap(0, 1);
        assert_eq!(
            is_plan_stale(&BuiltinTemplates, Some(&plan), &small_task()),
            Some(StaleReason::PhaseSequence)
        );
    }

    #[test]
    fn newer_plan_version_is_not_stale() {
        let mut plan = current_small_plan();
        plan.version = 9;
        assert_eq!(is_plan_stale(&BuiltinTemplates, Some(&plan), &small_task()), None);
    }
}
