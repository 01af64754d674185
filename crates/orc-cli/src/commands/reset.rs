use std::io::Write;

use anyhow::{bail, Context as _};
use orc_core::storage::PersistenceBackend;
use orc_core::types::{PhaseStatus, TaskStatus};

use super::Context;

/// Run the `reset` subcommand.
///
/// Without `from`, the whole task goes back to pending. With `from`, that
/// phase and every later one are reset and earlier phases are kept. A task
/// whose executor is still alive is left alone unless `force` is set.
pub fn run(
    ctx: &Context,
    task_id: &str,
    from: Option<&str>,
    force: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut state = ctx
        .backend
        .load_state(task_id)
        .with_context(|| format!("load state {task_id}"))?;
    let mut plan = ctx
        .backend
        .load_plan(task_id)
        .with_context(|| format!("load plan {task_id}"))?;

    if state.status == TaskStatus::Running && !force && ctx.detector().check(&state).is_none() {
        bail!("task {task_id} is running with a live executor (use --force to reset anyway)");
    }

    match from {
        None => {
            state.reset();
            plan.reset();
        }
        Some(phase_id) => {
            state
                .reset_phases_from(phase_id, plan.phase_ids())
                .with_context(|| format!("reset {task_id}"))?;
            let start = plan
                .phases
                .iter()
                .position(|p| p.id == phase_id)
                .unwrap_or(plan.phases.len());
            for phase in &mut plan.phases[start..] {
                phase.status = PhaseStatus::Pending;
                phase.commit_sha.clear();
            }
        }
    }

    ctx.backend.save_state(&state).context("save state")?;
    ctx.backend.save_plan(&plan).context("save plan")?;

    tracing::info!(task_id, from = from.unwrap_or("start"), "task reset");
    match from {
        None => writeln!(out, "Reset {task_id}")?,
        Some(phase_id) => writeln!(out, "Reset {task_id} from {phase_id}")?,
    }
    Ok(())
}
