use std::io::Write;

use anyhow::Context as _;
use orc_core::storage::PersistenceBackend;
use orc_core::types::Weight;

use super::Context;

/// Run the `reweight` subcommand: change a task's weight and regenerate its
/// plan, keeping completed and skipped phases the new template still has.
pub fn run(ctx: &Context, task_id: &str, weight: Weight, out: &mut impl Write) -> anyhow::Result<()> {
    let mut task = ctx
        .backend
        .load_task(task_id)
        .with_context(|| format!("load task {task_id}"))?;
    let old_plan = ctx
        .load_plan_opt(task_id)
        .with_context(|| format!("load plan {task_id}"))?;

    let previous = task.weight.clone();
    if !task.set_weight(weight) && old_plan.is_some() {
        writeln!(out, "{task_id} is already {previous}")?;
        return Ok(());
    }

    let result = ctx
        .generator()
        .regenerate_plan(&task, old_plan.as_ref())
        .with_context(|| format!("regenerate plan for {task_id}"))?;

    ctx.backend.save_plan(&result.new_plan).context("save plan")?;
    ctx.backend.save_task(&task).context("save task")?;

    tracing::info!(
        task_id,
        from = %previous,
        to = %task.weight,
        preserved = result.preserved_phases.len(),
        "task re-weighted"
    );
    writeln!(out, "Re-weighted {task_id}: {previous} -> {}", task.weight)?;
    writeln!(out, "   Phases: {}", result.new_plan.phase_ids().join(", "))?;
    writeln!(out, "   Preserved: {}", result.preserved_phases.join(", "))?;
    writeln!(out, "   Reset: {}", result.reset_phases.join(", "))?;
    Ok(())
}
