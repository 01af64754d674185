use std::io::Write;

use anyhow::{bail, Context as _};
use orc_core::state::State;
use orc_core::storage::PersistenceBackend;
use orc_core::types::{Task, Weight};

use super::Context;

/// Run the `new` subcommand: store a task with a fresh plan and state.
pub fn run(
    ctx: &Context,
    task_id: &str,
    weight: Weight,
    title: Option<String>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match ctx.backend.load_task(task_id) {
        Ok(_) => bail!("task {task_id} already exists"),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e).with_context(|| format!("load task {task_id}")),
    }

    let task = Task::new(task_id, title.unwrap_or_else(|| task_id.to_string()), weight);
    let plan = ctx
        .generator()
        .generate(&task)
        .with_context(|| format!("build plan for {task_id}"))?;
    let state = State::new(task_id);

    ctx.backend.save_task(&task).context("save task")?;
    ctx.backend.save_plan(&plan).context("save plan")?;
    ctx.backend.save_state(&state).context("save state")?;

    tracing::info!(task_id, weight = %task.weight, phases = plan.phases.len(), "task created");
    writeln!(out, "Created {task_id} ({})", task.weight)?;
    writeln!(out, "  Phases: {}", plan.phase_ids().join(" -> "))?;
    Ok(())
}
