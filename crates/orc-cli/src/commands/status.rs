use std::io::Write;

use anyhow::Context as _;
use orc_core::storage::PersistenceBackend;
use serde::Serialize;

use super::{format_elapsed, Context};

/// One row of `orc status`.
#[derive(Debug, Serialize)]
pub struct TaskStatusRow {
    pub task_id: String,
    pub weight: Option<String>,
    pub status: Option<String>,
    pub current_phase: Option<String>,
    pub resume_phase: Option<String>,
    pub orphaned: Option<String>,
    pub elapsed_secs: u64,
    pub total_tokens: u64,
}

pub fn collect(ctx: &Context) -> anyhow::Result<Vec<TaskStatusRow>> {
    let detector = ctx.detector();
    let mut rows = Vec::new();

    for task_id in ctx.backend.list_task_ids().context("list tasks")? {
        let weight = match ctx.backend.load_task(&task_id) {
            Ok(task) => Some(task.weight.to_string()),
            Err(e) => {
                tracing::debug!(task_id = %task_id, error = %e, "task record unavailable");
                None
            }
        };
        let plan = ctx
            .load_plan_opt(&task_id)
            .with_context(|| format!("load plan {task_id}"))?;

        let mut row = TaskStatusRow {
            task_id: task_id.clone(),
            weight,
            status: None,
            current_phase: None,
            resume_phase: None,
            orphaned: None,
            elapsed_secs: 0,
            total_tokens: 0,
        };

        match ctx.backend.load_state(&task_id) {
            Ok(state) => {
                row.status = Some(state.status.to_string());
                row.current_phase = state.current_phase.clone();
                row.resume_phase = plan
                    .as_ref()
                    .and_then(|p| state.resume_phase(p.phase_ids()));
                row.orphaned = detector.check(&state).map(|r| r.to_string());
                row.elapsed_secs = state.elapsed().as_secs();
                row.total_tokens = state.tokens.total_tokens;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e).with_context(|| format!("load state {task_id}")),
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Run the `status` subcommand.
pub fn run(ctx: &Context, json: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let rows = collect(ctx)?;

    if json {
        serde_json::to_writer_pretty(&mut *out, &rows)?;
        writeln!(out)?;
        return Ok(());
    }

    if rows.is_empty() {
        writeln!(out, "No tasks.")?;
        return Ok(());
    }

    let dash = || "-".to_string();
    writeln!(
        out,
        "{:<16} {:<10} {:<12} {:<12} {:<12} {:>9} {:>10}  ORPHAN",
        "TASK", "WEIGHT", "STATUS", "PHASE", "RESUME", "ELAPSED", "TOKENS"
    )?;
    for row in &rows {
        writeln!(
            out,
            "{:<16} {:<10} {:<12} {:<12} {:<12} {:>9} {:>10}  {}",
            row.task_id,
            row.weight.clone().unwrap_or_else(dash),
            row.status.clone().unwrap_or_else(dash),
            row.current_phase.clone().unwrap_or_else(dash),
            row.resume_phase.clone().unwrap_or_else(dash),
            format_elapsed(std::time::Duration::from_secs(row.elapsed_secs)),
            row.total_tokens,
            row.orphaned.clone().unwrap_or_else(dash),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{context, output};
    use orc_core::types::Weight;

    #[test]
    fn reports_orphan_and_resume_phase() {
        let (_dir, ctx) = context();
        crate::commands::new::run(&ctx, "TASK-001", Weight::Small, None, &mut Vec::new())
            .unwrap();

        let mut state = ctx.backend.load_state("TASK-001").unwrap();
        state.start_phase("implement");
        state.add_tokens(10, 5, 0, 0);
        ctx.backend.save_state(&state).unwrap();

        let rows = collect(&ctx).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.weight.as_deref(), Some("small"));
        assert_eq!(row.status.as_deref(), Some("running"));
        assert_eq!(row.resume_phase.as_deref(), Some("implement"));
        assert_eq!(
            row.orphaned.as_deref(),
            Some("no execution info (legacy state or incomplete)")
        );
        assert_eq!(row.total_tokens, 15);
    }

    #[test]
    fn json_output_parses() {
        let (_dir, ctx) = context();
        crate::commands::new::run(&ctx, "TASK-001", Weight::Trivial, None, &mut Vec::new())
            .unwrap();
        let mut buf = Vec::new();
        run(&ctx, true, &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output(buf)).unwrap();
        assert_eq!(value[0]["task_id"], "TASK-001");
        assert_eq!(value[0]["status"], "pending");
    }

    #[test]
    fn empty_root() {
        let (_dir, ctx) = context();
        let mut buf = Vec::new();
        run(&ctx, false, &mut buf).unwrap();
        assert_eq!(output(buf), "No tasks.\n");
    }
}
