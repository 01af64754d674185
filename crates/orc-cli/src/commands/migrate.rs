use std::io::Write;

use anyhow::{bail, Context as _};
use orc_core::storage::PersistenceBackend;

use super::Context;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrateSummary {
    pub total: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Run the `migrate` subcommand: bring stale plans in line with their
/// current templates.
///
/// Explicitly named tasks that cannot be loaded abort the run; with `--all`
/// they are reported and counted as failures.
pub fn run(
    ctx: &Context,
    task_ids: &[String],
    all: bool,
    dry_run: bool,
    out: &mut impl Write,
) -> anyhow::Result<MigrateSummary> {
    match (all, task_ids.is_empty()) {
        (false, true) => bail!("must provide task IDs or use --all"),
        (true, false) => bail!("cannot specify both task IDs and --all"),
        _ => {}
    }

    let ids = if all {
        ctx.backend.list_task_ids().context("list tasks")?
    } else {
        task_ids.to_vec()
    };

    let generator = ctx.generator();
    let mut summary = MigrateSummary {
        total: ids.len(),
        ..MigrateSummary::default()
    };

    for task_id in &ids {
        let task = match ctx.backend.load_task(task_id) {
            Ok(t) => t,
            Err(e) if !all => return Err(e).with_context(|| format!("load task {task_id}")),
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "skipping task");
                writeln!(out, "Skip {task_id}: load task failed: {e}")?;
                summary.failed += 1;
                continue;
            }
        };

        let plan = match ctx.load_plan_opt(task_id) {
            Ok(Some(p)) => p,
            Ok(None) => {
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                writeln!(out, "Skip {task_id}: load plan failed: {e}")?;
                summary.failed += 1;
                continue;
            }
        };

        if generator.is_plan_stale(Some(&plan), &task).is_none() {
            summary.skipped += 1;
            continue;
        }

        let result = match generator.migrate_plan(&task, Some(&plan)) {
            Ok(r) => r,
            Err(e) => {
                writeln!(out, "Skip {task_id}: migration failed: {e}")?;
                summary.failed += 1;
                continue;
            }
        };

        if !dry_run {
            if let Err(e) = ctx.backend.save_plan(&result.new_plan) {
                writeln!(out, "Skip {task_id}: save failed: {e}")?;
                summary.failed += 1;
                continue;
            }
        }

        let verb = if dry_run { "Would migrate" } else { "Migrated" };
        writeln!(out, "{verb} {task_id}: {}", result.reason)?;
        writeln!(out, "   Old: {}", result.old_phases.join(", "))?;
        writeln!(out, "   New: {}", result.new_phases.join(", "))?;
        writeln!(
            out,
            "   Preserved: {}, Reset: {}",
            result.preserved_count, result.reset_count
        )?;
        summary.migrated += 1;
    }

    writeln!(out)?;
    writeln!(
        out,
        "{}",
        if dry_run { "Dry run summary:" } else { "Migration summary:" }
    )?;
    writeln!(out, "  Total tasks: {}", summary.total)?;
    writeln!(out, "  Migrated: {}", summary.migrated)?;
    writeln!(out, "  Skipped (current): {}", summary.skipped)?;
    if summary.failed > 0 {
        writeln!(out, "  Failed: {}", summary.failed)?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{context, output};
    use orc_core::types::{PhaseStatus, Weight};

    fn seed_stale(ctx: &Context, id: &str) {
        crate::commands::new::run(ctx, id, Weight::Small, None, &mut Vec::new()).unwrap();
        let mut plan = ctx.backend.load_plan(id).unwrap();
        plan.version = 0;
        plan.phases[1].status = PhaseStatus::Completed;
        plan.phases[1].commit_sha = "abc123".to_string();
        ctx.backend.save_plan(&plan).unwrap();
    }

    #[test]
    fn requires_ids_xor_all() {
        let (_dir, ctx) = context();
        assert!(run(&ctx, &[], false, false, &mut Vec::new()).is_err());
        assert!(run(&ctx, &["A".to_string()], true, false, &mut Vec::new()).is_err());
    }

    #[test]
    fn migrates_stale_and_skips_current() {
        let (_dir, ctx) = context();
        seed_stale(&ctx, "STALE");
        crate::commands::new::run(&ctx, "FRESH", Weight::Medium, None, &mut Vec::new()).unwrap();

        let mut buf = Vec::new();
        let summary = run(&ctx, &[], true, false, &mut buf).unwrap();
        assert_eq!(
            summary,
            MigrateSummary {
                total: 2,
                migrated: 1,
                skipped: 1,
                failed: 0
            }
        );
        let text = output(buf);
        assert!(text.contains("Migrated STALE: plan version 0 is older than template version 1"));
        assert!(text.contains("Preserved: 1, Reset: 2"));

        let plan = ctx.backend.load_plan("STALE").unwrap();
        assert_eq!(plan.version, 1);
        assert_eq!(plan.get_phase("implement").unwrap().commit_sha, "abc123");
    }

    #[test]
    fn dry_run_does_not_save() {
        let (_dir, ctx) = context();
        seed_stale(&ctx, "STALE");
        let summary = run(&ctx, &["STALE".to_string()], false, true, &mut Vec::new()).unwrap();
        assert_eq!(summary.migrated, 1);
        assert_eq!(ctx.backend.load_plan("STALE").unwrap().version, 0);
    }

    #[test]
    fn named_missing_task_is_an_error() {
        let (_dir, ctx) = context();
        assert!(run(&ctx, &["NOPE".to_string()], false, false, &mut Vec::new()).is_err());
    }
}
