use std::io::Write;

use anyhow::Context as _;
use orc_core::patrol::{Patrol, PatrolReport};

use super::Context;

/// Run one orphan sweep and print what it found.
pub fn run(ctx: &Context, dry_run: bool, out: &mut impl Write) -> anyhow::Result<PatrolReport> {
    let detector = ctx.detector();
    let report = Patrol::new(&detector)
        .dry_run(dry_run)
        .run(&ctx.backend)
        .context("patrol sweep")?;
    print_report(&report, out)?;
    Ok(report)
}

pub fn print_report(report: &PatrolReport, out: &mut impl Write) -> std::io::Result<()> {
    let verb = if report.dry_run { "Would interrupt" } else { "Interrupted" };
    for orphan in &report.orphaned {
        write!(out, "{verb} {}: {}", orphan.task_id, orphan.reason)?;
        match &orphan.resume_phase {
            Some(phase) => writeln!(out, " (resume at {phase})")?,
            None => writeln!(out)?,
        }
    }
    write!(
        out,
        "Scanned {} task(s), {} orphaned",
        report.scanned,
        report.orphaned.len()
    )?;
    if report.load_failures > 0 {
        write!(out, ", {} unreadable", report.load_failures)?;
    }
    if report.save_failures > 0 {
        write!(out, ", {} not saved", report.save_failures)?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{context, output};
    use orc_core::storage::PersistenceBackend;
    use orc_core::types::{TaskStatus, Weight};

    #[test]
    fn interrupts_legacy_running_state() {
        let (_dir, ctx) = context();
        crate::commands::new::run(&ctx, "TASK-001", Weight::Small, None, &mut Vec::new()).unwrap();
        let mut state = ctx.backend.load_state("TASK-001").unwrap();
        state.start_phase("implement");
        ctx.backend.save_state(&state).unwrap();

        let mut buf = Vec::new();
        let report = run(&ctx, false, &mut buf).unwrap();
        assert_eq!(report.orphaned.len(), 1);
        let text = output(buf);
        assert!(text.contains("Interrupted TASK-001"));
        assert!(text.contains("(resume at implement)"));
        assert_eq!(
            ctx.backend.load_state("TASK-001").unwrap().status,
            TaskStatus::Interrupted
        );
    }

    #[test]
    fn unreadable_state_is_reported_separately() {
        let (dir, ctx) = context();
        let broken = dir.path().join("tasks").join("TASK-BAD");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join("state.json"), "{").unwrap();

        let mut buf = Vec::new();
        let report = run(&ctx, false, &mut buf).unwrap();
        assert_eq!(report.load_failures, 1);
        assert_eq!(report.save_failures, 0);
        assert_eq!(output(buf), "Scanned 0 task(s), 0 orphaned, 1 unreadable\n");
    }

    #[test]
    fn nothing_to_do() {
        let (_dir, ctx) = context();
        let mut buf = Vec::new();
        run(&ctx, true, &mut buf).unwrap();
        assert_eq!(output(buf), "Scanned 0 task(s), 0 orphaned\n");
    }
}
