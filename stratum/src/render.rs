//! Plain text rendering of reports for the terminal.

use std::fmt::Write;

use stratum_core::report::{ChangesetState, StatusReport};
use stratum_core::{BatchReport, FreshReport, StepOutcome, StepReport, Violation};

pub fn step(step: &StepReport) -> String {
    match &step.outcome {
        StepOutcome::Succeeded { duration_ms } => {
            format!("  [ok]     {} {} ({duration_ms} ms)", step.direction, step.name)
        }
        StepOutcome::Failed { error } => {
            format!("  [failed] {} {}\n           {error}", step.direction, step.name)
        }
    }
}

pub fn batch(report: &BatchReport) -> String {
    let mut out = String::new();
    for s in &report.steps {
        let _ = writeln!(out, "{}", step(s));
    }
    out.push_str(&report.message);
    out
}

pub fn fresh(report: &FreshReport) -> String {
    let mut out = format!("Reset\n{}\n", batch(&report.reset));
    if let Some(migrate) = &report.migrate {
        let _ = writeln!(out, "Migrate\n{}", batch(migrate));
    }
    out.push_str(&report.message);
    out
}

pub fn status(report: &StatusReport) -> String {
    let mut out = String::new();
    if report.entries.is_empty() {
        out.push_str("No changesets found\n");
    }

    for entry in &report.entries {
        let line = match &entry.state {
            ChangesetState::Applied {
                batch, executed_at, ..
            } => format!(
                "  applied  batch {batch:<4} {}  {}",
                executed_at.format("%Y-%m-%d %H:%M:%S"),
                entry.name
            ),
            ChangesetState::Pending => format!("  pending  {:<30} {}", "", entry.name),
        };
        let _ = writeln!(out, "{line}");
    }

    if !report.orphans.is_empty() {
        out.push_str("\nApplied but no longer registered:\n");
        for orphan in &report.orphans {
            let _ = writeln!(out, "  batch {:<4} {}", orphan.batch, orphan.name);
        }
    }

    let pending = report.pending().count();
    let _ = write!(
        out,
        "{} applied, {pending} pending",
        report.entries.len() - pending
    );
    out
}

pub fn violations(name: &str, violations: &[Violation]) -> String {
    let mut out = String::new();
    for v in violations {
        let _ = writeln!(out, "{name}: {v}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use stratum_core::report::StatusEntry;
    use stratum_core::{Direction, LedgerEntry, validate_sql};

    #[test]
    fn test_batch_lists_every_step_then_the_result() {
        let report = BatchReport::halted(vec![
            StepReport::succeeded("20250101_000000_a", Direction::Up, Duration::from_millis(7)),
            StepReport::failed("20250102_000000_b", Direction::Up, "no such table: foo"),
        ]);

        let text = batch(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  [ok]     up 20250101_000000_a (7 ms)");
        assert_eq!(lines[1], "  [failed] up 20250102_000000_b");
        assert!(lines[2].contains("no such table: foo"));
        assert_eq!(lines[3], "Halted at 20250102_000000_b: no such table: foo");
    }

    #[test]
    fn test_nothing_to_do() {
        assert_eq!(
            batch(&BatchReport::nothing_to_do("Nothing to migrate")),
            "Nothing to migrate"
        );
    }

    #[test]
    fn test_fresh_without_migrate() {
        let report = FreshReport {
            success: false,
            message: "Reset failed: boom".to_string(),
            reset: BatchReport::halted(vec![StepReport::failed(
                "20250101_000000_a",
                Direction::Down,
                "boom",
            )]),
            migrate: None,
        };
        let text = fresh(&report);
        assert!(text.starts_with("Reset\n"));
        assert!(!text.contains("Migrate"));
        assert!(text.ends_with("Reset failed: boom"));
    }

    #[test]
    fn test_status_with_orphans() {
        let executed_at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let report = StatusReport {
            entries: vec![
                StatusEntry {
                    name: "20250101_000000_a".to_string(),
                    state: ChangesetState::Applied {
                        batch: 1,
                        executed_at,
                        execution_time_ms: Some(4),
                    },
                },
                StatusEntry {
                    name: "20250102_000000_b".to_string(),
                    state: ChangesetState::Pending,
                },
            ],
            orphans: vec![LedgerEntry {
                id: 9,
                name: "20240101_000000_gone".to_string(),
                batch: 1,
                executed_at_ms: executed_at.timestamp_millis(),
                execution_time_ms: None,
                rollback_sql: None,
            }],
        };

        let text = status(&report);
        assert!(text.contains("applied  batch 1    2025-01-01 12:00:00  20250101_000000_a"));
        assert!(text.contains("pending"));
        assert!(text.contains("Applied but no longer registered:"));
        assert!(text.contains("20240101_000000_gone"));
        assert!(text.ends_with("1 applied, 1 pending"));
    }

    #[test]
    fn test_violations() {
        let found = validate_sql("CREATE TABLE t (kind ENUM('a','b'));");
        let text = violations("20250101_000000_a", &found);
        assert!(text.starts_with("20250101_000000_a: line 1:"));
    }
}
