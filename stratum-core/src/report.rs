use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::LedgerEntry;
use crate::changeset::Direction;

/// Result of one attempted changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: String,
    pub direction: Direction,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome {
    Succeeded { duration_ms: u64 },
    Failed { error: String },
}

impl StepReport {
    pub fn succeeded(name: &str, direction: Direction, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            direction,
            outcome: StepOutcome::Succeeded {
                duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            },
        }
    }

    pub fn failed(name: &str, direction: Direction, error: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            direction,
            outcome: StepOutcome::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Succeeded { .. })
    }
}

/// Result of a batch operation. `steps` holds every attempted changeset, up
/// to and including the one that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub success: bool,
    pub message: String,
    pub steps: Vec<StepReport>,
}

impl BatchReport {
    pub fn nothing_to_do(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            steps: Vec::new(),
        }
    }

    pub fn completed(message: impl Into<String>, steps: Vec<StepReport>) -> Self {
        Self {
            success: true,
            message: message.into(),
            steps,
        }
    }

    pub fn halted(steps: Vec<StepReport>) -> Self {
        let message = match steps.last().map(|s| (&s.name, &s.outcome)) {
            Some((name, StepOutcome::Failed { error })) => format!("Halted at {name}: {error}"),
            _ => "Halted".to_string(),
        };
        Self {
            success: false,
            message,
            steps,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Result of `fresh`: a full reset followed, if it succeeded, by a migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreshReport {
    pub success: bool,
    pub message: String,
    pub reset: BatchReport,
    pub migrate: Option<BatchReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ChangesetState {
    Applied {
        batch: i64,
        executed_at: DateTime<Utc>,
        execution_time_ms: Option<i64>,
    },
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub name: String,
    #[serde(flatten)]
    pub state: ChangesetState,
}

/// Every known changeset with its state, plus ledger rows that no longer
/// match any known changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
    pub orphans: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn pending(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries
            .iter()
            .filter(|e| e.state == ChangesetState::Pending)
    }

    pub fn applied(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries
            .iter()
            .filter(|e| e.state != ChangesetState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halted_message_names_failing_step() {
        let report = BatchReport::halted(vec![
            StepReport::succeeded("20250101_000000_a", Direction::Up, Duration::from_millis(4)),
            StepReport::failed("20250102_000000_b", Direction::Up, "near \"BOGUS\": syntax error"),
        ]);

        assert!(!report.success);
        assert_eq!(
            report.message,
            "Halted at 20250102_000000_b: near \"BOGUS\": syntax error"
        );
        assert_eq!(report.names(), vec!["20250101_000000_a", "20250102_000000_b"]);
    }

    #[test]
    fn test_step_report_serializes_flat() {
        let step = StepReport::failed("20250102_000000_b", Direction::Down, "boom");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "20250102_000000_b",
                "direction": "down",
                "status": "failed",
                "error": "boom"
            })
        );
    }
}
