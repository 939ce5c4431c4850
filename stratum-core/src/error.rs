use std::path::PathBuf;

use thiserror::Error;

use crate::changeset::Direction;
use crate::guidelines::Violation;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("Invalid changeset name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid ledger table name '{0}', use letters, digits and underscores only")]
    InvalidLedgerTable(String),

    #[error("Invalid changeset {name}: {reason}")]
    InvalidChangeset { name: String, reason: String },

    #[error("Duplicate changeset: {0}")]
    Duplicate(String),

    #[error("Changeset not found: {0}")]
    NotFound(String),

    #[error("Changeset {name} does not define a {direction} operation")]
    MissingOperation { name: String, direction: Direction },

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("Changeset {name} violates schema guidelines: {}", summarize(.violations))]
    Guidelines {
        name: String,
        violations: Vec<Violation>,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration {name} {direction} failed: {source}")]
    Execution {
        name: String,
        direction: Direction,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    /// Wraps an error raised while running `name` in the given direction.
    pub fn in_changeset(self, name: &str, direction: Direction) -> Self {
        MigrationError::Execution {
            name: name.to_string(),
            direction,
            source: Box::new(self),
        }
    }

    /// Configuration errors are problems with the changeset set itself rather
    /// than with the data or schema it touches.
    pub fn is_configuration_error(&self) -> bool {
        match self {
            MigrationError::InvalidName { .. }
            | MigrationError::InvalidLedgerTable(_)
            | MigrationError::InvalidChangeset { .. }
            | MigrationError::Duplicate(_)
            | MigrationError::NotFound(_)
            | MigrationError::MissingOperation { .. }
            | MigrationError::Unsupported { .. }
            | MigrationError::Guidelines { .. } => true,
            MigrationError::Execution { source, .. } => source.is_configuration_error(),
            _ => false,
        }
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_message_keeps_source_text() {
        let err = MigrationError::Migration("column bar already exists".to_string())
            .in_changeset("20250102_000000_b", Direction::Up);

        assert_eq!(
            err.to_string(),
            "Migration 20250102_000000_b up failed: Migration failed: column bar already exists"
        );
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn test_configuration_errors_survive_wrapping() {
        let err = MigrationError::MissingOperation {
            name: "20250101_000000_a".to_string(),
            direction: Direction::Down,
        }
        .in_changeset("20250101_000000_a", Direction::Down);

        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("does not define a down operation"));
    }
}
