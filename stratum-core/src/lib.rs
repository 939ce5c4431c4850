//! Core functionality for the stratum migration runner
//!
//! A database's schema is moved through an ordered list of named changesets.
//! Each applied changeset is recorded in a ledger table together with the
//! batch it was applied in, so the most recent batch can be rolled back as a
//! unit and the whole history can be reset.
//!
//! The database itself is reached through two traits implemented by the
//! storage crates: [`Backend`] (connections and ledger storage) and
//! [`Catalog`] (schema metadata and DDL text). Changesets are anything
//! implementing [`Changeset`], either written in Rust or loaded from SQL files
//! with [`Registry::load_directory`].
//!
//! See [`Migrator`] for the batch operations.
pub mod backend;
pub mod changeset;
pub mod ddl;
pub mod error;
pub mod executor;
pub mod guidelines;
pub mod id;
pub mod ledger;
pub mod loader;
pub mod migrator;
pub mod probe;
pub mod registry;
pub mod report;

pub use backend::{Backend, Catalog, ColumnDefinition, LedgerEntry, NewLedgerEntry};
pub use changeset::{Changeset, Direction};
pub use ddl::DdlOutcome;
pub use error::{MigrationError, Result};
pub use guidelines::{Guidelines, Violation, validate_sql};
pub use id::ChangesetId;
pub use ledger::Ledger;
pub use loader::SqlChangeset;
pub use migrator::Migrator;
pub use registry::Registry;
pub use report::{BatchReport, FreshReport, StatusReport, StepOutcome, StepReport};

/// Ledger table name used unless a backend is configured otherwise.
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// Whether `name` is a plain SQL identifier, safe to splice into statements.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("schema_migrations"));
        assert!(is_identifier("_ledger2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2ledger"));
        assert!(!is_identifier("ledger; DROP TABLE users"));
        assert!(!is_identifier(&"x".repeat(65)));
    }
}
