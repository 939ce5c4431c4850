//! # Stratum
//!
//! Stratum moves a relational database schema through an ordered list of
//! named changesets and records what it applied in a ledger table inside the
//! same database. Every changeset is meant to be idempotent: the helpers in
//! [`ddl`] probe the live catalog before each statement, so re-running a
//! changeset against a schema that already has its objects is harmless.
//!
//! Applied changesets are grouped into batches. The most recent batch can be
//! rolled back as a unit, the whole history can be reset, and `fresh` resets
//! then re-applies everything.
//!
//! ## Storage Support
//!
//! - SQLite (feature `sqlite`, enabled by default)
//! - MySQL (feature `mysql`)
//!
//! ## Example
//!
//! ```rust,no_run
//! use stratum::{Migrator, Registry};
//! use stratum::sqlite::SqliteBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stratum::MigrationError> {
//!     let backend = SqliteBackend::from_url("sqlite://app.db")?;
//!     let registry = Registry::from_directory("migrations".as_ref())?;
//!
//!     let report = Migrator::new(backend, registry).run_pending().await?;
//!     println!("{}", report.message);
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod render;

pub use stratum_core::{
    Backend, BatchReport, Catalog, Changeset, ChangesetId, ColumnDefinition, DdlOutcome,
    DEFAULT_LEDGER_TABLE, Direction, FreshReport, Guidelines, Ledger, LedgerEntry, MigrationError,
    Migrator, NewLedgerEntry, Registry, SqlChangeset, StatusReport, StepOutcome, StepReport,
    Violation, is_identifier, validate_sql,
};
pub use stratum_core::{ddl, loader, probe, report};

pub use config::{Config, ConfigError};

#[cfg(feature = "sqlite")]
pub mod sqlite {
    pub use stratum_storage_sqlite::{SqliteBackend, SqliteCatalog};
}

#[cfg(feature = "mysql")]
pub mod mysql {
    pub use stratum_storage_mysql::{MySqlBackend, MySqlCatalog};
}
