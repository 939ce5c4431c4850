use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::Database;

use crate::error::{MigrationError, Result};

/// Which way a changeset is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// A named, versioned schema change.
///
/// `up` and `down` receive the transactional connection the executor opened
/// for this changeset alone. Both should be safe to run against a schema in
/// an unknown state, typically by going through the helpers in
/// [`crate::ddl`].
#[async_trait]
pub trait Changeset<DB: Database>: Send + Sync {
    /// Name of the form `YYYYMMDD_HHMMSS_description`. Must never change once
    /// applied, the ledger matches on it.
    fn name(&self) -> &str;

    /// Apply the change
    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Revert the change. Irreversible changesets leave this alone and
    /// override [`Changeset::reversible`].
    async fn down<'a>(&'a self, _conn: &'a mut <DB as Database>::Connection) -> Result<()> {
        Err(MigrationError::MissingOperation {
            name: self.name().to_string(),
            direction: Direction::Down,
        })
    }

    /// Whether `down` can be run at all.
    fn reversible(&self) -> bool {
        true
    }

    /// Raw SQL kept in the ledger for manual recovery. Never executed.
    fn rollback_sql(&self) -> Option<&str> {
        None
    }

    /// Forward SQL text, when the changeset has one, for guideline checks.
    fn sql(&self) -> Option<&str> {
        None
    }
}
