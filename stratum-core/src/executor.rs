//! Runs a single changeset in its own connection and transaction.

use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::Connection;

use crate::backend::{Backend, Conn, NewLedgerEntry};
use crate::changeset::{Changeset, Direction};
use crate::error::{MigrationError, Result};
use crate::guidelines::Guidelines;
use crate::ledger::Ledger;

/// Applies or reverts `changeset`.
///
/// A dedicated connection is opened for the call and closed on every exit
/// path. The ledger table is provisioned before the transaction opens. The
/// changeset body and its ledger update commit together or not at all, with
/// one exception: on backends without transactional DDL the ledger row of a
/// reverted changeset is deleted after the commit.
///
/// Errors come back wrapped as `Migration <name> <direction> failed: ...`.
pub async fn execute<B: Backend>(
    backend: &B,
    changeset: &dyn Changeset<B::Database>,
    direction: Direction,
    batch: i64,
    guidelines: &Guidelines,
) -> Result<Duration> {
    let name = changeset.name();
    let started = Instant::now();

    let mut conn = backend
        .connect()
        .await
        .map_err(|e| e.in_changeset(name, direction))?;

    let result = run(backend, &mut conn, changeset, direction, batch, guidelines, started).await;

    if let Err(err) = conn.close().await {
        tracing::warn!(changeset = name, error = %err, "Failed to close connection");
    }

    match result {
        Ok(()) => {
            let elapsed = started.elapsed();
            tracing::info!(
                changeset = name,
                %direction,
                batch,
                elapsed_ms = elapsed.as_millis() as u64,
                "Changeset {}",
                if direction == Direction::Up { "applied" } else { "reverted" }
            );
            Ok(elapsed)
        }
        Err(err) => {
            tracing::error!(changeset = name, %direction, error = %err, "Changeset failed");
            Err(err.in_changeset(name, direction))
        }
    }
}

async fn run<B: Backend>(
    backend: &B,
    conn: &mut Conn<B>,
    changeset: &dyn Changeset<B::Database>,
    direction: Direction,
    batch: i64,
    guidelines: &Guidelines,
    started: Instant,
) -> Result<()> {
    let ledger = Ledger::new(backend);
    ledger.ensure_exists(conn).await?;

    let mut tx = conn.begin().await?;

    let applied = apply(
        backend, &mut *tx, changeset, direction, batch, guidelines, started,
    )
    .await;

    let erase_after_commit = match applied {
        Ok(erase_after_commit) => erase_after_commit,
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(
                    changeset = changeset.name(),
                    error = %rollback_err,
                    "Failed to roll back transaction"
                );
            }
            return Err(err);
        }
    };

    tx.commit().await?;

    if erase_after_commit {
        // Schema is already reverted here; a crash before this delete leaves
        // the changeset listed as applied.
        ledger.erase(conn, changeset.name()).await?;
    }
    Ok(())
}

/// Returns whether the ledger row still has to be erased after commit.
async fn apply<B: Backend>(
    backend: &B,
    conn: &mut Conn<B>,
    changeset: &dyn Changeset<B::Database>,
    direction: Direction,
    batch: i64,
    guidelines: &Guidelines,
    started: Instant,
) -> Result<bool> {
    preflight(changeset, direction, guidelines)?;

    let ledger = Ledger::new(backend);
    match direction {
        Direction::Up => {
            changeset.up(conn).await?;
            let entry = NewLedgerEntry {
                name: changeset.name(),
                batch,
                executed_at_ms: Utc::now().timestamp_millis(),
                execution_time_ms: i64::try_from(started.elapsed().as_millis())
                    .unwrap_or(i64::MAX),
                rollback_sql: changeset.rollback_sql(),
            };
            ledger.record(conn, &entry).await?;
            Ok(false)
        }
        Direction::Down => {
            changeset.down(conn).await?;
            if backend.supports_transactional_ddl() {
                ledger.erase(conn, changeset.name()).await?;
                Ok(false)
            } else {
                Ok(true)
            }
        }
    }
}

/// Configuration checks that run before the changeset body.
fn preflight<DB: sqlx::Database>(
    changeset: &dyn Changeset<DB>,
    direction: Direction,
    guidelines: &Guidelines,
) -> Result<()> {
    match direction {
        Direction::Up => match changeset.sql() {
            Some(sql) => guidelines.check(changeset.name(), sql),
            None => Ok(()),
        },
        Direction::Down if !changeset.reversible() => Err(MigrationError::MissingOperation {
            name: changeset.name().to_string(),
            direction,
        }),
        Direction::Down => Ok(()),
    }
}
