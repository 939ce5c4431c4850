use std::collections::{HashMap, HashSet};

use sqlx::Connection;

use crate::backend::{Backend, Conn, LedgerEntry};
use crate::changeset::{Changeset, Direction};
use crate::error::{MigrationError, Result};
use crate::executor;
use crate::guidelines::Guidelines;
use crate::ledger::Ledger;
use crate::registry::Registry;
use crate::report::{
    BatchReport, ChangesetState, FreshReport, StatusEntry, StatusReport, StepReport,
};

/// Moves a database forwards and backwards through the registered changesets.
///
/// Changesets run strictly one after another, each in its own transaction,
/// and every operation stops at the first failure. The returned report lists
/// each attempted changeset so a caller can show exactly how far it got. An
/// `Err` is only returned when the ledger itself could not be read.
pub struct Migrator<B: Backend> {
    backend: B,
    registry: Registry<B::Database>,
    guidelines: Guidelines,
}

impl<B: Backend> Migrator<B> {
    pub fn new(backend: B, registry: Registry<B::Database>) -> Self {
        Self {
            backend,
            registry,
            guidelines: Guidelines::default(),
        }
    }

    pub fn with_guidelines(mut self, guidelines: Guidelines) -> Self {
        self.guidelines = guidelines;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Registry<B::Database> {
        &self.registry
    }

    /// Applies every changeset missing from the ledger, in order, as one new
    /// batch.
    pub async fn run_pending(&self) -> Result<BatchReport> {
        let applied: HashSet<String> = self
            .read_applied()
            .await?
            .into_iter()
            .map(|entry| entry.name)
            .collect();

        let pending: Vec<&dyn Changeset<B::Database>> = self
            .registry
            .iter()
            .filter(|changeset| !applied.contains(changeset.name()))
            .collect();

        if pending.is_empty() {
            tracing::info!("Nothing to migrate");
            return Ok(BatchReport::nothing_to_do("Nothing to migrate"));
        }

        // Read once per run so every member of the run shares one batch.
        let batch = self.read_next_batch().await?;
        tracing::info!(batch, count = pending.len(), "Applying pending changesets");

        let mut steps = Vec::with_capacity(pending.len());
        for changeset in pending {
            match executor::execute(
                &self.backend,
                changeset,
                Direction::Up,
                batch,
                &self.guidelines,
            )
            .await
            {
                Ok(duration) => {
                    steps.push(StepReport::succeeded(changeset.name(), Direction::Up, duration))
                }
                Err(err) => {
                    steps.push(StepReport::failed(changeset.name(), Direction::Up, &err));
                    return Ok(BatchReport::halted(steps));
                }
            }
        }

        let message = format!("Applied {} changeset(s) in batch {batch}", steps.len());
        Ok(BatchReport::completed(message, steps))
    }

    /// Reverts every member of the highest batch, most recently applied first.
    pub async fn rollback_last_batch(&self) -> Result<BatchReport> {
        let (batch, entries) = {
            let mut conn = self.backend.connect().await?;
            let result = self.read_last_batch(&mut conn).await;
            close_quietly(conn).await;
            result?
        };

        if batch == 0 {
            tracing::info!("Nothing to roll back");
            return Ok(BatchReport::nothing_to_do("Nothing to roll back"));
        }

        tracing::info!(batch, count = entries.len(), "Rolling back batch");
        let report = self.revert(entries.iter().map(|e| e.name.as_str())).await;
        Ok(match report {
            Ok(steps) => BatchReport::completed(
                format!("Rolled back {} changeset(s) from batch {batch}", steps.len()),
                steps,
            ),
            Err(steps) => BatchReport::halted(steps),
        })
    }

    /// Reverts everything in the ledger, newest first.
    pub async fn reset_all(&self) -> Result<BatchReport> {
        let applied = self.read_applied().await?;
        if applied.is_empty() {
            tracing::info!("Nothing to reset");
            return Ok(BatchReport::nothing_to_do("Nothing to reset"));
        }

        tracing::info!(count = applied.len(), "Resetting all changesets");
        let report = self
            .revert(applied.iter().rev().map(|e| e.name.as_str()))
            .await;
        Ok(match report {
            Ok(steps) => {
                BatchReport::completed(format!("Reset {} changeset(s)", steps.len()), steps)
            }
            Err(steps) => BatchReport::halted(steps),
        })
    }

    /// [`Migrator::reset_all`], then [`Migrator::run_pending`] if the reset
    /// fully succeeded.
    pub async fn fresh(&self) -> Result<FreshReport> {
        let reset = self.reset_all().await?;
        if !reset.success {
            return Ok(FreshReport {
                success: false,
                message: format!("Reset failed: {}", reset.message),
                reset,
                migrate: None,
            });
        }

        let migrate = self.run_pending().await?;
        Ok(FreshReport {
            success: migrate.success,
            message: migrate.message.clone(),
            reset,
            migrate: Some(migrate),
        })
    }

    /// State of every registered changeset, plus orphaned ledger rows.
    pub async fn status(&self) -> Result<StatusReport> {
        let applied = self.read_applied().await?;
        let mut by_name: HashMap<&str, &LedgerEntry> =
            applied.iter().map(|e| (e.name.as_str(), e)).collect();

        let entries = self
            .registry
            .iter()
            .map(|changeset| {
                let state = match by_name.remove(changeset.name()) {
                    Some(entry) => ChangesetState::Applied {
                        batch: entry.batch,
                        executed_at: entry.executed_at(),
                        execution_time_ms: entry.execution_time_ms,
                    },
                    None => ChangesetState::Pending,
                };
                StatusEntry {
                    name: changeset.name().to_string(),
                    state,
                }
            })
            .collect();

        let orphans = applied
            .iter()
            .filter(|e| by_name.contains_key(e.name.as_str()))
            .cloned()
            .collect();

        Ok(StatusReport { entries, orphans })
    }

    /// Ledger contents, oldest first.
    pub async fn applied(&self) -> Result<Vec<LedgerEntry>> {
        self.read_applied().await
    }

    /// Runs `down` for each name in order. `Err` carries the steps up to and
    /// including the failed one.
    async fn revert<'n>(
        &self,
        names: impl Iterator<Item = &'n str>,
    ) -> std::result::Result<Vec<StepReport>, Vec<StepReport>> {
        let mut steps = Vec::new();
        for name in names {
            let Some(changeset) = self.registry.get(name) else {
                let err = MigrationError::NotFound(name.to_string())
                    .in_changeset(name, Direction::Down);
                tracing::error!(changeset = name, "Applied changeset is not registered");
                steps.push(StepReport::failed(name, Direction::Down, err));
                return Err(steps);
            };

            match executor::execute(&self.backend, changeset, Direction::Down, 0, &self.guidelines)
                .await
            {
                Ok(duration) => steps.push(StepReport::succeeded(name, Direction::Down, duration)),
                Err(err) => {
                    steps.push(StepReport::failed(name, Direction::Down, err));
                    return Err(steps);
                }
            }
        }
        Ok(steps)
    }

    async fn read_applied(&self) -> Result<Vec<LedgerEntry>> {
        let mut conn = self.backend.connect().await?;
        let result = Ledger::new(&self.backend).applied(&mut conn).await;
        close_quietly(conn).await;
        result
    }

    async fn read_next_batch(&self) -> Result<i64> {
        let mut conn = self.backend.connect().await?;
        let result = Ledger::new(&self.backend).next_batch_number(&mut conn).await;
        close_quietly(conn).await;
        result
    }

    async fn read_last_batch(&self, conn: &mut Conn<B>) -> Result<(i64, Vec<LedgerEntry>)> {
        let ledger = Ledger::new(&self.backend);
        let batch = ledger.latest_batch(conn).await?;
        if batch == 0 {
            return Ok((0, Vec::new()));
        }
        Ok((batch, ledger.batch(conn, batch).await?))
    }
}

async fn close_quietly<C: Connection>(conn: C) {
    if let Err(err) = conn.close().await {
        tracing::warn!(error = %err, "Failed to close connection");
    }
}
