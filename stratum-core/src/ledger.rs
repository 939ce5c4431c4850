use crate::backend::{Backend, Conn, LedgerEntry, NewLedgerEntry};
use crate::error::Result;

/// The persisted record of applied changesets.
///
/// The read operations first make sure the ledger table exists, so a brand
/// new database needs no separate provisioning step. Rows are inserted when a
/// changeset is applied and deleted when it is reverted, never updated.
///
/// [`record`](Self::record) and [`erase`](Self::erase) run inside the
/// changeset transaction and assume [`ensure_exists`](Self::ensure_exists)
/// already ran on the connection. On MySQL the `CREATE TABLE` issued by
/// `ensure_exists` commits implicitly, so it must not run mid-transaction.
pub struct Ledger<'a, B: Backend> {
    backend: &'a B,
}

impl<'a, B: Backend> Ledger<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    pub async fn ensure_exists(&self, conn: &mut Conn<B>) -> Result<()> {
        self.backend.create_ledger(conn).await
    }

    /// Applied changesets, in the order they were recorded.
    pub async fn applied(&self, conn: &mut Conn<B>) -> Result<Vec<LedgerEntry>> {
        self.ensure_exists(conn).await?;
        self.backend.select_applied(conn).await
    }

    /// Members of `batch`, most recently applied first.
    pub async fn batch(&self, conn: &mut Conn<B>, batch: i64) -> Result<Vec<LedgerEntry>> {
        self.ensure_exists(conn).await?;
        self.backend.select_batch(conn, batch).await
    }

    pub async fn next_batch_number(&self, conn: &mut Conn<B>) -> Result<i64> {
        Ok(self.latest_batch(conn).await? + 1)
    }

    /// Highest batch number present, `0` when nothing is applied.
    pub async fn latest_batch(&self, conn: &mut Conn<B>) -> Result<i64> {
        self.ensure_exists(conn).await?;
        self.backend.max_batch(conn).await
    }

    pub async fn is_applied(&self, conn: &mut Conn<B>, name: &str) -> Result<bool> {
        self.ensure_exists(conn).await?;
        Ok(self.backend.count_name(conn, name).await? > 0)
    }

    pub async fn record(&self, conn: &mut Conn<B>, entry: &NewLedgerEntry<'_>) -> Result<()> {
        self.backend.insert_entry(conn, entry).await
    }

    pub async fn erase(&self, conn: &mut Conn<B>, name: &str) -> Result<()> {
        let removed = self.backend.delete_entry(conn, name).await?;
        if removed == 0 {
            tracing::warn!(changeset = name, "No ledger row to erase");
        }
        Ok(())
    }
}
