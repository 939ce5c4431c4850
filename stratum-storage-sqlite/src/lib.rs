//! SQLite backend for stratum.
//!
//! SQLite runs DDL inside transactions, so a reverted changeset and the
//! removal of its ledger row always commit together.
mod catalog;
mod ledger;

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Sqlite};
use stratum_core::backend::{Backend, LedgerEntry, NewLedgerEntry};
use stratum_core::{DEFAULT_LEDGER_TABLE, MigrationError, is_identifier};

pub use catalog::SqliteCatalog;

pub struct SqliteBackend {
    options: SqliteConnectOptions,
    ledger_table: String,
}

impl SqliteBackend {
    pub fn new(options: SqliteConnectOptions) -> Self {
        Self {
            options,
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }

    /// Backend for a database URL such as `sqlite://app.db`. The file is
    /// created if missing.
    pub fn from_url(url: &str) -> Result<Self, MigrationError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        Ok(Self::new(options))
    }

    /// Backend for a database file, created if missing.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::new(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        )
    }

    /// Records applied changesets in `table` instead of
    /// [`DEFAULT_LEDGER_TABLE`]. The name is spliced into SQL text, so only
    /// plain identifiers are accepted.
    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Result<Self, MigrationError> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(MigrationError::InvalidLedgerTable(table));
        }
        self.ledger_table = table;
        Ok(self)
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    type Database = Sqlite;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn ledger_table(&self) -> &str {
        &self.ledger_table
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<SqliteConnection, MigrationError> {
        Ok(self.options.connect().await?)
    }

    async fn create_ledger(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        ledger::create(conn, &self.ledger_table).await
    }

    async fn select_applied(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<LedgerEntry>, MigrationError> {
        ledger::select_applied(conn, &self.ledger_table).await
    }

    async fn select_batch(
        &self,
        conn: &mut SqliteConnection,
        batch: i64,
    ) -> Result<Vec<LedgerEntry>, MigrationError> {
        ledger::select_batch(conn, &self.ledger_table, batch).await
    }

    async fn max_batch(&self, conn: &mut SqliteConnection) -> Result<i64, MigrationError> {
        ledger::max_batch(conn, &self.ledger_table).await
    }

    async fn count_name(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<i64, MigrationError> {
        ledger::count_name(conn, &self.ledger_table, name).await
    }

    async fn insert_entry(
        &self,
        conn: &mut SqliteConnection,
        entry: &NewLedgerEntry<'_>,
    ) -> Result<(), MigrationError> {
        ledger::insert(conn, &self.ledger_table, entry).await
    }

    async fn delete_entry(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<u64, MigrationError> {
        ledger::delete(conn, &self.ledger_table, name).await
    }
}
