use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::Database;

use crate::error::Result;

/// Connection type of a backend's database.
pub type Conn<B> = <<B as Backend>::Database as Database>::Connection;

/// Connection type of a catalog's database.
pub type CatalogConn<C> = <<C as Catalog>::Database as Database>::Connection;

/// One row of the ledger table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub name: String,
    pub batch: i64,
    #[sqlx(rename = "executed_at")]
    pub executed_at_ms: i64, // unix millis, the backends disagree on datetime types
    pub execution_time_ms: Option<i64>,
    pub rollback_sql: Option<String>,
}

impl LedgerEntry {
    pub fn executed_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.executed_at_ms)
            .single()
            .unwrap_or_default()
    }
}

/// Values for a ledger row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry<'a> {
    pub name: &'a str,
    pub batch: i64,
    pub executed_at_ms: i64,
    pub execution_time_ms: i64,
    pub rollback_sql: Option<&'a str>,
}

/// Database connection and ledger storage for one database flavour.
///
/// The ledger primitives are raw statements against the ledger table; the
/// self-initialising contract lives in [`crate::ledger::Ledger`].
#[async_trait]
pub trait Backend: Send + Sync {
    type Database: Database;

    fn name(&self) -> &'static str;

    fn ledger_table(&self) -> &str {
        crate::DEFAULT_LEDGER_TABLE
    }

    /// Whether DDL statements take part in transactions. When they do, the
    /// ledger row of a reverted changeset is removed inside the same
    /// transaction as its `down`.
    fn supports_transactional_ddl(&self) -> bool;

    /// Open a dedicated, unpooled connection.
    async fn connect(&self) -> Result<Conn<Self>>;

    async fn create_ledger(&self, conn: &mut Conn<Self>) -> Result<()>;

    /// All rows, in insertion order.
    async fn select_applied(&self, conn: &mut Conn<Self>) -> Result<Vec<LedgerEntry>>;

    /// Rows of one batch, most recently inserted first.
    async fn select_batch(&self, conn: &mut Conn<Self>, batch: i64) -> Result<Vec<LedgerEntry>>;

    /// Highest batch number, `0` when the ledger is empty.
    async fn max_batch(&self, conn: &mut Conn<Self>) -> Result<i64>;

    async fn count_name(&self, conn: &mut Conn<Self>, name: &str) -> Result<i64>;

    async fn insert_entry(&self, conn: &mut Conn<Self>, entry: &NewLedgerEntry<'_>) -> Result<()>;

    async fn delete_entry(&self, conn: &mut Conn<Self>, name: &str) -> Result<u64>;
}

/// Column facts as reported by the database catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDefinition {
    pub data_type: String,
    pub nullable: bool,
}

/// Live catalog metadata and DDL text for one database flavour.
///
/// The `has_*` methods report query failures as errors; the fail-safe
/// variants live in [`crate::probe`].
#[async_trait]
pub trait Catalog: Send + Sync {
    type Database: Database;

    fn name(&self) -> &'static str;

    /// Run one or more raw statements, returning the affected row count.
    async fn execute(&self, conn: &mut CatalogConn<Self>, sql: &str) -> Result<u64>;

    async fn has_table(&self, conn: &mut CatalogConn<Self>, table: &str) -> Result<bool>;

    async fn has_column(
        &self,
        conn: &mut CatalogConn<Self>,
        table: &str,
        column: &str,
    ) -> Result<bool>;

    async fn has_index(
        &self,
        conn: &mut CatalogConn<Self>,
        table: &str,
        index: &str,
    ) -> Result<bool>;

    async fn has_foreign_key(
        &self,
        conn: &mut CatalogConn<Self>,
        table: &str,
        constraint: &str,
    ) -> Result<bool>;

    async fn column_definition(
        &self,
        conn: &mut CatalogConn<Self>,
        table: &str,
        column: &str,
    ) -> Result<Option<ColumnDefinition>>;

    fn add_column_sql(&self, table: &str, column: &str, definition: &str) -> Result<String> {
        Ok(format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"))
    }

    fn create_index_sql(
        &self,
        table: &str,
        index: &str,
        definition: &str,
        unique: bool,
    ) -> Result<String> {
        let kind = if unique { "UNIQUE INDEX" } else { "INDEX" };
        Ok(format!("CREATE {kind} {index} ON {table} {definition}"))
    }

    fn add_foreign_key_sql(
        &self,
        table: &str,
        constraint: &str,
        definition: &str,
    ) -> Result<String> {
        Ok(format!("ALTER TABLE {table} ADD CONSTRAINT {constraint} {definition}"))
    }

    fn modify_column_sql(&self, table: &str, column: &str, definition: &str) -> Result<String> {
        Ok(format!("ALTER TABLE {table} MODIFY COLUMN {column} {definition}"))
    }
}
