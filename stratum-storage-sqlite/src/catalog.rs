use async_trait::async_trait;
use regex::Regex;
use sqlx::{Sqlite, SqliteConnection};
use stratum_core::MigrationError;
use stratum_core::backend::{Catalog, ColumnDefinition};

/// Schema metadata read from `sqlite_master` and the `pragma_*` table-valued
/// functions.
///
/// SQLite cannot add constraints to, or change the type of, an existing
/// column; the corresponding helpers report [`MigrationError::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteCatalog;

#[async_trait]
impl Catalog for SqliteCatalog {
    type Database = Sqlite;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, conn: &mut SqliteConnection, sql: &str) -> Result<u64, MigrationError> {
        let result = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }

    async fn has_table(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
    ) -> Result<bool, MigrationError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    async fn has_column(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        column: &str,
    ) -> Result<bool, MigrationError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
                .bind(table)
                .bind(column)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count > 0)
    }

    async fn has_index(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        index: &str,
    ) -> Result<bool, MigrationError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name = ?",
        )
        .bind(table)
        .bind(index)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    /// Foreign keys are unnamed in `pragma_foreign_key_list`, so the table's
    /// stored `CREATE TABLE` text is searched for the named constraint.
    async fn has_foreign_key(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        constraint: &str,
    ) -> Result<bool, MigrationError> {
        let sql: Option<String> =
            sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&mut *conn)
                .await?;

        let Some(sql) = sql else {
            return Ok(false);
        };

        let pattern = format!(
            r#"(?i)\bCONSTRAINT\s+["`\[]?{}["`\]]?\s+FOREIGN\s+KEY\b"#,
            regex::escape(constraint)
        );
        let regex = Regex::new(&pattern)
            .map_err(|e| MigrationError::Migration(format!("Invalid constraint name: {e}")))?;
        Ok(regex.is_match(&sql))
    }

    async fn column_definition(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        column: &str,
    ) -> Result<Option<ColumnDefinition>, MigrationError> {
        let row: Option<(String, i64)> =
            sqlx::query_as(r#"SELECT type, "notnull" FROM pragma_table_info(?) WHERE name = ?"#)
                .bind(table)
                .bind(column)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(row.map(|(data_type, not_null)| ColumnDefinition {
            data_type,
            nullable: not_null == 0,
        }))
    }

    fn add_foreign_key_sql(
        &self,
        _table: &str,
        _constraint: &str,
        _definition: &str,
    ) -> Result<String, MigrationError> {
        Err(MigrationError::Unsupported {
            backend: "sqlite",
            operation: "ALTER TABLE ... ADD CONSTRAINT",
        })
    }

    fn modify_column_sql(
        &self,
        _table: &str,
        _column: &str,
        _definition: &str,
    ) -> Result<String, MigrationError> {
        Err(MigrationError::Unsupported {
            backend: "sqlite",
            operation: "ALTER TABLE ... MODIFY COLUMN",
        })
    }
}
