use async_trait::async_trait;
use sqlx::{MySql, MySqlConnection};
use stratum_core::MigrationError;
use stratum_core::backend::{Catalog, ColumnDefinition};

/// Schema metadata from `information_schema`, scoped to the connection's
/// current database.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlCatalog;

#[async_trait]
impl Catalog for MySqlCatalog {
    type Database = MySql;

    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn execute(&self, conn: &mut MySqlConnection, sql: &str) -> Result<u64, MigrationError> {
        let result = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }

    async fn has_table(
        &self,
        conn: &mut MySqlConnection,
        table: &str,
    ) -> Result<bool, MigrationError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            "#,
        )
        .bind(table)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    async fn has_column(
        &self,
        conn: &mut MySqlConnection,
        table: &str,
        column: &str,
    ) -> Result<bool, MigrationError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?
            "#,
        )
        .bind(table)
        .bind(column)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    async fn has_index(
        &self,
        conn: &mut MySqlConnection,
        table: &str,
        index: &str,
    ) -> Result<bool, MigrationError> {
        // STATISTICS has one row per indexed column.
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME = ?
            "#,
        )
        .bind(table)
        .bind(index)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    async fn has_foreign_key(
        &self,
        conn: &mut MySqlConnection,
        table: &str,
        constraint: &str,
    ) -> Result<bool, MigrationError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM information_schema.TABLE_CONSTRAINTS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
              AND CONSTRAINT_NAME = ? AND CONSTRAINT_TYPE = 'FOREIGN KEY'
            "#,
        )
        .bind(table)
        .bind(constraint)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    async fn column_definition(
        &self,
        conn: &mut MySqlConnection,
        table: &str,
        column: &str,
    ) -> Result<Option<ColumnDefinition>, MigrationError> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT CAST(COLUMN_TYPE AS CHAR), CAST(IS_NULLABLE AS CHAR)
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?
            "#,
        )
        .bind(table)
        .bind(column)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|(data_type, is_nullable)| ColumnDefinition {
            data_type,
            nullable: is_nullable.eq_ignore_ascii_case("YES"),
        }))
    }
}
