use sqlx::SqliteConnection;
use stratum_core::MigrationError;
use stratum_core::backend::{LedgerEntry, NewLedgerEntry};

const COLUMNS: &str = "id, name, batch, executed_at, execution_time_ms, rollback_sql";

pub(crate) async fn create(conn: &mut SqliteConnection, table: &str) -> Result<(), MigrationError> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            batch INTEGER NOT NULL,
            executed_at INTEGER NOT NULL,
            execution_time_ms INTEGER,
            rollback_sql TEXT
        )"#
    ))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn select_applied(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<LedgerEntry>, MigrationError> {
    let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
        "SELECT {COLUMNS} FROM {table} ORDER BY id ASC"
    ))
    .fetch_all(&mut *conn)
    .await?;
    Ok(entries)
}

pub(crate) async fn select_batch(
    conn: &mut SqliteConnection,
    table: &str,
    batch: i64,
) -> Result<Vec<LedgerEntry>, MigrationError> {
    let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
        "SELECT {COLUMNS} FROM {table} WHERE batch = ? ORDER BY id DESC"
    ))
    .bind(batch)
    .fetch_all(&mut *conn)
    .await?;
    Ok(entries)
}

pub(crate) async fn max_batch(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<i64, MigrationError> {
    let batch: i64 = sqlx::query_scalar(&format!("SELECT COALESCE(MAX(batch), 0) FROM {table}"))
        .fetch_one(&mut *conn)
        .await?;
    Ok(batch)
}

pub(crate) async fn count_name(
    conn: &mut SqliteConnection,
    table: &str,
    name: &str,
) -> Result<i64, MigrationError> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE name = ?"))
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    table: &str,
    entry: &NewLedgerEntry<'_>,
) -> Result<(), MigrationError> {
    sqlx::query(&format!(
        "INSERT INTO {table} (name, batch, executed_at, execution_time_ms, rollback_sql) \
         VALUES (?, ?, ?, ?, ?)"
    ))
    .bind(entry.name)
    .bind(entry.batch)
    .bind(entry.executed_at_ms)
    .bind(entry.execution_time_ms)
    .bind(entry.rollback_sql)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete(
    conn: &mut SqliteConnection,
    table: &str,
    name: &str,
) -> Result<u64, MigrationError> {
    let result = sqlx::query(&format!("DELETE FROM {table} WHERE name = ?"))
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
