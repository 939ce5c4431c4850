//! Idempotent DDL helpers.
//!
//! Every helper pairs one probe from [`crate::probe`] with one conditional
//! statement. Only the probe is fail-safe: an error from the statement itself
//! is returned to the caller unchanged.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::backend::{Catalog, CatalogConn, ColumnDefinition};
use crate::error::Result;
use crate::probe;

/// Whether a helper changed the schema, and what it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DdlOutcome {
    pub applied: bool,
    pub message: String,
}

impl DdlOutcome {
    fn applied(message: String) -> Self {
        tracing::info!("{message}");
        Self {
            applied: true,
            message,
        }
    }

    fn skipped(message: String) -> Self {
        tracing::debug!("{message}");
        Self {
            applied: false,
            message,
        }
    }
}

/// Runs `ddl` verbatim when `table` is absent.
pub async fn create_table_if_not_exists<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    ddl: &str,
) -> Result<DdlOutcome> {
    if probe::table_exists(catalog, conn, table).await {
        return Ok(DdlOutcome::skipped(format!("Table {table} already exists")));
    }
    catalog.execute(conn, ddl).await?;
    Ok(DdlOutcome::applied(format!("Created table {table}")))
}

/// `definition` is everything after the column name, e.g. `INT NOT NULL DEFAULT 0`.
pub async fn add_column_if_not_exists<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<DdlOutcome> {
    if probe::column_exists(catalog, conn, table, column).await {
        return Ok(DdlOutcome::skipped(format!("Column {table}.{column} already exists")));
    }
    let sql = catalog.add_column_sql(table, column, definition)?;
    catalog.execute(conn, &sql).await?;
    Ok(DdlOutcome::applied(format!("Added column {table}.{column}")))
}

/// `definition` is the column list, e.g. `(user_id, created_at)`.
pub async fn create_index_if_not_exists<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    index: &str,
    definition: &str,
) -> Result<DdlOutcome> {
    create_index(catalog, conn, table, index, definition, false).await
}

pub async fn create_unique_index_if_not_exists<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    index: &str,
    definition: &str,
) -> Result<DdlOutcome> {
    create_index(catalog, conn, table, index, definition, true).await
}

async fn create_index<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    index: &str,
    definition: &str,
    unique: bool,
) -> Result<DdlOutcome> {
    if probe::index_exists(catalog, conn, table, index).await {
        return Ok(DdlOutcome::skipped(format!("Index {index} on {table} already exists")));
    }
    let sql = catalog.create_index_sql(table, index, definition, unique)?;
    catalog.execute(conn, &sql).await?;
    Ok(DdlOutcome::applied(format!("Created index {index} on {table}")))
}

/// `definition` is the constraint body, e.g.
/// `FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE`.
pub async fn add_foreign_key_if_not_exists<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    constraint: &str,
    definition: &str,
) -> Result<DdlOutcome> {
    if probe::foreign_key_exists(catalog, conn, table, constraint).await {
        return Ok(DdlOutcome::skipped(format!(
            "Foreign key {constraint} on {table} already exists"
        )));
    }
    let sql = catalog.add_foreign_key_sql(table, constraint, definition)?;
    catalog.execute(conn, &sql).await?;
    Ok(DdlOutcome::applied(format!("Added foreign key {constraint} on {table}")))
}

/// Re-issues `MODIFY COLUMN` only when the column's current type or
/// nullability differs from `definition`. An absent column is left alone.
pub async fn modify_column_if_different<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<DdlOutcome> {
    let current = match catalog.column_definition(conn, table, column).await {
        Ok(Some(current)) => current,
        Ok(None) => {
            return Ok(DdlOutcome::skipped(format!("Column {table}.{column} does not exist")));
        }
        Err(err) => {
            tracing::error!(table, column, error = %err, "Column probe failed, assuming absent");
            return Ok(DdlOutcome::skipped(format!(
                "Column {table}.{column} could not be inspected"
            )));
        }
    };

    let requested = requested_definition(definition);
    if same_definition(&current, &requested) {
        return Ok(DdlOutcome::skipped(format!(
            "Column {table}.{column} already matches {definition}"
        )));
    }

    let sql = catalog.modify_column_sql(table, column, definition)?;
    catalog.execute(conn, &sql).await?;
    Ok(DdlOutcome::applied(format!(
        "Modified column {table}.{column} from {} to {}",
        current.data_type, requested.data_type
    )))
}

/// Words that end the type portion of a column definition.
const CONSTRAINT_WORDS: &[&str] = &[
    "not",
    "null",
    "default",
    "primary",
    "unique",
    "key",
    "auto_increment",
    "autoincrement",
    "comment",
    "references",
    "check",
    "collate",
    "character",
    "charset",
    "generated",
    "as",
    "on",
    "constraint",
];

static INT_WIDTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(tinyint|smallint|mediumint|int|bigint)\(\d+\)")
        .expect("Invalid integer width pattern")
});

static PAREN_SPACING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*([(,])\s*|\s*(\))").expect("Invalid spacing pattern")
});

/// Parses the type and nullability out of a requested column clause.
pub(crate) fn requested_definition(definition: &str) -> ColumnDefinition {
    let compact = PAREN_SPACING
        .replace_all(definition.trim(), "${1}${2}")
        .to_lowercase();
    let tokens: Vec<&str> = compact.split_whitespace().collect();

    let type_tokens: Vec<&str> = tokens
        .iter()
        .take_while(|t| !CONSTRAINT_WORDS.contains(*t))
        .copied()
        .collect();

    let not_null = tokens.windows(2).any(|w| w == ["not", "null"])
        || tokens.windows(2).any(|w| w == ["primary", "key"]);

    ColumnDefinition {
        data_type: normalize_type(&type_tokens.join(" ")),
        nullable: !not_null,
    }
}

/// Canonical spelling of a column type for comparison.
pub(crate) fn normalize_type(raw: &str) -> String {
    let compact = PAREN_SPACING.replace_all(raw.trim(), "${1}${2}").to_lowercase();
    let words: Vec<String> = compact
        .split_whitespace()
        .map(|word| match word {
            "integer" => "int".to_string(),
            "bool" | "boolean" => "tinyint".to_string(),
            other => other.to_string(),
        })
        .collect();
    INT_WIDTH.replace_all(&words.join(" "), "$1").into_owned()
}

fn same_definition(current: &ColumnDefinition, requested: &ColumnDefinition) -> bool {
    normalize_type(&current.data_type) == requested.data_type
        && current.nullable == requested.nullable
}
