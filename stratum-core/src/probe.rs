//! Fail-safe existence probes.
//!
//! Each probe reads the catalog live on every call. A probe query that fails
//! (lost connection, missing privileges) is logged and reported as "does not
//! exist", so the caller attempts the creation and the database itself
//! reports a duplicate if the object was there after all.

use crate::backend::{Catalog, CatalogConn};

pub async fn table_exists<C: Catalog>(catalog: &C, conn: &mut CatalogConn<C>, table: &str) -> bool {
    match catalog.has_table(conn, table).await {
        Ok(exists) => exists,
        Err(err) => {
            tracing::error!(table, error = %err, "Table probe failed, assuming absent");
            false
        }
    }
}

pub async fn column_exists<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    column: &str,
) -> bool {
    match catalog.has_column(conn, table, column).await {
        Ok(exists) => exists,
        Err(err) => {
            tracing::error!(table, column, error = %err, "Column probe failed, assuming absent");
            false
        }
    }
}

pub async fn index_exists<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    index: &str,
) -> bool {
    match catalog.has_index(conn, table, index).await {
        Ok(exists) => exists,
        Err(err) => {
            tracing::error!(table, index, error = %err, "Index probe failed, assuming absent");
            false
        }
    }
}

pub async fn foreign_key_exists<C: Catalog>(
    catalog: &C,
    conn: &mut CatalogConn<C>,
    table: &str,
    constraint: &str,
) -> bool {
    match catalog.has_foreign_key(conn, table, constraint).await {
        Ok(exists) => exists,
        Err(err) => {
            tracing::error!(
                table,
                constraint,
                error = %err,
                "Foreign key probe failed, assuming absent"
            );
            false
        }
    }
}
