//! DDL for the PostgreSQL backends' own tables
//!
//! Both tables are created on first use with `IF NOT EXISTS`, so the store can
//! be pointed at an empty database.

use crate::executor::{DbError, DbExecutor};
use sea_query::{Alias, ColumnDef, PostgresQueryBuilder, Table, TableCreateStatement};

pub const LOG_TABLE: &str = "migration_logs";
pub const LOCK_TABLE: &str = "migration_locks";

/// Width of the `namespace` and `migration` columns, in characters.
pub const MAX_KEY_PART_LEN: u32 = 120;

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid table prefix '{0}': use lowercase ASCII letters, digits and '_', not starting with a digit")]
pub struct InvalidTablePrefix(pub String);

/// `prefix + base`, rejecting anything that is not a plain identifier fragment.
///
/// Table names are interpolated into SQL, so this is the only thing standing
/// between configuration and the statement text. Names stay lowercase: the
/// DDL quotes them while the other statements rely on PostgreSQL folding
/// unquoted identifiers, and both must resolve to the same table.
pub fn prefixed_table(prefix: &str, base: &str) -> Result<String, InvalidTablePrefix> {
    let valid = prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !prefix.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(InvalidTablePrefix(prefix.to_string()));
    }
    Ok(format!("{prefix}{base}"))
}

/// Append-only audit table: one row per attempt, skip or success.
pub fn create_log_table(table: &str) -> TableCreateStatement {
    Table::create()
        .table(Alias::new(table.to_string()))
        .if_not_exists()
        .col(
            ColumnDef::new("id")
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key()
        )
        .col(
            ColumnDef::new("migration")
                .string_len(MAX_KEY_PART_LEN)
                .not_null()
        )
        .col(
            ColumnDef::new("namespace")
                .string_len(MAX_KEY_PART_LEN)
                .not_null()
                .default(crate::migration::DEFAULT_NAMESPACE)
        )
        .col(
            ColumnDef::new("applied_at")
                .timestamp_with_time_zone()
                .not_null()
        )
        .col(
            ColumnDef::new("logs")
                .text()
                .not_null()
                .default("")
        )
        .col(
            ColumnDef::new("success")
                .boolean()
                .not_null()
        )
        .to_owned()
}

/// One row per held lock; expiry is evaluated with the server's `NOW()`.
pub fn create_lock_table(table: &str) -> TableCreateStatement {
    Table::create()
        .table(Alias::new(table.to_string()))
        .if_not_exists()
        .col(
            ColumnDef::new("lock_key")
                .string_len(120)
                .not_null()
                .primary_key()
        )
        .col(
            ColumnDef::new("token")
                .string_len(64)
                .not_null()
        )
        .col(
            ColumnDef::new("acquired_at")
                .timestamp_with_time_zone()
                .not_null()
        )
        .col(
            ColumnDef::new("expires_at")
                .timestamp_with_time_zone()
                .not_null()
        )
        .to_owned()
}

/// Creates the log table and its lookup index if missing.
pub fn initialize_log_table(executor: &dyn DbExecutor, table: &str) -> Result<(), DbError> {
    let sql = create_log_table(table).to_string(PostgresQueryBuilder);
    executor.execute(&sql, &[])?;

    let index_sql = format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_key ON {table} (namespace, migration)"
    );
    executor.execute(&index_sql, &[])?;

    Ok(())
}

/// Creates the lock table if missing.
pub fn initialize_lock_table(executor: &dyn DbExecutor, table: &str) -> Result<(), DbError> {
    let sql = create_lock_table(table).to_string(PostgresQueryBuilder);
    executor.execute(&sql, &[])?;
    Ok(())
}
