use super::{MigrationLogStore, StoreError};
use crate::executor::{DbError, DbExecutor};
use crate::migration::state_table::{initialize_log_table, prefixed_table, LOG_TABLE};
use crate::migration::{MigrationKey, MigrationRecord, SKIP_SENTINEL};
use chrono::{DateTime, Utc};
use may_postgres::Row;
use once_cell::sync::OnceCell;

/// Log store backed by a `{prefix}migration_logs` table.
///
/// The table is created on the first call that needs it (once per store
/// value; a failed attempt is retried on the next call).
pub struct PostgresLogStore<E: DbExecutor> {
    executor: E,
    table: String,
    provisioned: OnceCell<()>,
}

impl<E: DbExecutor> PostgresLogStore<E> {
    /// # Errors
    ///
    /// Returns `StoreError::InvalidIdentifier` if `table_prefix` is not a plain identifier fragment.
    pub fn new(executor: E, table_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            executor,
            table: prefixed_table(table_prefix, LOG_TABLE)?,
            provisioned: OnceCell::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn ensure_table(&self) -> Result<(), StoreError> {
        self.provisioned
            .get_or_try_init(|| initialize_log_table(&self.executor, &self.table))?;
        Ok(())
    }

    fn append(&self, key: &MigrationKey, success: bool, logs: &str) -> Result<(), StoreError> {
        self.ensure_table()?;
        let sql = format!(
            "INSERT INTO {} (namespace, migration, applied_at, success, logs) VALUES ($1, $2, $3, $4, $5)",
            self.table
        );
        let applied_at = Utc::now();
        self.executor.execute(
            &sql,
            &[&key.namespace, &key.name, &applied_at, &success, &logs],
        )?;
        Ok(())
    }
}

/// Expected column order: `id`, `namespace`, `migration`, `applied_at`, `success`, `logs`
fn record_from_row(row: &Row) -> Result<MigrationRecord, DbError> {
    Ok(MigrationRecord {
        id: row.try_get(0)?,
        namespace: row.try_get(1)?,
        name: row.try_get(2)?,
        applied_at: row.try_get::<_, DateTime<Utc>>(3)?,
        success: row.try_get(4)?,
        logs: row.try_get(5)?,
    })
}

impl<E: DbExecutor> MigrationLogStore for PostgresLogStore<E> {
    fn applied_keys(&self) -> Result<Vec<MigrationKey>, StoreError> {
        self.ensure_table()?;
        let sql = format!(
            "SELECT DISTINCT namespace, migration FROM {} WHERE success = true",
            self.table
        );
        let rows = self.executor.query_all(&sql, &[])?;
        rows.iter()
            .map(|row| -> Result<MigrationKey, StoreError> {
                let namespace: String = row.try_get(0).map_err(DbError::from)?;
                let name: String = row.try_get(1).map_err(DbError::from)?;
                Ok(MigrationKey::new(namespace, name))
            })
            .collect()
    }

    fn mark_applied(&self, key: &MigrationKey) -> Result<(), StoreError> {
        self.append(key, true, "")
    }

    fn mark_failed(&self, key: &MigrationKey, error_text: &str) -> Result<(), StoreError> {
        self.append(key, false, error_text)
    }

    fn mark_skipped(&self, key: &MigrationKey) -> Result<(), StoreError> {
        self.append(key, true, SKIP_SENTINEL)
    }

    fn history(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        self.ensure_table()?;
        let sql = format!(
            "SELECT id, namespace, migration, applied_at, success, logs FROM {} ORDER BY id ASC",
            self.table
        );
        let rows = self.executor.query_all(&sql, &[])?;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
