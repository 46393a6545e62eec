use super::{LeaseToken, LockError, LockLease, LockProvider};
use crate::executor::{DbError, DbExecutor};
use crate::migration::state_table::{initialize_lock_table, prefixed_table, LOCK_TABLE};
use once_cell::sync::OnceCell;
use std::time::Duration;

/// Lease-table lock in PostgreSQL.
///
/// Holding the lock means owning an unexpired row in `{prefix}migration_locks`.
/// Expiry is computed with the server's clock, so instances with skewed
/// clocks still agree. An expired row is taken over in the same
/// `INSERT ... ON CONFLICT` statement that acquires a fresh one.
pub struct PostgresLockProvider<E: DbExecutor> {
    executor: E,
    table: String,
    provisioned: OnceCell<()>,
}

impl<E: DbExecutor> PostgresLockProvider<E> {
    /// # Errors
    ///
    /// Returns `LockError::Invalid` if `table_prefix` is not a plain identifier fragment.
    pub fn new(executor: E, table_prefix: &str) -> Result<Self, LockError> {
        let table = prefixed_table(table_prefix, LOCK_TABLE).map_err(|e| LockError::Invalid(e.to_string()))?;
        Ok(Self {
            executor,
            table,
            provisioned: OnceCell::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn ensure_table(&self) -> Result<(), LockError> {
        self.provisioned
            .get_or_try_init(|| initialize_lock_table(&self.executor, &self.table))?;
        Ok(())
    }
}

impl<E: DbExecutor> LockProvider for PostgresLockProvider<E> {
    fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        if ttl.is_zero() {
            return Err(LockError::Invalid("ttl must be positive".to_string()));
        }
        self.ensure_table()?;

        let lease = LockLease::new(key, ttl);
        let sql = format!(
            r#"
            INSERT INTO {t} (lock_key, token, acquired_at, expires_at)
            VALUES ($1, $2, NOW(), NOW() + make_interval(secs => $3))
            ON CONFLICT (lock_key) DO UPDATE
            SET token = EXCLUDED.token,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE {t}.expires_at <= NOW()
            "#,
            t = self.table
        );
        let secs = ttl.as_secs_f64();
        let rows = self
            .executor
            .execute(&sql, &[&lease.key, &lease.token.as_str(), &secs])?;

        // 0 rows: the conflicting row is still live
        Ok((rows > 0).then_some(lease))
    }

    fn renew(&self, lease: &LockLease) -> Result<bool, LockError> {
        self.ensure_table()?;
        let sql = format!(
            "UPDATE {} SET expires_at = NOW() + make_interval(secs => $3) \
             WHERE lock_key = $1 AND token = $2 AND expires_at > NOW()",
            self.table
        );
        let secs = lease.ttl.as_secs_f64();
        let rows = self
            .executor
            .execute(&sql, &[&lease.key, &lease.token.as_str(), &secs])?;
        Ok(rows == 1)
    }

    fn release(&self, lease: &LockLease) -> Result<bool, LockError> {
        self.ensure_table()?;
        // An expired row is left for the next acquirer to take over
        let sql = format!(
            "DELETE FROM {} WHERE lock_key = $1 AND token = $2 AND expires_at > NOW()",
            self.table
        );
        let rows = self.executor.execute(&sql, &[&lease.key, &lease.token.as_str()])?;
        Ok(rows == 1)
    }

    fn holder(&self, key: &str) -> Result<Option<LeaseToken>, LockError> {
        self.ensure_table()?;
        let sql = format!(
            "SELECT token FROM {} WHERE lock_key = $1 AND expires_at > NOW()",
            self.table
        );
        let rows = self.executor.query_all(&sql, &[&key])?;
        match rows.first() {
            Some(row) => {
                let token: String = row.try_get(0).map_err(DbError::from)?;
                Ok(Some(LeaseToken::from(token)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use may_postgres::types::ToSql;
    use may_postgres::Row;

    struct Unreachable;

    impl DbExecutor for Unreachable {
        fn execute(&self, _query: &str, _params: &[&dyn ToSql]) -> Result<u64, DbError> {
            Err(DbError::Other("connection refused".to_string()))
        }

        fn query_all(&self, _query: &str, _params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
            Err(DbError::Other("connection refused".to_string()))
        }
    }

    #[test]
    fn test_rejects_bad_prefix() {
        assert!(matches!(
            PostgresLockProvider::new(Unreachable, "bad-prefix"),
            Err(LockError::Invalid(_))
        ));
        assert!(matches!(
            PostgresLockProvider::new(Unreachable, "Aira_"),
            Err(LockError::Invalid(_))
        ));
    }

    #[test]
    fn test_backend_failure_is_error_not_contention() {
        let provider = PostgresLockProvider::new(Unreachable, "aira_").unwrap();
        assert_eq!(provider.table(), "aira_migration_locks");
        assert!(matches!(
            provider.try_acquire("migrate_lock", Duration::from_secs(60)),
            Err(LockError::Database(_))
        ));
    }
}
