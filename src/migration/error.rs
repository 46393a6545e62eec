//! Migration-specific error types

use crate::connection::ConnectionError;
use crate::migration::lock::LockError;
use crate::migration::store::StoreError;
use std::time::Duration;

/// Which bookkeeping write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    Applied,
    Skipped,
}

impl std::fmt::Display for RecordOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordOp::Applied => f.write_str("applied"),
            RecordOp::Skipped => f.write_str("skipped"),
        }
    }
}

/// Everything that can stop an orchestration run or reject a registration.
///
/// Callers usually treat any of these as fatal to application startup; the
/// exception is [`MigrationError::AlreadyRunning`], which only means another
/// instance won the lock (see [`MigrationError::is_contention`]).
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Same `(namespace, name)` registered twice
    #[error("migration {key} is already registered")]
    DuplicateMigration { key: String },

    /// Registration rejected: empty or malformed identity
    #[error("invalid migration '{namespace}:{name}': {reason}")]
    InvalidMigration {
        namespace: String,
        name: String,
        reason: String,
    },

    /// The lock provider itself failed
    #[error("failed to acquire migration lock: {0}")]
    LockAcquire(#[source] LockError),

    /// Another holder owns the lock; expected under concurrent startup
    #[error("migration is already running (lock '{lock_key}' is held by another instance)")]
    AlreadyRunning { lock_key: String },

    /// Lease expired or was taken over before the run finished
    #[error("migration lock '{lock_key}' was lost before {key} could start")]
    LeaseLost { lock_key: String, key: String },

    #[error("failed to renew migration lock: {0}")]
    LockRenew(#[source] LockError),

    #[error("failed to release migration lock: {0}")]
    LockRelease(#[source] LockError),

    #[error("failed to get applied migrations: {0}")]
    History(#[source] StoreError),

    /// Writing an applied/skipped record failed
    #[error("failed to mark migration {key} as {op}: {source}")]
    Bookkeeping {
        key: String,
        op: RecordOp,
        #[source]
        source: StoreError,
    },

    /// The migration body returned an error or panicked
    #[error("migration {key} failed: {message}")]
    Failed { key: String, message: String },

    /// The migration body exceeded its deadline
    #[error("migration {key} timed out after {timeout:?}")]
    TimedOut { key: String, timeout: Duration },

    /// A schema sync hook failed
    #[error("schema sync '{name}' failed: {message}")]
    SchemaSync { name: String, message: String },

    /// Building a default backend failed
    #[error("failed to connect migration backend: {0}")]
    Connection(#[from] ConnectionError),

    #[error("invalid migration configuration: {0}")]
    Config(String),
}

impl MigrationError {
    /// `true` when the run was refused because another instance holds the lock.
    ///
    /// No state was touched in that case; the caller may retry or simply let
    /// the winning instance finish.
    pub fn is_contention(&self) -> bool {
        matches!(self, MigrationError::AlreadyRunning { .. })
    }

    /// `true` when a migration body itself failed (error, panic or timeout),
    /// as opposed to the surrounding infrastructure.
    pub fn is_migration_failure(&self) -> bool {
        matches!(self, MigrationError::Failed { .. } | MigrationError::TimedOut { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_is_distinguishable() {
        let err = MigrationError::AlreadyRunning {
            lock_key: "migrate_lock".to_string(),
        };
        assert!(err.is_contention());
        assert!(!err.is_migration_failure());
        assert!(err.to_string().contains("already running"));
    }

    #[test]
    fn test_bookkeeping_display_names_operation() {
        let err = MigrationError::Bookkeeping {
            key: "app:seed".to_string(),
            op: RecordOp::Skipped,
            source: StoreError::Poisoned,
        };
        let msg = err.to_string();
        assert!(msg.contains("app:seed"));
        assert!(msg.contains("as skipped"));
    }

    #[test]
    fn test_timeout_counts_as_migration_failure() {
        let err = MigrationError::TimedOut {
            key: "app:backfill".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_migration_failure());
        assert!(!err.is_contention());
    }
}
