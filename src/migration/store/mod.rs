//! Durable migration history

mod memory;
mod postgres;

pub use self::memory::InMemoryLogStore;
pub use self::postgres::PostgresLogStore;

use crate::executor::DbError;
use crate::migration::state_table::InvalidTablePrefix;
use crate::migration::{MigrationKey, MigrationRecord};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidTablePrefix),
    #[error("migration log poisoned by a panicking writer")]
    Poisoned,
}

/// Append-only record of every migration attempt.
///
/// Implementations must create whatever persistence they need on first use:
/// [`applied_keys`](Self::applied_keys) is the first call of every run and
/// may hit an empty database.
pub trait MigrationLogStore {
    /// Every key with at least one successful (applied or skipped) record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if history cannot be read.
    fn applied_keys(&self) -> Result<Vec<MigrationKey>, StoreError>;

    /// Appends `success = true`, empty logs.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record cannot be written.
    fn mark_applied(&self, key: &MigrationKey) -> Result<(), StoreError>;

    /// Appends `success = false` with the error and execution log.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record cannot be written.
    fn mark_failed(&self, key: &MigrationKey, error_text: &str) -> Result<(), StoreError>;

    /// Appends `success = true`, logs `"skip"`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record cannot be written.
    fn mark_skipped(&self, key: &MigrationKey) -> Result<(), StoreError>;

    /// Every record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if history cannot be read.
    fn history(&self) -> Result<Vec<MigrationRecord>, StoreError>;
}

impl<T: MigrationLogStore + ?Sized> MigrationLogStore for Arc<T> {
    fn applied_keys(&self) -> Result<Vec<MigrationKey>, StoreError> {
        (**self).applied_keys()
    }

    fn mark_applied(&self, key: &MigrationKey) -> Result<(), StoreError> {
        (**self).mark_applied(key)
    }

    fn mark_failed(&self, key: &MigrationKey, error_text: &str) -> Result<(), StoreError> {
        (**self).mark_failed(key, error_text)
    }

    fn mark_skipped(&self, key: &MigrationKey) -> Result<(), StoreError> {
        (**self).mark_skipped(key)
    }

    fn history(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        (**self).history()
    }
}

impl<T: MigrationLogStore + ?Sized> MigrationLogStore for Box<T> {
    fn applied_keys(&self) -> Result<Vec<MigrationKey>, StoreError> {
        (**self).applied_keys()
    }

    fn mark_applied(&self, key: &MigrationKey) -> Result<(), StoreError> {
        (**self).mark_applied(key)
    }

    fn mark_failed(&self, key: &MigrationKey, error_text: &str) -> Result<(), StoreError> {
        (**self).mark_failed(key, error_text)
    }

    fn mark_skipped(&self, key: &MigrationKey) -> Result<(), StoreError> {
        (**self).mark_skipped(key)
    }

    fn history(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        (**self).history()
    }
}
