use super::{MigrationLogStore, StoreError};
use crate::migration::{MigrationKey, MigrationRecord, SKIP_SENTINEL};
use chrono::Utc;
use std::sync::Mutex;

/// Log store kept in process memory.
///
/// History lives as long as the value does; share it through an `Arc` to
/// observe what a run wrote.
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    records: Mutex<Vec<MigrationRecord>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated history, e.g. to simulate an environment that already ran some migrations.
    pub fn with_records(records: Vec<MigrationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, key: &MigrationKey, success: bool, logs: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        let id = records.last().map_or(1, |r| r.id + 1);
        records.push(MigrationRecord {
            id,
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            applied_at: Utc::now(),
            success,
            logs: logs.to_string(),
        });
        Ok(())
    }
}

impl MigrationLogStore for InMemoryLogStore {
    fn applied_keys(&self) -> Result<Vec<MigrationKey>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.iter().filter(|r| r.success).map(MigrationRecord::key).collect())
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
        Ok(self.records.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }
}
