//! Composite keys and persisted audit records

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// `logs` value written for bootstrap-skipped migrations.
pub const SKIP_SENTINEL: &str = "skip";

/// Identity of a migration: `namespace:name`.
///
/// This is the unit of idempotency. Two migrations with the same name in
/// different namespaces are unrelated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MigrationKey {
    pub namespace: String,
    pub name: String,
}

impl MigrationKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses a composite key, splitting at the first `:`.
    ///
    /// Namespaces cannot contain `:` (registration rejects it), so any further
    /// colons belong to the name.
    pub fn parse(composite: &str) -> Option<Self> {
        let (namespace, name) = composite.split_once(':')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// How a record came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Applied,
    Skipped,
    Failed,
}

/// One row of the migration log.
///
/// Records are only ever appended; a key may have several (a failed attempt
/// followed by a successful one, say). Any successful record makes the key
/// applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub namespace: String,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub success: bool,
    /// Empty on success, `"skip"` on bootstrap, error text plus context logs on failure
    pub logs: String,
}

impl MigrationRecord {
    pub fn key(&self) -> MigrationKey {
        MigrationKey::new(&self.namespace, &self.name)
    }

    pub fn is_skip(&self) -> bool {
        self.success && self.logs == SKIP_SENTINEL
    }

    pub fn outcome(&self) -> RecordOutcome {
        match (self.success, self.is_skip()) {
            (true, true) => RecordOutcome::Skipped,
            (true, false) => RecordOutcome::Applied,
            (false, _) => RecordOutcome::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(success: bool, logs: &str) -> MigrationRecord {
        MigrationRecord {
            id: 1,
            namespace: "app".to_string(),
            name: "add_index".to_string(),
            applied_at: Utc::now(),
            success,
            logs: logs.to_string(),
        }
    }

    #[test]
    fn test_key_display() {
        assert_eq!(MigrationKey::new("tenantX", "m1").to_string(), "tenantX:m1");
    }

    #[test]
    fn test_key_parse_splits_on_first_colon() {
        let key = MigrationKey::parse("app:2024:backfill").unwrap();
        assert_eq!(key.namespace, "app");
        assert_eq!(key.name, "2024:backfill");
    }

    #[test]
    fn test_key_parse_rejects_malformed() {
        assert!(MigrationKey::parse("no_separator").is_none());
        assert!(MigrationKey::parse(":name").is_none());
        assert!(MigrationKey::parse("ns:").is_none());
    }

    #[test]
    fn test_record_outcome() {
        assert_eq!(record(true, "").outcome(), RecordOutcome::Applied);
        assert_eq!(record(true, SKIP_SENTINEL).outcome(), RecordOutcome::Skipped);
        assert_eq!(record(false, "boom").outcome(), RecordOutcome::Failed);
        // a failure whose text happens to be "skip" is still a failure
        assert_eq!(record(false, SKIP_SENTINEL).outcome(), RecordOutcome::Failed);
    }
}
