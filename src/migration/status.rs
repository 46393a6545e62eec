//! Migration status: what a run would do, without doing it

use crate::migration::{BootstrapPolicy, MigrationKey, MigrationRecord, MigrationRegistry};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Snapshot of registry versus history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStatus {
    /// Registered and already applied (or skipped) in an earlier run
    pub applied: Vec<MigrationKey>,

    /// Would be executed by the next run, in execution order
    pub pending: Vec<MigrationKey>,

    /// Would be fast-forwarded by the next run's bootstrap pass
    pub to_skip: Vec<MigrationKey>,

    /// Registered namespaces with no successful history
    pub bootstrap_namespaces: Vec<String>,

    /// Most recent failed record for each pending key that has one
    pub failures: Vec<MigrationRecord>,

    /// Applied in history but no longer registered
    pub unregistered: Vec<MigrationKey>,
}

impl MigrationStatus {
    pub fn compute(
        registry: &MigrationRegistry,
        history: &[MigrationRecord],
        bootstrap: BootstrapPolicy,
    ) -> Self {
        let applied_set: HashSet<MigrationKey> = history
            .iter()
            .filter(|r| r.success)
            .map(MigrationRecord::key)
            .collect();
        let seen_namespaces: HashSet<&str> = applied_set.iter().map(|k| k.namespace.as_str()).collect();

        let bootstrap_namespaces: Vec<String> = match bootstrap {
            BootstrapPolicy::SkipUnseenNamespaces => registry
                .namespaces()
                .into_iter()
                .filter(|ns| !seen_namespaces.contains(ns))
                .map(str::to_string)
                .collect(),
            BootstrapPolicy::ExecuteAll => Vec::new(),
        };

        let mut status = MigrationStatus {
            bootstrap_namespaces,
            ..Default::default()
        };

        for item in registry.items() {
            let key = item.key();
            if applied_set.contains(key) {
                status.applied.push(key.clone());
            } else if status.bootstrap_namespaces.iter().any(|ns| ns == item.namespace()) {
                status.to_skip.push(key.clone());
            } else {
                status.pending.push(key.clone());
            }
        }

        // Later records overwrite earlier ones, leaving the latest failure per key
        let pending: HashSet<&MigrationKey> = status.pending.iter().collect();
        let mut last_failure: HashMap<MigrationKey, &MigrationRecord> = HashMap::new();
        for record in history.iter().filter(|r| !r.success) {
            let key = record.key();
            if pending.contains(&key) {
                last_failure.insert(key, record);
            }
        }
        status.failures = status
            .pending
            .iter()
            .filter_map(|key| last_failure.get(key).map(|r| (*r).clone()))
            .collect();

        let mut unregistered: Vec<MigrationKey> = applied_set
            .into_iter()
            .filter(|key| !registry.contains(key))
            .collect();
        unregistered.sort();
        status.unregistered = unregistered;

        status
    }

    /// Nothing left to execute or skip.
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && self.to_skip.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Next migration a run would execute.
    pub fn next_pending(&self) -> Option<&MigrationKey> {
        self.pending.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: i64, ns: &str, name: &str, success: bool, logs: &str) -> MigrationRecord {
        MigrationRecord {
            id,
            namespace: ns.to_string(),
            name: name.to_string(),
            applied_at: Utc::now(),
            success,
            logs: logs.to_string(),
        }
    }

    fn registry() -> MigrationRegistry {
        let mut registry = MigrationRegistry::new();
        for (ns, name) in [("core", "m1"), ("core", "m2"), ("fresh", "m1"), ("core", "m3")] {
            registry.register(ns, name, |_| Ok(())).unwrap();
        }
        registry
    }

    #[test]
    fn test_classifies_each_item() {
        let history = vec![
            record(1, "core", "m1", true, ""),
            record(2, "core", "m2", false, "first failure"),
            record(3, "core", "m2", false, "second failure"),
            record(4, "core", "retired", true, ""),
        ];

        let status = MigrationStatus::compute(&registry(), &history, BootstrapPolicy::SkipUnseenNamespaces);

        assert_eq!(status.applied, vec![MigrationKey::new("core", "m1")]);
        assert_eq!(
            status.pending,
            vec![MigrationKey::new("core", "m2"), MigrationKey::new("core", "m3")]
        );
        assert_eq!(status.to_skip, vec![MigrationKey::new("fresh", "m1")]);
        assert_eq!(status.bootstrap_namespaces, vec!["fresh".to_string()]);
        assert_eq!(status.failures.len(), 1);
        assert_eq!(status.failures[0].logs, "second failure");
        assert_eq!(status.unregistered, vec![MigrationKey::new("core", "retired")]);
        assert_eq!(status.next_pending(), Some(&MigrationKey::new("core", "m2")));
        assert!(!status.is_up_to_date());
    }

    #[test]
    fn test_execute_all_has_no_bootstrap() {
        let status = MigrationStatus::compute(&registry(), &[], BootstrapPolicy::ExecuteAll);
        assert!(status.bootstrap_namespaces.is_empty());
        assert!(status.to_skip.is_empty());
        assert_eq!(status.pending_count(), 4);
    }

    #[test]
    fn test_up_to_date() {
        let history = vec![
            record(1, "core", "m1", true, ""),
            record(2, "core", "m2", true, ""),
            record(3, "core", "m3", true, ""),
            record(4, "fresh", "m1", true, "skip"),
        ];
        let status = MigrationStatus::compute(&registry(), &history, BootstrapPolicy::SkipUnseenNamespaces);
        assert!(status.is_up_to_date());
        assert_eq!(status.applied.len(), 4);
    }
}
