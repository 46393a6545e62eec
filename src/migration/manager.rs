//! The orchestrator: lock, bootstrap, execute, record

use crate::config::MigrationConfig;
use crate::migration::lock::{LockGuard, LockProvider};
use crate::migration::store::MigrationLogStore;
use crate::migration::{
    BoxError, MigrationContext, MigrationError, MigrationFn, MigrationItem, MigrationKey, MigrationRegistry,
    MigrationStatus, RecordOp,
};
use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Default lock key shared by every instance of an application.
pub const DEFAULT_LOCK_KEY: &str = "migrate_lock";

/// Default lease lifetime.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Default per-migration deadline, kept under the lease TTL.
pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(55);

/// What to do with namespaces that have no history yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPolicy {
    /// Mark every registered migration of an unseen namespace as skipped
    /// without running it. Suits databases whose schema was created by other
    /// means before the namespace was registered.
    #[default]
    SkipUnseenNamespaces,
    /// Treat unseen namespaces like any other: run everything.
    ExecuteAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    pub lock_key: String,
    pub lock_ttl: Duration,
    /// `None` runs bodies on the calling thread with no deadline
    pub migration_timeout: Option<Duration>,
    pub bootstrap: BootstrapPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
            migration_timeout: Some(DEFAULT_MIGRATION_TIMEOUT),
            bootstrap: BootstrapPolicy::default(),
        }
    }
}

impl From<&MigrationConfig> for ManagerOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            lock_key: config.lock_key.clone(),
            lock_ttl: config.lock_ttl(),
            migration_timeout: config.migration_timeout(),
            bootstrap: config.bootstrap,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Fast-forwarded by the bootstrap pass, in registration order
    pub skipped: Vec<MigrationKey>,
    /// Executed successfully, in execution order
    pub applied: Vec<MigrationKey>,
    /// Registered keys that already had a successful record
    pub already_applied: usize,
    pub elapsed: Duration,
}

impl RunReport {
    /// `true` when the run neither executed nor skipped anything.
    pub fn is_noop(&self) -> bool {
        self.skipped.is_empty() && self.applied.is_empty()
    }
}

/// Why a migration body did not succeed.
enum BodyFailure {
    Error(String),
    Panicked(String),
    TimedOut(Duration),
}

impl BodyFailure {
    fn message(&self) -> String {
        match self {
            BodyFailure::Error(message) => message.clone(),
            BodyFailure::Panicked(message) => format!("panicked: {}", message),
            BodyFailure::TimedOut(timeout) => format!("timed out after {:?}", timeout),
        }
    }

    fn into_error(self, key: &MigrationKey) -> MigrationError {
        match self {
            BodyFailure::TimedOut(timeout) => MigrationError::TimedOut {
                key: key.to_string(),
                timeout,
            },
            other => MigrationError::Failed {
                key: key.to_string(),
                message: other.message(),
            },
        }
    }
}

/// Runs registered migrations exactly once across every instance sharing
/// the same log store and lock.
///
/// A run takes the lock, fast-forwards namespaces that have never been seen
/// (see [`BootstrapPolicy`]), then executes whatever is still missing in
/// registration order. The first failure is recorded and aborts the run; the
/// next run retries it.
///
/// ```rust
/// use driftguard::migration::{
///     InMemoryLockProvider, InMemoryLogStore, MigrationManager, MigrationRegistry,
/// };
///
/// let mut registry = MigrationRegistry::new();
/// registry.register("billing", "create_invoices", |ctx| {
///     ctx.log("created invoices table");
///     Ok(())
/// })?;
///
/// let manager = MigrationManager::new(registry, InMemoryLogStore::new(), InMemoryLockProvider::new());
/// let report = manager.run()?;
/// assert_eq!(report.skipped.len(), 1);
/// # Ok::<(), driftguard::migration::MigrationError>(())
/// ```
pub struct MigrationManager {
    registry: MigrationRegistry,
    store: Box<dyn MigrationLogStore>,
    locks: Box<dyn LockProvider>,
    options: ManagerOptions,
}

impl MigrationManager {
    pub fn new(
        registry: MigrationRegistry,
        store: impl MigrationLogStore + 'static,
        locks: impl LockProvider + 'static,
    ) -> Self {
        Self {
            registry,
            store: Box::new(store),
            locks: Box::new(locks),
            options: ManagerOptions::default(),
        }
    }

    pub fn from_config(
        config: &MigrationConfig,
        registry: MigrationRegistry,
        store: impl MigrationLogStore + 'static,
        locks: impl LockProvider + 'static,
    ) -> Self {
        Self::new(registry, store, locks).with_options(ManagerOptions::from(config))
    }

    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn store(&self) -> &dyn MigrationLogStore {
        self.store.as_ref()
    }

    /// Executes one orchestration run.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if another holder owns the lock (nothing was touched)
    /// - `LockAcquire` / `LockRenew` / `LeaseLost` / `LockRelease` for lock problems
    /// - `SchemaSync` if a schema sync hook fails
    /// - `History` / `Bookkeeping` if the log store fails
    /// - `Failed` / `TimedOut` for the first migration body that does not succeed
    ///
    /// After `TimedOut` the lock is not released: the body may still be running,
    /// so other instances stay locked out until the lease expires.
    pub fn run(&self) -> Result<RunReport, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::run_span(&self.options.lock_key).entered();

        let started = Instant::now();
        let lock_key = self.options.lock_key.as_str();

        let lease = match self.locks.try_acquire(lock_key, self.options.lock_ttl) {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                log::warn!("migration is already running, lock '{}' is held elsewhere", lock_key);
                #[cfg(feature = "metrics")]
                METRICS.record_contention();
                return Err(MigrationError::AlreadyRunning {
                    lock_key: lock_key.to_string(),
                });
            }
            Err(e) => return Err(MigrationError::LockAcquire(e)),
        };
        log::debug!("acquired migration lock '{}' (token {})", lock_key, lease.token);

        let guard = LockGuard::new(self.locks.as_ref(), lease);
        let outcome = self.run_locked(&guard);

        // The timed-out body is still running on its thread and must stay exclusive
        if let Err(MigrationError::TimedOut { key, .. }) = &outcome {
            let lease = guard.abandon();
            log::warn!(
                "leaving migration lock '{}' to expire after {:?}: {} is still running",
                lock_key,
                lease.ttl,
                key
            );
            return outcome;
        }
        let released = guard.release();

        match (outcome, released) {
            (Ok(mut report), Ok(owned)) => {
                if !owned {
                    log::warn!("migration lock '{}' expired before it was released", lock_key);
                }
                report.elapsed = started.elapsed();
                log::info!(
                    "migrations finished in {:?}: {} applied, {} skipped, {} already applied",
                    report.elapsed,
                    report.applied.len(),
                    report.skipped.len(),
                    report.already_applied
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(MigrationError::LockRelease(e)),
            (Err(err), Ok(_)) => Err(err),
            (Err(err), Err(release_err)) => {
                log::error!("failed to release migration lock '{}': {}", lock_key, release_err);
                Err(err)
            }
        }
    }

    fn run_locked(&self, guard: &LockGuard<'_>) -> Result<RunReport, MigrationError> {
        for sync in self.registry.schema_syncs() {
            log::debug!("running schema sync '{}'", sync.name);
            panic::catch_unwind(AssertUnwindSafe(|| (sync.func)()))
                .unwrap_or_else(|payload| {
                    Err(BoxError::from(format!("panicked: {}", panic_message(payload.as_ref()))))
                })
                .map_err(|e| MigrationError::SchemaSync {
                    name: sync.name.clone(),
                    message: e.to_string(),
                })?;
        }

        let mut applied: HashSet<MigrationKey> = self
            .store
            .applied_keys()
            .map_err(MigrationError::History)?
            .into_iter()
            .collect();

        let mut report = RunReport {
            already_applied: self
                .registry
                .items()
                .iter()
                .filter(|item| applied.contains(item.key()))
                .count(),
            ..Default::default()
        };

        if self.options.bootstrap == BootstrapPolicy::SkipUnseenNamespaces {
            // Decided once from the history loaded above, not as records accumulate
            let seen: HashSet<&str> = applied.iter().map(|k| k.namespace.as_str()).collect();
            let unseen: HashSet<String> = self
                .registry
                .namespaces()
                .into_iter()
                .filter(|ns| !seen.contains(ns))
                .map(str::to_string)
                .collect();

            for item in self.registry.items() {
                if !unseen.contains(item.namespace()) || applied.contains(item.key()) {
                    continue;
                }
                let key = item.key();
                self.store
                    .mark_skipped(key)
                    .map_err(|source| MigrationError::Bookkeeping {
                        key: key.to_string(),
                        op: RecordOp::Skipped,
                        source,
                    })?;
                log::info!("skipped migration {} (new namespace)", key);
                #[cfg(feature = "metrics")]
                METRICS.record_skipped(item.namespace());
                applied.insert(key.clone());
                report.skipped.push(key.clone());
            }
        }

        for item in self.registry.items() {
            if applied.contains(item.key()) {
                continue;
            }
            match guard.renew() {
                Ok(true) => {}
                Ok(false) => {
                    return Err(MigrationError::LeaseLost {
                        lock_key: guard.lease().key.clone(),
                        key: item.key().to_string(),
                    })
                }
                Err(e) => return Err(MigrationError::LockRenew(e)),
            }
            self.execute(item)?;
            applied.insert(item.key().clone());
            report.applied.push(item.key().clone());
        }

        if report.applied.is_empty() && report.skipped.is_empty() {
            log::debug!("no pending migrations");
        }
        Ok(report)
    }

    fn execute(&self, item: &MigrationItem) -> Result<(), MigrationError> {
        let key = item.key();

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migration_span(item.namespace(), item.name()).entered();

        let ctx = MigrationContext::new(key.clone());
        ctx.push(format!("Starting migration: {} at {}", key, Utc::now().to_rfc3339()));
        log::info!("applying migration {}", key);
        let started = Instant::now();

        match self.invoke(item, &ctx) {
            Ok(()) => {
                ctx.push(format!("Migration completed: {} at {}", key, Utc::now().to_rfc3339()));
                self.store
                    .mark_applied(key)
                    .map_err(|source| MigrationError::Bookkeeping {
                        key: key.to_string(),
                        op: RecordOp::Applied,
                        source,
                    })?;
                log::info!("applied migration {} in {:?}", key, started.elapsed());
                #[cfg(feature = "metrics")]
                METRICS.record_applied(item.namespace(), started.elapsed());
                Ok(())
            }
            Err(failure) => {
                let message = failure.message();
                let error_text = format!("Migration failed: {}\nLogs:\n{}", message, ctx.log_string());
                if let Err(e) = self.store.mark_failed(key, &error_text) {
                    log::error!("failed to record failure of migration {}: {}", key, e);
                }
                log::error!("migration {} failed after {:?}: {}", key, started.elapsed(), message);
                #[cfg(feature = "metrics")]
                METRICS.record_failed(item.namespace(), started.elapsed());
                Err(failure.into_error(key))
            }
        }
    }

    fn invoke(&self, item: &MigrationItem, ctx: &MigrationContext) -> Result<(), BodyFailure> {
        let func = item.func();
        let Some(timeout) = self.options.migration_timeout else {
            return run_body(&func, ctx.clone());
        };

        let (tx, rx) = crossbeam_channel::bounded(1);
        let body_ctx = ctx.clone();
        // Detached on timeout; the body may still finish in the background
        let spawned = thread::Builder::new()
            .name(format!("migration-{}", item.key()))
            .spawn(move || {
                let _ = tx.send(run_body(&func, body_ctx));
            });
        if let Err(e) = spawned {
            return Err(BodyFailure::Error(format!("failed to spawn migration thread: {}", e)));
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BodyFailure::TimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(BodyFailure::Panicked(
                "migration thread exited without reporting".to_string(),
            )),
        }
    }

    /// Compares the registry with stored history without taking the lock.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::History` if history cannot be read.
    pub fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let history = self.store.history().map_err(MigrationError::History)?;
        Ok(MigrationStatus::compute(&self.registry, &history, self.options.bootstrap))
    }
}

fn run_body(func: &MigrationFn, mut ctx: MigrationContext) -> Result<(), BodyFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| func(&mut ctx))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BodyFailure::Error(e.to_string())),
        Err(payload) => Err(BodyFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::lock::{InMemoryLockProvider, LeaseToken, LockError, LockLease};
    use crate::migration::store::{InMemoryLogStore, StoreError};
    use crate::migration::{MigrationRecord, SKIP_SENTINEL};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn seeded(keys: &[(&str, &str)]) -> Arc<InMemoryLogStore> {
        let records = keys
            .iter()
            .enumerate()
            .map(|(i, (ns, name))| MigrationRecord {
                id: i as i64 + 1,
                namespace: ns.to_string(),
                name: name.to_string(),
                applied_at: Utc::now(),
                success: true,
                logs: String::new(),
            })
            .collect();
        Arc::new(InMemoryLogStore::with_records(records))
    }

    fn inline() -> ManagerOptions {
        ManagerOptions {
            migration_timeout: None,
            ..Default::default()
        }
    }

    /// Accepts every acquire but reports every renew as lost.
    struct ExpiringLocks;

    impl LockProvider for ExpiringLocks {
        fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
            Ok(Some(LockLease::new(key, ttl)))
        }
        fn renew(&self, _lease: &LockLease) -> Result<bool, LockError> {
            Ok(false)
        }
        fn release(&self, _lease: &LockLease) -> Result<bool, LockError> {
            Ok(false)
        }
        fn holder(&self, _key: &str) -> Result<Option<LeaseToken>, LockError> {
            Ok(None)
        }
    }

    /// Reads fine, refuses every write.
    struct ReadOnlyStore(InMemoryLogStore);

    impl MigrationLogStore for ReadOnlyStore {
        fn applied_keys(&self) -> Result<Vec<MigrationKey>, StoreError> {
            self.0.applied_keys()
        }
        fn mark_applied(&self, _key: &MigrationKey) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
        fn mark_failed(&self, _key: &MigrationKey, _error_text: &str) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
        fn mark_skipped(&self, _key: &MigrationKey) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
        fn history(&self) -> Result<Vec<MigrationRecord>, StoreError> {
            self.0.history()
        }
    }

    #[test]
    fn test_options_from_config() {
        let config = MigrationConfig {
            timeout_seconds: 0,
            bootstrap: BootstrapPolicy::ExecuteAll,
            ..Default::default()
        };
        let options = ManagerOptions::from(&config);
        assert_eq!(options.lock_key, DEFAULT_LOCK_KEY);
        assert_eq!(options.lock_ttl, DEFAULT_LOCK_TTL);
        assert_eq!(options.migration_timeout, None);
        assert_eq!(options.bootstrap, BootstrapPolicy::ExecuteAll);
    }

    #[test]
    fn test_bootstrap_skips_unseen_namespace() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = MigrationRegistry::new();
        for name in ["m1", "m2"] {
            let calls = calls.clone();
            registry
                .register("fresh", name, move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        let store = Arc::new(InMemoryLogStore::new());
        let report = MigrationManager::new(registry, store.clone(), InMemoryLockProvider::new())
            .with_options(inline())
            .run()
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.applied.is_empty());
        assert!(store.history().unwrap().iter().all(|r| r.success && r.logs == SKIP_SENTINEL));
    }

    #[test]
    fn test_execute_all_runs_unseen_namespace() {
        let mut registry = MigrationRegistry::new();
        registry.register("fresh", "m1", |_| Ok(())).unwrap();

        let report = MigrationManager::new(registry, InMemoryLogStore::new(), InMemoryLockProvider::new())
            .with_options(ManagerOptions {
                bootstrap: BootstrapPolicy::ExecuteAll,
                ..inline()
            })
            .run()
            .unwrap();

        assert_eq!(report.applied, vec![MigrationKey::new("fresh", "m1")]);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_failure_text_contains_markers_and_body_logs() {
        let mut registry = MigrationRegistry::new();
        registry
            .register("core", "broken", |ctx| {
                ctx.log("step 1 done");
                Err("column exists".into())
            })
            .unwrap();

        let store = seeded(&[("core", "m0")]);
        let err = MigrationManager::new(registry, store.clone(), InMemoryLockProvider::new())
            .with_options(inline())
            .run()
            .unwrap_err();

        assert!(matches!(err, MigrationError::Failed { ref key, .. } if key == "core:broken"));
        let history = store.history().unwrap();
        let failed = history.last().unwrap();
        assert!(!failed.success);
        assert!(failed.logs.starts_with("Migration failed: column exists\nLogs:\n"));
        assert!(failed.logs.contains("Starting migration: core:broken at "));
        assert!(failed.logs.contains("step 1 done"));
        assert!(!failed.logs.contains("Migration completed"));
    }

    #[test]
    fn test_panic_is_recorded_as_failure() {
        for timeout in [None, Some(Duration::from_secs(5))] {
            let mut registry = MigrationRegistry::new();
            registry.register("core", "explodes", |_| panic!("kaboom")).unwrap();

            let store = seeded(&[("core", "m0")]);
            let locks = Arc::new(InMemoryLockProvider::new());
            let err = MigrationManager::new(registry, store.clone(), locks.clone())
                .with_options(ManagerOptions {
                    migration_timeout: timeout,
                    ..Default::default()
                })
                .run()
                .unwrap_err();

            assert!(err.is_migration_failure());
            assert!(err.to_string().contains("kaboom"));
            assert!(!store.history().unwrap().last().unwrap().success);
            assert_eq!(locks.holder(DEFAULT_LOCK_KEY).unwrap(), None);
        }
    }

    #[test]
    fn test_timeout_aborts_run() {
        let mut registry = MigrationRegistry::new();
        registry
            .register("core", "slow", |_| {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .unwrap();
        registry.register("core", "after", |_| Ok(())).unwrap();

        let store = seeded(&[("core", "m0")]);
        let err = MigrationManager::new(registry, store.clone(), InMemoryLockProvider::new())
            .with_options(ManagerOptions {
                migration_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            })
            .run()
            .unwrap_err();

        assert!(matches!(err, MigrationError::TimedOut { ref key, .. } if key == "core:slow"));
        let history = store.history().unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[1].logs.contains("timed out"));
    }

    #[test]
    fn test_lost_lease_stops_before_execution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = MigrationRegistry::new();
        registry
            .register("core", "m1", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let store = seeded(&[("core", "m0")]);
        let err = MigrationManager::new(registry, store.clone(), ExpiringLocks)
            .with_options(inline())
            .run()
            .unwrap_err();

        assert!(matches!(err, MigrationError::LeaseLost { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_bookkeeping_failure_aborts() {
        let mut registry = MigrationRegistry::new();
        registry.register("fresh", "m1", |_| Ok(())).unwrap();

        let err = MigrationManager::new(registry, ReadOnlyStore(InMemoryLogStore::new()), InMemoryLockProvider::new())
            .with_options(inline())
            .run()
            .unwrap_err();

        assert!(matches!(err, MigrationError::Bookkeeping { op: RecordOp::Skipped, .. }));
    }

    #[test]
    fn test_schema_sync_failure_aborts_before_history() {
        let mut registry = MigrationRegistry::new();
        registry.register_schema_sync("users", || Err("relation missing".into()));
        registry.register("core", "m1", |_| Ok(())).unwrap();

        let store = Arc::new(InMemoryLogStore::new());
        let err = MigrationManager::new(registry, store.clone(), InMemoryLockProvider::new())
            .with_options(inline())
            .run()
            .unwrap_err();

        assert!(matches!(err, MigrationError::SchemaSync { ref name, .. } if name == "users"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_panicking_schema_sync_becomes_error() {
        let mut registry = MigrationRegistry::new();
        registry.register_schema_sync("orders", || panic!("missing column"));

        let locks = Arc::new(InMemoryLockProvider::new());
        let err = MigrationManager::new(registry, InMemoryLogStore::new(), locks.clone())
            .with_options(inline())
            .run()
            .unwrap_err();

        match err {
            MigrationError::SchemaSync { name, message } => {
                assert_eq!(name, "orders");
                assert!(message.contains("missing column"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(locks.holder(DEFAULT_LOCK_KEY).unwrap(), None);
    }

    #[test]
    fn test_timeout_keeps_lease_until_expiry() {
        let mut registry = MigrationRegistry::new();
        registry
            .register("core", "slow", |_| {
                thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();

        let locks = Arc::new(InMemoryLockProvider::new());
        let manager = MigrationManager::new(registry, seeded(&[("core", "m0")]), locks.clone()).with_options(
            ManagerOptions {
                lock_ttl: Duration::from_millis(600),
                migration_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );

        assert!(matches!(manager.run(), Err(MigrationError::TimedOut { .. })));
        assert!(locks.holder(DEFAULT_LOCK_KEY).unwrap().is_some());
        assert!(manager.run().unwrap_err().is_contention());

        thread::sleep(Duration::from_millis(700));
        assert_eq!(locks.holder(DEFAULT_LOCK_KEY).unwrap(), None);
    }

    #[test]
    fn test_status_reflects_run() {
        let mut registry = MigrationRegistry::new();
        registry.register("core", "m1", |_| Ok(())).unwrap();
        registry.register("core", "m2", |_| Ok(())).unwrap();

        let manager = MigrationManager::new(registry, seeded(&[("core", "m1")]), InMemoryLockProvider::new())
            .with_options(inline());

        let before = manager.status().unwrap();
        assert_eq!(before.pending, vec![MigrationKey::new("core", "m2")]);

        let report = manager.run().unwrap();
        assert_eq!(report.already_applied, 1);
        assert!(manager.status().unwrap().is_up_to_date());
        assert!(manager.run().unwrap().is_noop());
    }
}
