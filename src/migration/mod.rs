//! Lock-coordinated, exactly-once migrations with an audit trail
//!
//! Register migrations (plain functions) in a [`MigrationRegistry`], hand it
//! to a [`MigrationManager`] together with a [`MigrationLogStore`] and a
//! [`LockProvider`], and call [`MigrationManager::run`] at startup:
//!
//! - the lock ensures one instance migrates at a time
//! - namespaces with no history are fast-forwarded, not executed (see [`BootstrapPolicy`])
//! - every other unapplied migration runs in registration order
//! - every attempt leaves an append-only [`MigrationRecord`]
//!
//! # Example
//!
//! ```rust
//! use driftguard::migration::{
//!     InMemoryLockProvider, InMemoryLogStore, ManagerOptions, BootstrapPolicy,
//!     MigrationManager, MigrationRegistry,
//! };
//!
//! let mut registry = MigrationRegistry::new();
//! registry.register_default("create_users", |ctx| {
//!     ctx.log("CREATE TABLE users");
//!     Ok(())
//! })?;
//!
//! let manager = MigrationManager::new(registry, InMemoryLogStore::new(), InMemoryLockProvider::new())
//!     .with_options(ManagerOptions {
//!         bootstrap: BootstrapPolicy::ExecuteAll,
//!         ..Default::default()
//!     });
//!
//! let report = manager.run()?;
//! assert_eq!(report.applied.len(), 1);
//! assert!(manager.status()?.is_up_to_date());
//! # Ok::<(), driftguard::migration::MigrationError>(())
//! ```

pub mod context;
pub mod error;
pub mod lock;
pub mod manager;
pub mod record;
pub mod registry;
pub mod startup;
pub mod state_table;
pub mod status;
pub mod store;

pub use context::MigrationContext;
pub use error::{MigrationError, RecordOp};
pub use lock::{
    InMemoryLockProvider, LeaseToken, LockError, LockGuard, LockLease, LockProvider, PostgresLockProvider,
    RedisLockProvider,
};
pub use manager::{
    BootstrapPolicy, ManagerOptions, MigrationManager, RunReport, DEFAULT_LOCK_KEY, DEFAULT_LOCK_TTL,
    DEFAULT_MIGRATION_TIMEOUT,
};
pub use record::{MigrationKey, MigrationRecord, RecordOutcome, SKIP_SENTINEL};
pub use registry::{BoxError, MigrationFn, MigrationItem, MigrationRegistry, SchemaSyncFn, DEFAULT_NAMESPACE};
pub use startup::{manager_from_config, open_lock_provider, open_log_store, registry_from_config, startup_migrations};
pub use status::MigrationStatus;
pub use store::{InMemoryLogStore, MigrationLogStore, PostgresLogStore, StoreError};
