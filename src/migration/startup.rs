//! Wiring the default backends from configuration

use crate::config::{DriftguardConfig, LockBackend};
use crate::connection::connect;
use crate::executor::MayPostgresExecutor;
use crate::migration::lock::{InMemoryLockProvider, LockProvider, PostgresLockProvider, RedisLockProvider};
use crate::migration::store::PostgresLogStore;
use crate::migration::{MigrationError, MigrationManager, MigrationRegistry, RunReport};

/// An empty registry using the configured default namespace.
///
/// # Errors
///
/// Returns `MigrationError::InvalidMigration` if the configured namespace is invalid.
pub fn registry_from_config(config: &DriftguardConfig) -> Result<MigrationRegistry, MigrationError> {
    MigrationRegistry::new().with_default_namespace(config.migration.default_namespace.clone())
}

/// Log store on the configured database.
///
/// # Errors
///
/// Returns `MigrationError::Connection` if the database is unreachable, or
/// `MigrationError::Config` for an unusable table prefix.
pub fn open_log_store(
    config: &DriftguardConfig,
    executor: MayPostgresExecutor,
) -> Result<PostgresLogStore<MayPostgresExecutor>, MigrationError> {
    PostgresLogStore::new(executor, &config.database.table_prefix)
        .map_err(|e| MigrationError::Config(e.to_string()))
}

/// Lock provider for the configured backend.
///
/// # Errors
///
/// Returns `MigrationError::Connection` for a bad Redis URL, or
/// `MigrationError::Config` for an unusable table prefix.
pub fn open_lock_provider(
    config: &DriftguardConfig,
    executor: MayPostgresExecutor,
) -> Result<Box<dyn LockProvider>, MigrationError> {
    let provider: Box<dyn LockProvider> = match config.migration.lock_backend {
        LockBackend::Redis => Box::new(RedisLockProvider::from_url(&config.redis.url)?),
        LockBackend::Postgres => Box::new(
            PostgresLockProvider::new(executor, &config.database.table_prefix)
                .map_err(|e| MigrationError::Config(e.to_string()))?,
        ),
        LockBackend::Memory => {
            log::warn!("using the in-process migration lock; concurrent instances are not coordinated");
            Box::new(InMemoryLockProvider::new())
        }
    };
    Ok(provider)
}

/// Manager over the configured Postgres log store and lock backend.
///
/// # Errors
///
/// See [`open_log_store`] and [`open_lock_provider`].
pub fn manager_from_config(
    config: &DriftguardConfig,
    registry: MigrationRegistry,
) -> Result<MigrationManager, MigrationError> {
    let executor = MayPostgresExecutor::new(connect(&config.database.url)?);
    let store = open_log_store(config, executor.clone())?;
    let locks = open_lock_provider(config, executor)?;
    Ok(MigrationManager::from_config(&config.migration, registry, store, locks))
}

/// Run migrations on application startup
///
/// Call this once during initialization, before serving traffic. Every
/// instance may call it: one wins the lock and runs the migrations, the
/// others get [`MigrationError::AlreadyRunning`] (check with
/// [`MigrationError::is_contention`]) and can continue or retry.
///
/// Any other error means the schema may be behind the code; the application
/// should not start.
///
/// # Example
///
/// ```rust,no_run
/// use driftguard::config::DriftguardConfig;
/// use driftguard::migration::{registry_from_config, startup_migrations};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DriftguardConfig::load()?;
///     let mut registry = registry_from_config(&config)?;
///     registry.register_default("seed_roles", |ctx| {
///         ctx.log("inserted 3 roles");
///         Ok(())
///     })?;
///
///     match startup_migrations(&config, registry) {
///         Ok(report) => println!("applied {} migration(s)", report.applied.len()),
///         Err(e) if e.is_contention() => println!("another instance is migrating"),
///         Err(e) => return Err(e.into()),
///     }
///     Ok(())
/// }
/// ```
pub fn startup_migrations(
    config: &DriftguardConfig,
    registry: MigrationRegistry,
) -> Result<RunReport, MigrationError> {
    let report = manager_from_config(config, registry)?.run()?;
    if report.is_noop() {
        log::debug!("No pending migrations to apply");
    } else {
        log::info!(
            "Applied {} migration(s) and skipped {} on startup",
            report.applied.len(),
            report.skipped.len()
        );
    }
    Ok(report)
}
