//! # Driftguard
//!
//! Exactly-once startup migrations for multi-instance services: a leased
//! distributed lock, namespace bootstrap, and an append-only audit log in
//! PostgreSQL.
//!
//! Start with [`migration::startup_migrations`], or build a
//! [`MigrationManager`] by hand to pick other backends.

pub mod config;
pub mod connection;
pub mod executor;
pub mod metrics;
pub mod migration;

pub use config::DriftguardConfig;
pub use connection::{connect, ConnectionError};
pub use executor::{DbError, DbExecutor, MayPostgresExecutor};
pub use migration::{
    MigrationContext, MigrationError, MigrationKey, MigrationManager, MigrationRecord, MigrationRegistry, RunReport,
};
