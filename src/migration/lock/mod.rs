//! Distributed migration lock
//!
//! A lock is a named, leased key. Acquisition hands back a [`LockLease`]
//! carrying an opaque token, and renewal and release only succeed while that
//! token still owns the key. A late release from an instance whose lease
//! already expired therefore cannot free a lock someone else now holds.

mod memory;
mod postgres;
mod redis;

pub use self::memory::InMemoryLockProvider;
pub use self::postgres::PostgresLockProvider;
pub use self::redis::RedisLockProvider;

use crate::executor::DbError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lock backend errors. Contention is *not* an error; see [`LockProvider::try_acquire`].
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("lock state poisoned by a panicking holder")]
    Poisoned,
    #[error("invalid lock request: {0}")]
    Invalid(String),
}

/// Opaque proof of ownership returned by a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LeaseToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub token: LeaseToken,
    pub ttl: Duration,
    pub acquired_at: DateTime<Utc>,
}

impl LockLease {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            token: LeaseToken::generate(),
            ttl,
            acquired_at: Utc::now(),
        }
    }
}

/// Time-bounded named lock shared by every instance that may run migrations.
pub trait LockProvider {
    /// Atomically takes `key` for `ttl` if nobody holds it.
    ///
    /// Returns `Ok(None)` when another holder has it; that is the normal
    /// outcome for every instance but one during a rolling deploy.
    ///
    /// # Errors
    ///
    /// Returns `LockError` only when the backend itself fails.
    fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError>;

    /// Pushes the expiry out by the lease's TTL if the token still owns the key.
    ///
    /// Returns `Ok(false)` if the lease has expired or been taken over.
    ///
    /// # Errors
    ///
    /// Returns `LockError` when the backend fails.
    fn renew(&self, lease: &LockLease) -> Result<bool, LockError>;

    /// Compare-and-delete: frees the key only if the token still owns it.
    ///
    /// Returns `Ok(false)` if there was nothing of ours to release.
    ///
    /// # Errors
    ///
    /// Returns `LockError` when the backend fails.
    fn release(&self, lease: &LockLease) -> Result<bool, LockError>;

    /// Token of the current unexpired holder, if any.
    ///
    /// # Errors
    ///
    /// Returns `LockError` when the backend fails.
    fn holder(&self, key: &str) -> Result<Option<LeaseToken>, LockError>;
}

impl<T: LockProvider + ?Sized> LockProvider for Arc<T> {
    fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        (**self).try_acquire(key, ttl)
    }

    fn renew(&self, lease: &LockLease) -> Result<bool, LockError> {
        (**self).renew(lease)
    }

    fn release(&self, lease: &LockLease) -> Result<bool, LockError> {
        (**self).release(lease)
    }

    fn holder(&self, key: &str) -> Result<Option<LeaseToken>, LockError> {
        (**self).holder(key)
    }
}

impl<T: LockProvider + ?Sized> LockProvider for Box<T> {
    fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        (**self).try_acquire(key, ttl)
    }

    fn renew(&self, lease: &LockLease) -> Result<bool, LockError> {
        (**self).renew(lease)
    }

    fn release(&self, lease: &LockLease) -> Result<bool, LockError> {
        (**self).release(lease)
    }

    fn holder(&self, key: &str) -> Result<Option<LeaseToken>, LockError> {
        (**self).holder(key)
    }
}

/// Lock guard that releases the lease when dropped
///
/// The orchestrator calls [`LockGuard::release`] explicitly so it can report
/// release failures; `Drop` covers unwinding out of a panicking migration.
pub struct LockGuard<'a> {
    provider: &'a dyn LockProvider,
    lease: LockLease,
    released: bool,
}

impl<'a> LockGuard<'a> {
    pub fn new(provider: &'a dyn LockProvider, lease: LockLease) -> Self {
        Self {
            provider,
            lease,
            released: false,
        }
    }

    pub fn lease(&self) -> &LockLease {
        &self.lease
    }

    /// Extends the lease; `Ok(false)` means it is already gone.
    ///
    /// # Errors
    ///
    /// Returns `LockError` when the backend fails.
    pub fn renew(&self) -> Result<bool, LockError> {
        self.provider.renew(&self.lease)
    }

    /// Releases the lease, consuming the guard.
    ///
    /// # Errors
    ///
    /// Returns `LockError` when the backend fails. The guard is marked released
    /// either way; a failed release is left to expire with its TTL.
    pub fn release(mut self) -> Result<bool, LockError> {
        self.released = true;
        self.provider.release(&self.lease)
    }

    /// Gives up the guard without releasing; the lease lapses with its TTL.
    ///
    /// For work that may still be running after its owner stopped waiting.
    pub fn abandon(mut self) -> LockLease {
        self.released = true;
        self.lease.clone()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Can't propagate from drop; the TTL is the backstop
        match self.provider.release(&self.lease) {
            Ok(true) => log::debug!("released migration lock '{}' on drop", self.lease.key),
            Ok(false) => log::warn!("migration lock '{}' had already expired on drop", self.lease.key),
            Err(e) => log::error!("failed to release migration lock '{}' on drop: {}", self.lease.key, e),
        }
    }
}
