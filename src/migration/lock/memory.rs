use super::{LeaseToken, LockError, LockLease, LockProvider};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Process-local lock provider.
///
/// Only excludes callers that share this instance (wrap it in an `Arc`), so
/// it suits tests and deployments with a single migrating process.
#[derive(Debug, Default)]
pub struct InMemoryLockProvider {
    held: Mutex<HashMap<String, (LeaseToken, Instant)>>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_locks<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, (LeaseToken, Instant)>) -> R,
    ) -> Result<R, LockError> {
        let mut held = self.held.lock().map_err(|_| LockError::Poisoned)?;
        let now = Instant::now();
        held.retain(|_, (_, deadline)| *deadline > now);
        Ok(f(&mut held))
    }
}

impl LockProvider for InMemoryLockProvider {
    fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        if ttl.is_zero() {
            return Err(LockError::Invalid("ttl must be positive".to_string()));
        }
        self.with_locks(|held| {
            if held.contains_key(key) {
                return None;
            }
            let lease = LockLease::new(key, ttl);
            held.insert(key.to_string(), (lease.token.clone(), Instant::now() + ttl));
            Some(lease)
        })
    }

    fn renew(&self, lease: &LockLease) -> Result<bool, LockError> {
        self.with_locks(|held| match held.get_mut(&lease.key) {
            Some((token, deadline)) if *token == lease.token => {
                *deadline = Instant::now() + lease.ttl;
                true
            }
            _ => false,
        })
    }

    fn release(&self, lease: &LockLease) -> Result<bool, LockError> {
        self.with_locks(|held| {
            let owned = matches!(held.get(&lease.key), Some((token, _)) if *token == lease.token);
            if owned {
                held.remove(&lease.key);
            }
            owned
        })
    }

    fn holder(&self, key: &str) -> Result<Option<LeaseToken>, LockError> {
        self.with_locks(|held| held.get(key).map(|(token, _)| token.clone()))
    }
}
