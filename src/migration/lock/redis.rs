use super::{LeaseToken, LockError, LockLease, LockProvider};
use crate::connection::{redis_client, ConnectionError};
use once_cell::sync::Lazy;
use std::time::Duration;

// KEYS[1] = lock key, ARGV[1] = token
static RELEASE_SCRIPT: Lazy<::redis::Script> = Lazy::new(|| {
    ::redis::Script::new(
        r#"
        if redis.call("GET", KEYS[1]) == ARGV[1] then
            return redis.call("DEL", KEYS[1])
        else
            return 0
        end
        "#,
    )
});

// KEYS[1] = lock key, ARGV[1] = token, ARGV[2] = ttl in milliseconds
static RENEW_SCRIPT: Lazy<::redis::Script> = Lazy::new(|| {
    ::redis::Script::new(
        r#"
        if redis.call("GET", KEYS[1]) == ARGV[1] then
            return redis.call("PEXPIRE", KEYS[1], ARGV[2])
        else
            return 0
        end
        "#,
    )
});

/// Redis-backed lock: `SET key token NX PX ttl`.
///
/// Expiry is enforced by the Redis server. Renew and release are Lua
/// compare-and-set scripts keyed on the lease token.
pub struct RedisLockProvider {
    client: ::redis::Client,
}

impl RedisLockProvider {
    pub fn new(client: ::redis::Client) -> Self {
        Self { client }
    }

    /// # Errors
    ///
    /// Returns `ConnectionError` if the URL is malformed. No connection is
    /// opened until the first lock call.
    pub fn from_url(url: &str) -> Result<Self, ConnectionError> {
        Ok(Self::new(redis_client(url)?))
    }

    fn connection(&self) -> Result<::redis::Connection, LockError> {
        Ok(self.client.get_connection()?)
    }
}

fn ttl_millis(ttl: Duration) -> Result<u64, LockError> {
    let ms = u64::try_from(ttl.as_millis())
        .map_err(|_| LockError::Invalid(format!("ttl {ttl:?} is too large")))?;
    if ms == 0 {
        return Err(LockError::Invalid("ttl must be at least one millisecond".to_string()));
    }
    Ok(ms)
}

impl LockProvider for RedisLockProvider {
    fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        let ms = ttl_millis(ttl)?;
        let lease = LockLease::new(key, ttl);
        let mut con = self.connection()?;

        // "OK" when set, nil when the key already exists
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(lease.token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ms)
            .query(&mut con)?;

        Ok(reply.map(|_| lease))
    }

    fn renew(&self, lease: &LockLease) -> Result<bool, LockError> {
        let ms = ttl_millis(lease.ttl)?;
        let mut con = self.connection()?;
        let updated: i64 = RENEW_SCRIPT
            .key(&lease.key)
            .arg(lease.token.as_str())
            .arg(ms)
            .invoke(&mut con)?;
        Ok(updated == 1)
    }

    fn release(&self, lease: &LockLease) -> Result<bool, LockError> {
        let mut con = self.connection()?;
        let deleted: i64 = RELEASE_SCRIPT
            .key(&lease.key)
            .arg(lease.token.as_str())
            .invoke(&mut con)?;
        Ok(deleted == 1)
    }

    fn holder(&self, key: &str) -> Result<Option<LeaseToken>, LockError> {
        let mut con = self.connection()?;
        let token: Option<String> = ::redis::cmd("GET").arg(key).query(&mut con)?;
        Ok(token.map(LeaseToken::from))
    }
}
