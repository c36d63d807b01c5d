//! Redis-backed request-quota cache.
//!
//! The API gateway decrements `quota:{api_key}` on every request and
//! repopulates it lazily from Postgres on a miss. Billing only ever
//! invalidates or force-sets entries; it never decrements.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::BillingResult;
use subkassa_shared::apikey::api_key_from_token;

fn quota_key(token: Uuid) -> String {
    format!("quota:{}", api_key_from_token(&token))
}

/// What to write back into the cache after an entitlement change.
///
/// A tariff change always force-sets the fresh limit. A same-tariff
/// extension keeps whatever allowance the user still had and only tops
/// up an exhausted counter; an absent entry stays absent and repopulates
/// lazily.
pub fn plan_resync(tariff_changed: bool, prior_remaining: Option<i64>, new_limit: i64) -> Option<i64> {
    if tariff_changed {
        return Some(new_limit);
    }
    match prior_remaining {
        Some(remaining) if remaining <= 0 => Some(new_limit),
        _ => None,
    }
}

#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(Arc<Mutex<HashMap<String, i64>>>),
}

#[derive(Clone)]
pub struct UsageCache {
    backend: Backend,
}

impl UsageCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            backend: Backend::Redis(redis),
        }
    }

    /// Process-local cache with the same contract as the Redis backend.
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Remaining allowance as the gateway currently sees it, if cached.
    pub async fn read_remaining(&self, token: Uuid) -> BillingResult<Option<i64>> {
        match &self.backend {
            Backend::Redis(redis) => {
                let mut conn = redis.clone();
                let remaining: Option<i64> = conn.get(quota_key(token)).await?;
                Ok(remaining)
            }
            Backend::Memory(map) => Ok(lock(map).get(&quota_key(token)).copied()),
        }
    }

    pub async fn invalidate(&self, token: Uuid) -> BillingResult<()> {
        match &self.backend {
            Backend::Redis(redis) => {
                let mut conn = redis.clone();
                let _: () = conn.del(quota_key(token)).await?;
            }
            Backend::Memory(map) => {
                lock(map).remove(&quota_key(token));
            }
        }
        Ok(())
    }

    pub async fn force_set(&self, token: Uuid, remaining: i64) -> BillingResult<()> {
        match &self.backend {
            Backend::Redis(redis) => {
                let mut conn = redis.clone();
                let _: () = conn.set(quota_key(token), remaining).await?;
            }
            Backend::Memory(map) => {
                lock(map).insert(quota_key(token), remaining);
            }
        }
        Ok(())
    }

    /// Carry the cached allowance across a token rotation so the user does
    /// not gain a fresh window by rotating. Copy first, then delete.
    pub async fn transfer(&self, old_token: Uuid, new_token: Uuid) -> BillingResult<()> {
        match &self.backend {
            Backend::Redis(redis) => {
                let mut conn = redis.clone();
                let remaining: Option<i64> = conn.get(quota_key(old_token)).await?;
                if let Some(remaining) = remaining {
                    let _: () = conn.set(quota_key(new_token), remaining).await?;
                }
                let _: () = conn.del(quota_key(old_token)).await?;
            }
            Backend::Memory(map) => {
                let mut map = lock(map);
                if let Some(remaining) = map.remove(&quota_key(old_token)) {
                    map.insert(quota_key(new_token), remaining);
                }
            }
        }
        Ok(())
    }
}

fn lock(map: &Mutex<HashMap<String, i64>>) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tariff_change_always_sets_fresh_limit() {
        assert_eq!(plan_resync(true, Some(900), 5000), Some(5000));
        assert_eq!(plan_resync(true, None, 5000), Some(5000));
    }

    #[test]
    fn extension_preserves_remaining_allowance() {
        assert_eq!(plan_resync(false, Some(412), 1000), None);
    }

    #[test]
    fn extension_tops_up_exhausted_counter() {
        assert_eq!(plan_resync(false, Some(0), 1000), Some(1000));
        assert_eq!(plan_resync(false, Some(-3), 1000), Some(1000));
    }

    #[test]
    fn absent_entry_repopulates_lazily() {
        assert_eq!(plan_resync(false, None, 1000), None);
    }

    #[tokio::test]
    async fn transfer_carries_remaining_across_rotation() {
        #![allow(clippy::unwrap_used)]

        let cache = UsageCache::new_in_memory();
        let old_token = Uuid::new_v4();
        let new_token = Uuid::new_v4();

        cache.force_set(old_token, 42).await.unwrap();
        cache.transfer(old_token, new_token).await.unwrap();

        assert_eq!(cache.read_remaining(new_token).await.unwrap(), Some(42));
        // Rotation must not leave a stale allowance behind the old key.
        assert_eq!(cache.read_remaining(old_token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn transfer_of_uncached_token_stays_lazy() {
        #![allow(clippy::unwrap_used)]

        let cache = UsageCache::new_in_memory();
        let old_token = Uuid::new_v4();
        let new_token = Uuid::new_v4();

        cache.transfer(old_token, new_token).await.unwrap();

        assert_eq!(cache.read_remaining(new_token).await.unwrap(), None);
    }
}
