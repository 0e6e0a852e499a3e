//! In-process cache of `Auth` rows keyed by shop. Carried in the code
//! path but disabled by default — every lookup falls through to
//! Postgres unless a caller explicitly opts in with [`AuthCache::enabled`].

use std::time::Duration;

use moka::future::Cache;

use crate::types::Auth;

const DEFAULT_CAPACITY: u64 = 10_000;
const TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub enum AuthCache {
    Disabled,
    Enabled(Cache<String, Auth>),
}

impl AuthCache {
    pub fn disabled() -> Self {
        AuthCache::Disabled
    }

    pub fn enabled() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        AuthCache::Enabled(Cache::builder().max_capacity(capacity).time_to_live(TTL).build())
    }

    pub async fn get(&self, shop: &str) -> Option<Auth> {
        match self {
            AuthCache::Disabled => None,
            AuthCache::Enabled(cache) => cache.get(shop).await,
        }
    }

    pub async fn insert(&self, shop: String, auth: Auth) {
        if let AuthCache::Enabled(cache) = self {
            cache.insert(shop, auth).await;
        }
    }

    pub async fn invalidate(&self, shop: &str) {
        if let AuthCache::Enabled(cache) = self {
            cache.invalidate(shop).await;
        }
    }
}
