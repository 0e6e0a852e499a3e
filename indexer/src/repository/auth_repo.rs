use color_eyre::Result;
use sqlx::PgPool;

use super::AuthCache;
use crate::types::Auth;

#[derive(Clone)]
pub struct AuthRepository {
    pool: PgPool,
    cache: AuthCache,
}

impl AuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, cache: AuthCache::disabled() }
    }

    pub fn with_cache(pool: PgPool, cache: AuthCache) -> Self {
        Self { pool, cache }
    }

    pub async fn get_by_shop(&self, shop: &str) -> Result<Option<Auth>, sqlx::Error> {
        if let Some(cached) = self.cache.get(shop).await {
            return Ok(Some(cached));
        }

        let row = sqlx::query_as::<_, Auth>(
            r#"SELECT id, shop, "googleConfig", "bingApiKey", settings, "createdAt", "updatedAt"
               FROM auth
               WHERE shop = $1"#,
        )
        .bind(shop)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(auth) = &row {
            self.cache.insert(shop.to_string(), auth.clone()).await;
        }

        Ok(row)
    }

    /// All distinct shops with an `auth` row — the scheduler's
    /// per-cycle candidate population.
    pub async fn list_shops(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT shop FROM auth ORDER BY shop")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(shop,)| shop).collect())
    }
}
