use chrono::Utc;
use color_eyre::Result;
use sqlx::PgPool;

use crate::types::PendingUrlRow;

#[derive(Clone)]
pub struct UrlEntryRepository {
    pool: PgPool,
}

impl UrlEntryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// L1's batch-assembly query: pending, actionable URLs for `shop`,
    /// oldest-retried-first, capped at `limit`. When
    /// `filter_google_indexed` is set, URLs Google already confirmed
    /// are excluded — the production code path per the source system.
    pub async fn fetch_pending(
        &self,
        shop: &str,
        filter_google_indexed: bool,
        limit: i64,
    ) -> Result<Vec<PendingUrlRow>, sqlx::Error> {
        if filter_google_indexed {
            sqlx::query_as::<_, PendingUrlRow>(
                r#"SELECT "webUrl", "indexAction", attempts
                   FROM url_entry
                   WHERE shop = $1
                     AND status = 'PENDING'
                     AND "indexAction" != 'IGNORE'
                     AND "isGoogleIndexed" = false
                   ORDER BY attempts DESC
                   LIMIT $2"#,
            )
            .bind(shop)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, PendingUrlRow>(
                r#"SELECT "webUrl", "indexAction", attempts
                   FROM url_entry
                   WHERE shop = $1
                     AND status = 'PENDING'
                     AND "indexAction" != 'IGNORE'
                   ORDER BY attempts DESC
                   LIMIT $2"#,
            )
            .bind(shop)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// L3 step 4a: URLs both providers confirmed.
    pub async fn mark_both_indexed(&self, shop: &str, urls: &[String]) -> Result<u64, sqlx::Error> {
        if urls.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"UPDATE url_entry
               SET "isGoogleIndexed" = true,
                   "isBingIndexed" = true,
                   status = 'COMPLETED',
                   "lastIndexedAt" = $3,
                   "updatedAt" = $3
               WHERE shop = $1 AND "webUrl" = ANY($2)"#,
        )
        .bind(shop)
        .bind(urls)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// L3 step 4b: URLs only Google confirmed.
    pub async fn mark_google_indexed(&self, shop: &str, urls: &[String]) -> Result<u64, sqlx::Error> {
        if urls.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"UPDATE url_entry
               SET "isGoogleIndexed" = true,
                   "lastIndexedAt" = $3,
                   "updatedAt" = $3
               WHERE shop = $1 AND "webUrl" = ANY($2) AND "isGoogleIndexed" = false"#,
        )
        .bind(shop)
        .bind(urls)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// L3 step 4c: URLs only Bing confirmed.
    pub async fn mark_bing_indexed(&self, shop: &str, urls: &[String]) -> Result<u64, sqlx::Error> {
        if urls.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"UPDATE url_entry
               SET "isBingIndexed" = true,
                   "updatedAt" = $3
               WHERE shop = $1 AND "webUrl" = ANY($2) AND "isBingIndexed" = false"#,
        )
        .bind(shop)
        .bind(urls)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Partition of two URL sets for L3's three-way reconciliation, split
/// out as pure logic so it can be unit tested without a database.
pub fn partition_urls(
    google_urls: &[String],
    bing_urls: &[String],
) -> (Vec<String>, Vec<String>, Vec<String>) {
    use std::collections::HashSet;

    let google_set: HashSet<&String> = google_urls.iter().collect();
    let bing_set: HashSet<&String> = bing_urls.iter().collect();

    let both: Vec<String> = google_set.intersection(&bing_set).map(|s| (*s).clone()).collect();
    let google_only: Vec<String> = google_set.difference(&bing_set).map(|s| (*s).clone()).collect();
    let bing_only: Vec<String> = bing_set.difference(&google_set).map(|s| (*s).clone()).collect();

    (both, google_only, bing_only)
}
