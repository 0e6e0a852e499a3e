use chrono::Utc;
use indexer::broker::{BrokerClient, envelope::ttl, keys};
use indexer::repository::UrlEntryRepository;
use indexer::types::{
    BingBatchResult, BingBatchUrlResult, BingOutcome, BingResultStatus, GoogleBatchResult, GoogleOutcome,
    GoogleResultStatus, GoogleUrlResult, IndexResultEnvelope,
};
use indexer::workers::l3;
use serial_test::serial;
use uuid::Uuid;

use crate::common::container::{get_or_create_container, get_or_create_redis_container, redis_url};
use crate::common::db_setup::{fetch_url_flags, seed_auth, seed_url_entry, setup_test_db_with_port};

fn google_result(url: &str, status: GoogleResultStatus, http_status: u16) -> GoogleUrlResult {
    GoogleUrlResult {
        url: url.to_string(),
        action: "URL_UPDATED".to_string(),
        status,
        attempts: 1,
        error_message: None,
        http_status: Some(http_status),
    }
}

fn bing_result(urls: &[&str], status: BingResultStatus, http_status: u16) -> BingBatchUrlResult {
    BingBatchUrlResult {
        batch_number: 0,
        urls: urls.iter().map(|u| u.to_string()).collect(),
        url_count: urls.len(),
        status,
        attempts: 1,
        error_message: None,
        http_status: Some(http_status),
    }
}

#[tokio::test]
#[serial]
async fn reconciles_both_google_only_and_bing_only_urls() {
    let db = get_or_create_container().await;
    let redis = get_or_create_redis_container().await;
    let dbs = setup_test_db_with_port(db.port).await;
    let mut broker = BrokerClient::connect(&redis_url(redis.port)).await.expect("connect to redis");

    let shop = format!("l3-{}", Uuid::new_v4());
    seed_auth(&dbs.app_pool, &shop, None, None).await;
    seed_url_entry(&dbs.app_pool, &shop, "https://example.com/both", "INDEX", 0).await;
    seed_url_entry(&dbs.app_pool, &shop, "https://example.com/google-only", "INDEX", 0).await;
    seed_url_entry(&dbs.app_pool, &shop, "https://example.com/bing-only", "INDEX", 0).await;

    let mut google = GoogleBatchResult::default();
    google.add(google_result("https://example.com/both", GoogleResultStatus::Success, 200));
    google.add(google_result("https://example.com/google-only", GoogleResultStatus::Success, 200));

    let mut bing = BingBatchResult::default();
    bing.add(bing_result(
        &["https://example.com/both", "https://example.com/bing-only"],
        BingResultStatus::Success,
        200,
    ));

    let result_envelope = IndexResultEnvelope {
        shop: shop.clone(),
        job_id: Uuid::new_v4(),
        processed_at: Utc::now(),
        google: GoogleOutcome::executed(google),
        bing: BingOutcome::executed(bing),
    };

    broker.ensure_group(keys::L3_STREAM, keys::L3_GROUP).await.expect("ensure_group");
    broker
        .submit(keys::L3_STREAM, keys::L3_NAMESPACE, result_envelope, ttl::L2_RESULT)
        .await
        .expect("submit l3 job");

    let message = broker
        .read_one(keys::L3_STREAM, keys::L3_GROUP, "l3-test-consumer", 2_000)
        .await
        .expect("read_one")
        .expect("l3 message must be delivered");

    let url_repo = UrlEntryRepository::new(dbs.app_pool.clone());
    let process = l3::process_fn(url_repo, broker.clone());
    process(message.job_id, message.message_id).await;

    let (g, b, status) = fetch_url_flags(&dbs.app_pool, &shop, "https://example.com/both").await;
    assert!(g && b);
    assert_eq!(status, "COMPLETED");

    let (g, b, _status) = fetch_url_flags(&dbs.app_pool, &shop, "https://example.com/google-only").await;
    assert!(g && !b);

    let (g, b, _status) = fetch_url_flags(&dbs.app_pool, &shop, "https://example.com/bing-only").await;
    assert!(!g && b);
}
