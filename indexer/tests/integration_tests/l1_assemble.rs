use indexer::broker::{BrokerClient, JobEnvelope, JobStatus, envelope::ttl, keys};
use indexer::repository::{AuthRepository, UrlEntryRepository};
use indexer::types::{SeedJobPayload, UrlIndexBatchJob};
use indexer::workers::l1;
use serial_test::serial;
use uuid::Uuid;

use crate::common::container::{get_or_create_container, get_or_create_redis_container, redis_url};
use crate::common::db_setup::{seed_auth, seed_url_entry, setup_test_db_with_port};

async fn submit_seed(broker: &mut BrokerClient, shop: &str) -> (Uuid, String) {
    broker.ensure_group(keys::L1_STREAM, keys::L1_GROUP).await.expect("ensure_group");
    broker
        .submit(keys::L1_STREAM, keys::L1_NAMESPACE, SeedJobPayload::new(shop.to_string()), ttl::SCHEDULER_SEED)
        .await
        .expect("submit seed");

    let message = broker
        .read_one(keys::L1_STREAM, keys::L1_GROUP, "l1-test-consumer", 2_000)
        .await
        .expect("read_one")
        .expect("seed message must be delivered");
    (message.job_id, message.message_id)
}

#[tokio::test]
#[serial]
async fn assembles_a_batch_and_emits_an_l2_job() {
    let db = get_or_create_container().await;
    let redis = get_or_create_redis_container().await;
    let dbs = setup_test_db_with_port(db.port).await;
    let mut broker = BrokerClient::connect(&redis_url(redis.port)).await.expect("connect to redis");

    let shop = format!("l1-{}", Uuid::new_v4());
    seed_auth(&dbs.app_pool, &shop, None, None).await;
    seed_url_entry(&dbs.app_pool, &shop, "https://example.com/a", "INDEX", 0).await;
    seed_url_entry(&dbs.app_pool, &shop, "https://example.com/b", "DELETE", 0).await;
    seed_url_entry(&dbs.app_pool, &shop, "https://example.com/c", "IGNORE", 0).await;

    let auth_repo = AuthRepository::new(dbs.app_pool.clone());
    let url_repo = UrlEntryRepository::new(dbs.app_pool.clone());
    let process = l1::process_fn(auth_repo, url_repo, broker.clone(), true);

    let (job_id, message_id) = submit_seed(&mut broker, &shop).await;
    process(job_id, message_id).await;

    broker.ensure_group(keys::L2_STREAM, keys::L2_GROUP).await.expect("ensure_group l2");
    let l2_message = broker
        .read_one(keys::L2_STREAM, keys::L2_GROUP, "l2-test-consumer", 2_000)
        .await
        .expect("read_one l2")
        .expect("L1 must have emitted an L2 job");

    let envelope: JobEnvelope<UrlIndexBatchJob> = broker
        .fetch_envelope(keys::L2_NAMESPACE, &l2_message.job_id)
        .await
        .expect("fetch_envelope")
        .expect("envelope must exist");

    assert_eq!(envelope.data.shop, shop);
    assert_eq!(envelope.data.actions.index.len(), 1);
    assert_eq!(envelope.data.actions.delete.len(), 1);

    let original: JobEnvelope<SeedJobPayload> = broker
        .fetch_envelope(keys::L1_NAMESPACE, &job_id)
        .await
        .expect("fetch_envelope l1")
        .expect("original envelope must still exist");
    assert_eq!(original.status, JobStatus::Completed);
}

#[tokio::test]
#[serial]
async fn shop_with_no_pending_urls_completes_without_an_l2_job() {
    let db = get_or_create_container().await;
    let redis = get_or_create_redis_container().await;
    let dbs = setup_test_db_with_port(db.port).await;
    let mut broker = BrokerClient::connect(&redis_url(redis.port)).await.expect("connect to redis");

    let shop = format!("l1-empty-{}", Uuid::new_v4());
    seed_auth(&dbs.app_pool, &shop, None, None).await;

    let auth_repo = AuthRepository::new(dbs.app_pool.clone());
    let url_repo = UrlEntryRepository::new(dbs.app_pool.clone());
    let process = l1::process_fn(auth_repo, url_repo, broker.clone(), true);

    let (job_id, message_id) = submit_seed(&mut broker, &shop).await;
    process(job_id, message_id).await;

    let envelope: JobEnvelope<SeedJobPayload> = broker
        .fetch_envelope(keys::L1_NAMESPACE, &job_id)
        .await
        .expect("fetch_envelope")
        .expect("envelope must exist");
    assert_eq!(envelope.status, JobStatus::Completed);
    assert_eq!(envelope.error.as_deref(), Some("No URLs to process"));
}
