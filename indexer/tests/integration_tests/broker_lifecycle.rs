use std::time::Duration;

use indexer::broker::{BrokerClient, JobEnvelope, JobStatus, envelope::ttl, keys};
use indexer::types::SeedJobPayload;
use serial_test::serial;
use uuid::Uuid;

use crate::common::container::{get_or_create_redis_container, redis_url};

#[tokio::test]
#[serial]
async fn ghost_job_has_no_envelope_to_fetch() {
    let redis = get_or_create_redis_container().await;
    let mut broker = BrokerClient::connect(&redis_url(redis.port)).await.expect("connect to redis");

    let ghost_id = Uuid::new_v4();
    let envelope: Option<JobEnvelope<SeedJobPayload>> =
        broker.fetch_envelope(keys::L1_NAMESPACE, &ghost_id).await.expect("fetch_envelope");
    assert!(envelope.is_none());
}

#[tokio::test]
#[serial]
async fn unacked_message_is_recovered_by_claim_stale() {
    let redis = get_or_create_redis_container().await;
    let mut broker = BrokerClient::connect(&redis_url(redis.port)).await.expect("connect to redis");

    broker.ensure_group(keys::L1_STREAM, keys::L1_GROUP).await.expect("ensure_group");

    let shop = format!("recover-{}", Uuid::new_v4());
    let job_id = broker
        .submit(keys::L1_STREAM, keys::L1_NAMESPACE, SeedJobPayload::new(shop.clone()), ttl::SCHEDULER_SEED)
        .await
        .expect("submit");

    let first_read = broker
        .read_one(keys::L1_STREAM, keys::L1_GROUP, "crashed-consumer", 2_000)
        .await
        .expect("read_one")
        .expect("message must be delivered");
    assert_eq!(first_read.job_id, job_id);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let reclaimed = broker
        .claim_stale(keys::L1_STREAM, keys::L1_GROUP, "recovery-consumer", Duration::from_millis(10), 10)
        .await
        .expect("claim_stale");

    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].job_id, job_id);
    assert_eq!(reclaimed[0].message_id, first_read.message_id);

    broker.ack(keys::L1_STREAM, keys::L1_GROUP, &reclaimed[0].message_id).await.expect("ack");
}

#[tokio::test]
#[serial]
async fn acked_message_is_not_reclaimed() {
    let redis = get_or_create_redis_container().await;
    let mut broker = BrokerClient::connect(&redis_url(redis.port)).await.expect("connect to redis");

    broker.ensure_group(keys::L1_STREAM, keys::L1_GROUP).await.expect("ensure_group");

    let shop = format!("acked-{}", Uuid::new_v4());
    broker
        .submit(keys::L1_STREAM, keys::L1_NAMESPACE, SeedJobPayload::new(shop), ttl::SCHEDULER_SEED)
        .await
        .expect("submit");

    let message = broker
        .read_one(keys::L1_STREAM, keys::L1_GROUP, "well-behaved-consumer", 2_000)
        .await
        .expect("read_one")
        .expect("message must be delivered");

    broker.ack(keys::L1_STREAM, keys::L1_GROUP, &message.message_id).await.expect("ack");

    tokio::time::sleep(Duration::from_millis(50)).await;

    let reclaimed = broker
        .claim_stale(keys::L1_STREAM, keys::L1_GROUP, "recovery-consumer", Duration::from_millis(10), 10)
        .await
        .expect("claim_stale");

    assert!(reclaimed.iter().all(|m| m.message_id != message.message_id));
}

#[tokio::test]
#[serial]
async fn put_terminal_overwrites_envelope_status() {
    let redis = get_or_create_redis_container().await;
    let mut broker = BrokerClient::connect(&redis_url(redis.port)).await.expect("connect to redis");

    let shop = format!("terminal-{}", Uuid::new_v4());
    let job_id = broker
        .submit(keys::L1_STREAM, keys::L1_NAMESPACE, SeedJobPayload::new(shop), ttl::SCHEDULER_SEED)
        .await
        .expect("submit");

    let mut envelope: JobEnvelope<SeedJobPayload> = broker
        .fetch_envelope(keys::L1_NAMESPACE, &job_id)
        .await
        .expect("fetch_envelope")
        .expect("envelope must exist");
    assert_eq!(envelope.status, JobStatus::Queued);

    let started_at = envelope.created_at;
    envelope.mark_completed(started_at, Some(0));
    broker.put_terminal(keys::L1_NAMESPACE, &job_id, &envelope, ttl::L1_OUTPUT).await.expect("put_terminal");

    let reread: JobEnvelope<SeedJobPayload> = broker
        .fetch_envelope(keys::L1_NAMESPACE, &job_id)
        .await
        .expect("fetch_envelope")
        .expect("envelope must still exist");
    assert_eq!(reread.status, JobStatus::Completed);
}
