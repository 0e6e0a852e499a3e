use chrono::Utc;
use indexer::broker::{BrokerClient, keys};
use indexer::repository::AuthRepository;
use indexer::scheduler;
use serial_test::serial;
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::container::{get_or_create_container, get_or_create_redis_container, redis_url};
use crate::common::db_setup::{seed_auth, setup_test_db_with_port};

async fn unique_test_suite() -> (PgPool, AuthRepository, BrokerClient) {
    let db = get_or_create_container().await;
    let redis = get_or_create_redis_container().await;
    let dbs = setup_test_db_with_port(db.port).await;
    let broker = BrokerClient::connect(&redis_url(redis.port)).await.expect("connect to redis");
    let auth_repo = AuthRepository::new(dbs.app_pool.clone());
    (dbs.app_pool, auth_repo, broker)
}

#[tokio::test]
#[serial]
async fn cold_shop_is_scheduled_on_first_cycle() {
    let (pool, auth_repo, mut broker) = unique_test_suite().await;
    let shop = format!("cold-{}", Uuid::new_v4());
    seed_auth(&pool, &shop, None, None).await;

    let stats = scheduler::run_cycle(&auth_repo, &mut broker).await.expect("run_cycle");
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.skipped, 0);

    let message = broker
        .read_one(keys::L1_STREAM, keys::L1_GROUP, "test-consumer", 2_000)
        .await
        .expect("read_one")
        .expect("expected a seeded L1 message");

    let envelope: indexer::broker::JobEnvelope<indexer::types::SeedJobPayload> = broker
        .fetch_envelope(keys::L1_NAMESPACE, &message.job_id)
        .await
        .expect("fetch_envelope")
        .expect("envelope must exist");
    assert_eq!(envelope.data.shop, shop);
}

#[tokio::test]
#[serial]
async fn warm_shop_inside_interval_is_skipped() {
    let (pool, auth_repo, mut broker) = unique_test_suite().await;
    let shop = format!("warm-{}", Uuid::new_v4());
    seed_auth(&pool, &shop, None, None).await;

    scheduler::run_cycle(&auth_repo, &mut broker).await.expect("first cycle");
    let stats = scheduler::run_cycle(&auth_repo, &mut broker).await.expect("second cycle");

    assert_eq!(stats.scheduled, 0);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
#[serial]
async fn daily_cap_blocks_a_third_schedule() {
    let (_pool, _auth_repo, mut broker) = unique_test_suite().await;
    let shop = format!("capped-{}", Uuid::new_v4());
    let now = Utc::now();

    scheduler::schedule_shop(&mut broker, &shop, now).await.expect("schedule 1");
    scheduler::schedule_shop(&mut broker, &shop, now + chrono::Duration::hours(13))
        .await
        .expect("schedule 2");

    let field = format!("{shop}:{}", now.format("%Y-%m-%d"));
    let count: i64 = broker
        .hget("scheduler:daily_runs", &field)
        .await
        .expect("hget")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    assert_eq!(count, 2);
}
