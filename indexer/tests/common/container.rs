#![allow(dead_code)]

use std::sync::{Arc, LazyLock, Weak};
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::redis::Redis;
use tokio::sync::Mutex;

pub const POSTGRES_USER: &str = "postgres";
pub const POSTGRES_PASSWORD: &str = "postgres";

pub struct ContainerState {
    pub container: ContainerAsync<Postgres>,
    pub port: u16,
}

static CONTAINER: LazyLock<Mutex<Weak<ContainerState>>> = LazyLock::new(|| Mutex::new(Weak::new()));

pub async fn get_or_create_container() -> Arc<ContainerState> {
    let mut weak_lock = CONTAINER.lock().await;

    if let Some(arc) = weak_lock.upgrade() {
        return arc;
    }

    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("Failed to start Postgres container");

    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get container port");

    let state = Arc::new(ContainerState { container, port });
    *weak_lock = Arc::downgrade(&state);

    state
}

pub struct RedisContainerState {
    pub container: ContainerAsync<Redis>,
    pub port: u16,
}

static REDIS_CONTAINER: LazyLock<Mutex<Weak<RedisContainerState>>> =
    LazyLock::new(|| Mutex::new(Weak::new()));

pub async fn get_or_create_redis_container() -> Arc<RedisContainerState> {
    let mut weak_lock = REDIS_CONTAINER.lock().await;

    if let Some(arc) = weak_lock.upgrade() {
        return arc;
    }

    let container = Redis::default().start().await.expect("Failed to start Redis container");
    let port = container.get_host_port_ipv4(6379).await.expect("Failed to get container port");

    let state = Arc::new(RedisContainerState { container, port });
    *weak_lock = Arc::downgrade(&state);

    state
}

pub fn redis_url(port: u16) -> String {
    format!("redis://127.0.0.1:{port}")
}
