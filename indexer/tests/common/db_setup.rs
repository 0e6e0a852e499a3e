#![allow(dead_code)]

use sqlx::{PgPool, Postgres, migrate::MigrateDatabase};

pub use super::container::{POSTGRES_PASSWORD, POSTGRES_USER};

pub struct TestDatabases {
    pub app_pool: PgPool,
    pub app_db_name: String,
    pub postgres_host: String,
}

pub async fn setup_test_db_with_port(port: u16) -> TestDatabases {
    let postgres_host = format!("localhost:{port}");
    let test_name = std::thread::current()
        .name()
        .unwrap_or("unknown")
        .rsplit("::")
        .next()
        .unwrap_or("unknown")
        .to_lowercase();

    let app_db_name = format!("test_{test_name}");
    let app_db_url =
        format!("postgres://{POSTGRES_USER}:{POSTGRES_PASSWORD}@{postgres_host}/{app_db_name}");

    if let Err(e) = Postgres::drop_database(&app_db_url).await {
        let err_str = e.to_string();
        if !err_str.contains("does not exist") {
            tracing::warn!("Failed to drop test database {app_db_name}: {e}");
        }
    }

    Postgres::create_database(&app_db_url).await.expect("Failed to create test database");

    let app_pool = PgPool::connect(&app_db_url).await.expect("Failed to connect to test database");

    sqlx::migrate!("./migrations").run(&app_pool).await.expect("Failed to run migrations");

    TestDatabases { app_pool, app_db_name, postgres_host }
}

pub async fn seed_auth(app_pool: &PgPool, shop: &str, google_config: Option<&str>, bing_api_key: Option<&str>) {
    sqlx::query(
        r#"INSERT INTO auth (shop, "googleConfig", "bingApiKey")
           VALUES ($1, $2, $3)
           ON CONFLICT (shop) DO UPDATE SET "googleConfig" = $2, "bingApiKey" = $3"#,
    )
    .bind(shop)
    .bind(google_config)
    .bind(bing_api_key)
    .execute(app_pool)
    .await
    .expect("Failed to insert auth row");
}

pub async fn seed_url_entry(app_pool: &PgPool, shop: &str, web_url: &str, index_action: &str, attempts: i32) {
    sqlx::query(
        r#"INSERT INTO url_entry (shop, "webUrl", "indexAction", attempts)
           VALUES ($1, $2, $3::indexaction, $4)
           ON CONFLICT (shop, "webUrl") DO UPDATE SET "indexAction" = $3::indexaction, attempts = $4"#,
    )
    .bind(shop)
    .bind(web_url)
    .bind(index_action)
    .bind(attempts)
    .execute(app_pool)
    .await
    .expect("Failed to insert url_entry row");
}

pub async fn fetch_url_flags(app_pool: &PgPool, shop: &str, web_url: &str) -> (bool, bool, String) {
    let row: (bool, bool, String) = sqlx::query_as(
        r#"SELECT "isGoogleIndexed", "isBingIndexed", status::text FROM url_entry
           WHERE shop = $1 AND "webUrl" = $2"#,
    )
    .bind(shop)
    .bind(web_url)
    .fetch_one(app_pool)
    .await
    .expect("url_entry row not found");
    row
}
