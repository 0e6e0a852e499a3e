//! The periodic control loop: decide per-shop eligibility against shared
//! state in the kv-store, and emit one seed job per eligible shop.

use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, envelope::ttl, keys};
use crate::config::{Config, SCHEDULER_MAX_RUNS_PER_DAY, SCHEDULER_MIN_INTERVAL};
use crate::repository::AuthRepository;
use crate::types::SeedJobPayload;

const STATE_KEY: &str = "scheduler:state";
const DAILY_RUNS_KEY: &str = "scheduler:daily_runs";
const STATS_KEY: &str = "scheduler:stats";
const DAILY_RUNS_RETENTION_DAYS: i64 = 2;

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub scheduled: u32,
    pub skipped: u32,
}

/// Evaluated at `now`: a shop is due if it has never run, or its last run
/// was at least [`SCHEDULER_MIN_INTERVAL`] ago, and it hasn't already run
/// [`SCHEDULER_MAX_RUNS_PER_DAY`] times today.
pub fn is_eligible(last_run: Option<DateTime<Utc>>, daily_run_count: u32, now: DateTime<Utc>) -> bool {
    let interval_ok = match last_run {
        None => true,
        Some(last) => (now - last).to_std().unwrap_or_default() >= SCHEDULER_MIN_INTERVAL,
    };
    interval_ok && daily_run_count < SCHEDULER_MAX_RUNS_PER_DAY
}

fn daily_runs_field(shop: &str, day: NaiveDate) -> String {
    format!("{shop}:{}", day.format("%Y-%m-%d"))
}

async fn last_run(broker: &mut BrokerClient, shop: &str) -> Result<Option<DateTime<Utc>>> {
    match broker.hget(STATE_KEY, shop).await? {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(&raw).ok().map(|d| d.with_timezone(&Utc))),
        None => Ok(None),
    }
}

async fn daily_run_count(broker: &mut BrokerClient, shop: &str, day: NaiveDate) -> Result<u32> {
    match broker.hget(DAILY_RUNS_KEY, &daily_runs_field(shop, day)).await? {
        Some(raw) => Ok(raw.parse().unwrap_or(0)),
        None => Ok(0),
    }
}

/// Runs one scheduling cycle: fetch all shops, schedule the eligible ones,
/// update bookkeeping, reap stale `daily_runs` entries.
pub async fn run_cycle(
    auth_repo: &AuthRepository,
    broker: &mut BrokerClient,
) -> Result<CycleStats> {
    let now = Utc::now();
    let today = now.date_naive();
    let shops = auth_repo.list_shops().await?;

    let mut stats = CycleStats::default();

    for shop in &shops {
        let last = last_run(broker, shop).await?;
        let count = daily_run_count(broker, shop, today).await?;

        if !is_eligible(last, count, now) {
            stats.skipped += 1;
            continue;
        }

        schedule_shop(broker, shop, now).await?;
        stats.scheduled += 1;
    }

    reap_daily_runs(broker, now).await?;
    update_stats(broker, &stats, now).await?;

    info!(scheduled = stats.scheduled, skipped = stats.skipped, "scheduler cycle complete");
    Ok(stats)
}

/// Emits a seed job for `shop` and updates its last-run/daily-run
/// bookkeeping, bypassing the eligibility check — used by manual mode.
pub async fn schedule_shop(broker: &mut BrokerClient, shop: &str, now: DateTime<Utc>) -> Result<()> {
    let payload = SeedJobPayload::new(shop.to_string());
    broker
        .submit(keys::L1_STREAM, keys::L1_NAMESPACE, payload, ttl::SCHEDULER_SEED)
        .await?;

    broker.hset(STATE_KEY, shop, &now.to_rfc3339()).await?;
    let field = daily_runs_field(shop, now.date_naive());
    broker.hincr(DAILY_RUNS_KEY, &field, 1).await?;
    broker.expire(DAILY_RUNS_KEY, DAILY_RUNS_RETENTION_DAYS * 24 * 60 * 60).await?;

    debug!(shop, "seed job scheduled");
    Ok(())
}

async fn reap_daily_runs(broker: &mut BrokerClient, now: DateTime<Utc>) -> Result<()> {
    let entries = broker.hgetall(DAILY_RUNS_KEY).await?;
    let cutoff = now.date_naive() - chrono::Duration::days(DAILY_RUNS_RETENTION_DAYS);

    let stale: Vec<String> = entries
        .into_iter()
        .filter_map(|(field, _)| {
            let date_part = field.rsplit(':').next()?;
            let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
            (date < cutoff).then_some(field)
        })
        .collect();

    if !stale.is_empty() {
        debug!(count = stale.len(), "reaping stale daily_runs entries");
        broker.hdel(DAILY_RUNS_KEY, &stale).await?;
    }
    Ok(())
}

async fn update_stats(broker: &mut BrokerClient, stats: &CycleStats, now: DateTime<Utc>) -> Result<()> {
    broker.hset(STATS_KEY, "last_run_at", &now.to_rfc3339()).await?;
    broker
        .hset(STATS_KEY, "last_scheduled_count", &stats.scheduled.to_string())
        .await?;
    broker
        .hset(STATS_KEY, "last_skipped_count", &stats.skipped.to_string())
        .await?;
    broker.hincr(STATS_KEY, "cumulative_run_count", 1).await?;
    Ok(())
}

/// Drives the scheduler loop on `config.scheduler_tick` until cancelled.
pub async fn run_continuous(
    config: &Config,
    auth_repo: &AuthRepository,
    broker: &mut BrokerClient,
    shutdown: CancellationToken,
) {
    info!(tick = ?config.scheduler_tick, "scheduler starting");
    loop {
        if let Err(e) = run_cycle(auth_repo, broker).await {
            warn!(error = %e, "scheduler cycle failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(config.scheduler_tick) => {}
            _ = shutdown.cancelled() => {
                info!("scheduler received shutdown signal");
                break;
            }
        }
    }
}
