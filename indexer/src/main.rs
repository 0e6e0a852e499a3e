use clap::{Parser, ValueEnum};
use color_eyre::Result;
use indexer::broker::BrokerClient;
use indexer::config::Config;
use indexer::repository::{AuthCache, AuthRepository, UrlEntryRepository};
use indexer::{runtime, scheduler, workers};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunMode {
    /// Runs only the scheduler loop.
    Scheduler,
    /// Runs only the L1 (assemble) worker.
    L1,
    /// Runs only the L2 (dispatch) worker.
    L2,
    /// Runs only the L3 (reconcile) worker.
    L3,
    /// Runs the scheduler and all three workers in one process.
    All,
}

#[derive(Debug, Parser)]
#[command(name = "indexer", about = "Rate-limited storefront URL indexing pipeline")]
struct Cli {
    #[arg(value_enum)]
    mode: RunMode,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::new_from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(config.log_level.clone())))
        .init();

    info!(mode = ?cli.mode, env = config.env, "indexer starting");

    let pool = sqlx::PgPool::connect(&config.database_url).await?;
    let mut broker = BrokerClient::connect(&config.redis_url()).await?;
    runtime::check_connections(&pool, &mut broker).await?;

    let auth_cache = if config.auth_cache_enabled { AuthCache::enabled() } else { AuthCache::disabled() };
    let auth_repo = AuthRepository::with_cache(pool.clone(), auth_cache);
    let url_repo = UrlEntryRepository::new(pool);
    let shutdown = runtime::install_shutdown_handler();

    let tasks = spawn_for_mode(cli.mode, &config, auth_repo, url_repo, broker, shutdown.clone());

    runtime::join_with_graceful_shutdown(&config, &shutdown, tasks).await;

    info!("indexer shut down");
    Ok(())
}

fn spawn_for_mode(
    mode: RunMode,
    config: &Config,
    auth_repo: AuthRepository,
    url_repo: UrlEntryRepository,
    broker: BrokerClient,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    match mode {
        RunMode::Scheduler => vec![spawn_scheduler(config.clone(), auth_repo, broker, shutdown)],
        RunMode::L1 => vec![spawn_l1(config, auth_repo, url_repo, broker, shutdown)],
        RunMode::L2 => vec![spawn_l2(config, broker, shutdown)],
        RunMode::L3 => vec![spawn_l3(url_repo, broker, shutdown)],
        RunMode::All => vec![
            spawn_scheduler(config.clone(), auth_repo.clone(), broker.clone(), shutdown.clone()),
            spawn_l1(config, auth_repo, url_repo.clone(), broker.clone(), shutdown.clone()),
            spawn_l2(config, broker.clone(), shutdown.clone()),
            spawn_l3(url_repo, broker, shutdown),
        ],
    }
}

fn spawn_scheduler(
    config: Config,
    auth_repo: AuthRepository,
    mut broker: BrokerClient,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        scheduler::run_continuous(&config, &auth_repo, &mut broker, shutdown).await;
    })
}

fn spawn_l1(
    config: &Config,
    auth_repo: AuthRepository,
    url_repo: UrlEntryRepository,
    broker: BrokerClient,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let process = workers::l1::process_fn(auth_repo, url_repo, broker.clone(), config.l1_filter_google_indexed);
    let cfg = workers::l1::loop_config();
    tokio::spawn(async move {
        workers::run(broker, cfg, process, shutdown).await;
    })
}

fn spawn_l2(config: &Config, broker: BrokerClient, shutdown: CancellationToken) -> JoinHandle<()> {
    let process = workers::l2::process_fn(broker.clone(), config.encryption_key.clone());
    let cfg = workers::l2::loop_config();
    tokio::spawn(async move {
        workers::run(broker, cfg, process, shutdown).await;
    })
}

fn spawn_l3(url_repo: UrlEntryRepository, broker: BrokerClient, shutdown: CancellationToken) -> JoinHandle<()> {
    let process = workers::l3::process_fn(url_repo, broker.clone());
    let cfg = workers::l3::loop_config();
    tokio::spawn(async move {
        workers::run(broker, cfg, process, shutdown).await;
    })
}
