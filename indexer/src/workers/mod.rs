//! Shared read-loop plumbing for the three pipeline stages: blocking
//! consumer-group reads, a bounded-concurrency task pool, the
//! consecutive-error breaker, and the pending-message recovery loop.
//! Each stage (`l1`, `l2`, `l3`) supplies only its `process_job` logic.

pub mod l1;
pub mod l2;
pub mod l3;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::BrokerClient;
use crate::config::{
    BROKER_ERROR_BACKOFF, BROKER_MAX_CONSECUTIVE_ERRORS, BROKER_READ_BLOCK, RECOVERY_CLAIM_COUNT,
    RECOVERY_MIN_IDLE, RECOVERY_POLL_INTERVAL,
};

/// A stage's per-message handler: given the delivered `job_id` and the
/// stream's own `message_id`, it fetches the envelope, does the work, writes
/// a terminal status, and acks — or leaves the message un-ack'd on
/// cancellation so recovery redelivers it.
pub type ProcessFn =
    Arc<dyn Fn(Uuid, String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct WorkerLoopConfig {
    pub stream: &'static str,
    pub group: &'static str,
    pub consumer: String,
    pub job_limit: usize,
    pub label: &'static str,
}

/// Runs the read loop for one stage until shutdown is requested or the
/// consecutive-error breaker trips. Spawns a sibling recovery task that
/// reclaims stalled deliveries on the same schedule as the main loop.
pub async fn run(
    mut broker: BrokerClient,
    cfg: WorkerLoopConfig,
    process: ProcessFn,
    shutdown: CancellationToken,
) {
    if let Err(e) = broker.ensure_group(cfg.stream, cfg.group).await {
        error!(stage = cfg.label, error = %e, "failed to create consumer group, aborting worker");
        return;
    }

    let recovery_handle = tokio::spawn(recovery_loop(
        broker.clone(),
        cfg.stream,
        cfg.group,
        cfg.consumer.clone(),
        cfg.label,
        process.clone(),
        shutdown.clone(),
    ));

    let semaphore = Arc::new(Semaphore::new(cfg.job_limit));
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut consecutive_errors: u32 = 0;

    info!(stage = cfg.label, consumer = %cfg.consumer, "worker started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match broker
            .read_one(cfg.stream, cfg.group, &cfg.consumer, BROKER_READ_BLOCK.as_millis() as u64)
            .await
        {
            Ok(Some(message)) => {
                consecutive_errors = 0;
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
                let process = process.clone();
                let job_id = message.job_id;
                let message_id = message.message_id;
                tasks.spawn(async move {
                    process(job_id, message_id).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                consecutive_errors = 0;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(stage = cfg.label, error = %e, consecutive_errors, "broker read error");
                if consecutive_errors >= BROKER_MAX_CONSECUTIVE_ERRORS {
                    error!(stage = cfg.label, "consecutive error threshold reached, shutting down");
                    shutdown.cancel();
                    break;
                }
                tokio::time::sleep(BROKER_ERROR_BACKOFF).await;
            }
        }

        // Drain any tasks that already finished, without blocking the read loop.
        while tasks.try_join_next().is_some() {}
    }

    info!(stage = cfg.label, in_flight = tasks.len(), "draining in-flight jobs");
    while tasks.join_next().await.is_some() {}
    recovery_handle.abort();
}

async fn recovery_loop(
    mut broker: BrokerClient,
    stream: &'static str,
    group: &'static str,
    consumer: String,
    label: &'static str,
    process: ProcessFn,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(RECOVERY_POLL_INTERVAL) => {}
            _ = shutdown.cancelled() => break,
        }

        let started = Instant::now();
        match broker
            .claim_stale(stream, group, &consumer, RECOVERY_MIN_IDLE, RECOVERY_CLAIM_COUNT)
            .await
        {
            Ok(messages) if !messages.is_empty() => {
                info!(stage = label, count = messages.len(), "recovered stalled deliveries");
                for message in messages {
                    let process = process.clone();
                    tokio::spawn(async move {
                        process(message.job_id, message.message_id).await;
                    });
                }
            }
            Ok(_) => {}
            Err(e) => warn!(stage = label, error = %e, "recovery poll failed"),
        }
        tracing::debug!(stage = label, elapsed_ms = started.elapsed().as_millis(), "recovery cycle done");
    }
}
