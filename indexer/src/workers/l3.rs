//! Stage L3: reconciles a merged provider result envelope into the
//! relational store via three idempotent, independently-retried UPDATEs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::envelope::ttl;
use crate::broker::{BrokerClient, JobEnvelope, keys};
use crate::repository::{UrlEntryRepository, partition_urls};
use crate::types::{BingBatchUrlResult, BingResultStatus, GoogleResultStatus, IndexResultEnvelope};

use super::{ProcessFn, WorkerLoopConfig};

const UPDATE_RETRY_LIMIT: u32 = 3;
const UPDATE_RETRY_MIN: Duration = Duration::from_secs(4);
const UPDATE_RETRY_MAX: Duration = Duration::from_secs(10);

pub fn loop_config() -> WorkerLoopConfig {
    WorkerLoopConfig {
        stream: keys::L3_STREAM,
        group: keys::L3_GROUP,
        consumer: keys::consumer_name("l3"),
        job_limit: crate::config::L3_JOB_LIMIT,
        label: "l3",
    }
}

pub fn process_fn(url_repo: UrlEntryRepository, broker: BrokerClient) -> ProcessFn {
    Arc::new(move |job_id, message_id| {
        let url_repo = url_repo.clone();
        let mut broker = broker.clone();
        let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            process_job(&url_repo, &mut broker, job_id, message_id).await;
        });
        fut
    })
}

async fn process_job(
    url_repo: &UrlEntryRepository,
    broker: &mut BrokerClient,
    job_id: Uuid,
    message_id: String,
) {
    let started_at = Utc::now();

    let mut envelope: JobEnvelope<IndexResultEnvelope> =
        match broker.fetch_envelope(keys::L3_NAMESPACE, &job_id).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!(%job_id, "ghost job, acking");
                ack(broker, &message_id).await;
                return;
            }
            Err(e) => {
                warn!(%job_id, error = %e, "malformed L3 envelope, acking and dropping");
                ack(broker, &message_id).await;
                return;
            }
        };

    let result = &envelope.data;
    let google_urls = extract_google_success(result);
    let bing_urls = extract_bing_success(result);
    let (both, google_only, bing_only) = partition_urls(&google_urls, &bing_urls);

    let shop = &result.shop;
    let reconciled = reconcile(url_repo, shop, &both, &google_only, &bing_only).await;

    match reconciled {
        Ok(total_rows) => {
            info!(%job_id, shop, total_rows, "L3 reconciliation complete");
            envelope.mark_completed(started_at, Some(google_urls.len() + bing_urls.len()));
        }
        Err(e) => {
            warn!(%job_id, shop, error = %e, "L3 reconciliation failed");
            envelope.mark_failed(started_at, e.to_string());
        }
    }

    if let Err(e) = broker.put_terminal(keys::L3_NAMESPACE, &job_id, &envelope, ttl::L1_OUTPUT).await {
        warn!(%job_id, error = %e, "failed to write terminal L3 envelope");
    }
    ack(broker, &message_id).await;
}

fn extract_google_success(result: &IndexResultEnvelope) -> Vec<String> {
    result
        .google
        .result
        .as_ref()
        .map(|r| {
            r.results
                .iter()
                .filter(|u| u.status == GoogleResultStatus::Success && u.http_status == Some(200))
                .map(|u| u.url.clone())
                .collect()
        })
        .unwrap_or_default()
}

fn extract_bing_success(result: &IndexResultEnvelope) -> Vec<String> {
    result
        .bing
        .result
        .as_ref()
        .map(|r| r.results.iter().flat_map(bing_batch_success_urls).collect())
        .unwrap_or_default()
}

fn bing_batch_success_urls(batch: &BingBatchUrlResult) -> Vec<String> {
    if batch.status == BingResultStatus::Success && batch.http_status == Some(200) {
        batch.urls.clone()
    } else {
        Vec::new()
    }
}

async fn reconcile(
    url_repo: &UrlEntryRepository,
    shop: &str,
    both: &[String],
    google_only: &[String],
    bing_only: &[String],
) -> Result<u64, sqlx::Error> {
    let a = retry_update(|| url_repo.mark_both_indexed(shop, both)).await?;
    let b = retry_update(|| url_repo.mark_google_indexed(shop, google_only)).await?;
    let c = retry_update(|| url_repo.mark_bing_indexed(shop, bing_only)).await?;
    Ok(a + b + c)
}

/// Retries a single UPDATE up to [`UPDATE_RETRY_LIMIT`] times with a
/// (barely-)exponential backoff bounded to `[UPDATE_RETRY_MIN,
/// UPDATE_RETRY_MAX]`. Each UPDATE is its own transaction; no
/// cross-UPDATE atomicity is required since the flags are idempotent.
async fn retry_update<F, Fut>(mut attempt_fn: F) -> Result<u64, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<u64, sqlx::Error>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(rows) => return Ok(rows),
            Err(e) if attempt + 1 < UPDATE_RETRY_LIMIT => {
                let delay = backoff_delay(attempt);
                warn!(attempt, delay_secs = delay.as_secs(), error = %e, "retrying UrlEntry update");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let scaled = UPDATE_RETRY_MIN * 2u32.saturating_pow(attempt);
    scaled.min(UPDATE_RETRY_MAX).max(UPDATE_RETRY_MIN)
}

async fn ack(broker: &mut BrokerClient, message_id: &str) {
    if let Err(e) = broker.ack(keys::L3_STREAM, keys::L3_GROUP, message_id).await {
        warn!(error = %e, message_id, "failed to ack L3 message");
    }
}
