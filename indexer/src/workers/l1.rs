//! Stage L1: consume a scheduler seed job, assemble a batch of pending
//! URLs for the shop, and hand it off to L2.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::envelope::ttl;
use crate::broker::{BrokerClient, JobEnvelope, keys};
use crate::repository::{AuthRepository, UrlEntryRepository};
use crate::types::{AuthPayload, BatchActions, IndexAction, SeedJobPayload, UrlIndexBatchJob, UrlItem};

use super::{ProcessFn, WorkerLoopConfig};

pub fn loop_config() -> WorkerLoopConfig {
    WorkerLoopConfig {
        stream: keys::L1_STREAM,
        group: keys::L1_GROUP,
        consumer: keys::consumer_name("l1"),
        job_limit: crate::config::L1_JOB_LIMIT,
        label: "l1",
    }
}

pub fn process_fn(
    auth_repo: AuthRepository,
    url_repo: UrlEntryRepository,
    broker: BrokerClient,
    filter_google_indexed: bool,
) -> ProcessFn {
    Arc::new(move |job_id, message_id| {
        let auth_repo = auth_repo.clone();
        let url_repo = url_repo.clone();
        let mut broker = broker.clone();
        let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            process_job(&auth_repo, &url_repo, &mut broker, filter_google_indexed, job_id, message_id).await;
        });
        fut
    })
}

async fn process_job(
    auth_repo: &AuthRepository,
    url_repo: &UrlEntryRepository,
    broker: &mut BrokerClient,
    filter_google_indexed: bool,
    job_id: Uuid,
    message_id: String,
) {
    let started_at = Utc::now();

    let envelope: JobEnvelope<SeedJobPayload> =
        match broker.fetch_envelope(keys::L1_NAMESPACE, &job_id).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!(%job_id, "ghost job, acking");
                ack(broker, &message_id).await;
                return;
            }
            Err(e) => {
                warn!(%job_id, error = %e, "malformed L1 envelope, acking and dropping");
                ack(broker, &message_id).await;
                return;
            }
        };

    let shop = envelope.data.shop.clone();

    let outcome = assemble_batch(auth_repo, url_repo, &shop, filter_google_indexed).await;

    let mut envelope = envelope;
    match outcome {
        Ok(BatchOutcome::NoAuth) => {
            envelope.mark_completed(started_at, Some(0));
            envelope.error = Some("No Auth".to_string());
            put_terminal(broker, &job_id, &envelope, ttl::L1_OUTPUT).await;
        }
        Ok(BatchOutcome::Empty) => {
            envelope.mark_completed(started_at, Some(0));
            envelope.error = Some("No URLs to process".to_string());
            put_terminal(broker, &job_id, &envelope, ttl::L1_OUTPUT).await;
        }
        Ok(BatchOutcome::Batch(batch)) => {
            let total = batch.actions.total();
            match broker
                .submit(keys::L2_STREAM, keys::L2_NAMESPACE, batch, ttl::L1_OUTPUT)
                .await
            {
                Ok(l2_job_id) => {
                    info!(%job_id, %l2_job_id, shop, total, "emitted L2 batch job");
                    envelope.mark_completed(started_at, Some(total));
                    put_terminal(broker, &job_id, &envelope, ttl::L1_OUTPUT).await;
                }
                Err(e) => {
                    warn!(%job_id, error = %e, "failed to submit L2 job");
                    envelope.mark_failed(started_at, e.to_string());
                    put_terminal(broker, &job_id, &envelope, ttl::L1_OUTPUT).await;
                }
            }
        }
        Err(e) => {
            warn!(%job_id, error = %e, "L1 batch assembly failed");
            envelope.mark_failed(started_at, e.to_string());
            put_terminal(broker, &job_id, &envelope, ttl::L1_OUTPUT).await;
        }
    }

    ack(broker, &message_id).await;
}

enum BatchOutcome {
    NoAuth,
    Empty,
    Batch(UrlIndexBatchJob),
}

async fn assemble_batch(
    auth_repo: &AuthRepository,
    url_repo: &UrlEntryRepository,
    shop: &str,
    filter_google_indexed: bool,
) -> color_eyre::Result<BatchOutcome> {
    let Some(auth) = auth_repo.get_by_shop(shop).await? else {
        return Ok(BatchOutcome::NoAuth);
    };

    let final_limit = final_limit(auth.settings.bing_limit, auth.settings.google_limit);
    let rows = url_repo
        .fetch_pending(shop, filter_google_indexed, final_limit)
        .await?;

    if rows.is_empty() {
        return Ok(BatchOutcome::Empty);
    }

    let mut actions = BatchActions::default();
    for row in rows {
        let item = UrlItem {
            web_url: row.web_url,
            attempts: row.attempts,
        };
        match row.index_action {
            IndexAction::Index => actions.index.push(item),
            IndexAction::Delete => actions.delete.push(item),
            IndexAction::Ignore => {}
        }
    }

    if actions.is_empty() {
        return Ok(BatchOutcome::Empty);
    }

    let batch = UrlIndexBatchJob::new(shop.to_string(), AuthPayload::from(&auth), actions);
    Ok(BatchOutcome::Batch(batch))
}

/// `⌈1.05 × max(bingLimit, googleLimit)⌉` — headroom against per-provider
/// rejections downstream, on top of which L2 applies its own 1.10× caps.
fn final_limit(bing_limit: i64, google_limit: i64) -> i64 {
    let max_limit = bing_limit.max(google_limit).max(0);
    (((max_limit as f64) * 1.05).ceil() as i64).max(0)
}

async fn put_terminal<T: serde::Serialize>(
    broker: &mut BrokerClient,
    job_id: &Uuid,
    envelope: &JobEnvelope<T>,
    ttl: std::time::Duration,
) {
    if let Err(e) = broker.put_terminal(keys::L1_NAMESPACE, job_id, envelope, ttl).await {
        warn!(%job_id, error = %e, "failed to write terminal L1 envelope");
    }
}

async fn ack(broker: &mut BrokerClient, message_id: &str) {
    if let Err(e) = broker.ack(keys::L1_STREAM, keys::L1_GROUP, message_id).await {
        warn!(error = %e, message_id, "failed to ack L1 message");
    }
}
