//! Stage L2: the dispatch worker. Decrypts per-shop credentials, submits
//! to Google and/or Bing, and emits a merged result envelope for L3.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bing_client::BingIndexingClient;
use crate::broker::envelope::ttl;
use crate::broker::{BrokerClient, JobEnvelope, keys};
use crate::config::EncryptionKeyConfig;
use crate::crypto::{self, EncryptionKey};
use crate::google_client::GoogleIndexingClient;
use crate::types::{BingOutcome, GoogleOutcome, IndexResultEnvelope, SkipReason, UrlIndexBatchJob};

use super::{ProcessFn, WorkerLoopConfig};

/// Credentials shorter than this are treated as obviously invalid
/// placeholders, not attempted against the provider.
const MIN_CREDENTIAL_LEN: usize = 10;

pub fn loop_config() -> WorkerLoopConfig {
    WorkerLoopConfig {
        stream: keys::L2_STREAM,
        group: keys::L2_GROUP,
        consumer: keys::consumer_name("l2"),
        job_limit: crate::config::L2_JOB_LIMIT,
        label: "l2",
    }
}

pub fn process_fn(broker: BrokerClient, encryption: EncryptionKeyConfig) -> ProcessFn {
    Arc::new(move |job_id, message_id| {
        let mut broker = broker.clone();
        let encryption = encryption.clone();
        let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            process_job(&mut broker, &encryption, job_id, message_id).await;
        });
        fut
    })
}

async fn process_job(
    broker: &mut BrokerClient,
    encryption: &EncryptionKeyConfig,
    job_id: Uuid,
    message_id: String,
) {
    let started_at = Utc::now();

    let mut envelope: JobEnvelope<UrlIndexBatchJob> =
        match broker.fetch_envelope(keys::L2_NAMESPACE, &job_id).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!(%job_id, "ghost job, acking");
                ack(broker, &message_id).await;
                return;
            }
            Err(e) => {
                warn!(%job_id, error = %e, "malformed L2 envelope, acking and dropping");
                ack(broker, &message_id).await;
                return;
            }
        };

    let batch = envelope.data.clone();
    let google_eligible = is_usable_credential(&batch.auth.google_config);
    let bing_eligible = is_usable_credential(&batch.auth.bing_api_key);

    if !google_eligible && !bing_eligible {
        envelope.mark_completed(started_at, Some(0));
        envelope.error = Some("No valid credentials".to_string());
        put_terminal(broker, &job_id, &envelope, ttl::L1_OUTPUT).await;
        ack(broker, &message_id).await;
        return;
    }

    let (google, bing) = tokio::join!(
        dispatch_google(&batch, encryption, google_eligible),
        dispatch_bing(&batch, encryption, bing_eligible),
    );

    let urls_processed = google
        .result
        .as_ref()
        .map(|r| r.total_urls)
        .unwrap_or(0)
        + bing.result.as_ref().map(|r| r.total_urls).unwrap_or(0);

    let result_envelope = IndexResultEnvelope {
        shop: batch.shop.clone(),
        job_id,
        processed_at: Utc::now(),
        google,
        bing,
    };

    match broker
        .submit(keys::L3_STREAM, keys::L3_NAMESPACE, result_envelope, ttl::L2_RESULT)
        .await
    {
        Ok(l3_job_id) => {
            info!(%job_id, %l3_job_id, shop = batch.shop, "emitted L3 result job");
            envelope.mark_completed(started_at, Some(urls_processed));
            put_terminal(broker, &job_id, &envelope, ttl::L2_RESULT).await;
        }
        Err(e) => {
            warn!(%job_id, error = %e, "failed to submit L3 job");
            envelope.mark_failed(started_at, e.to_string());
            put_terminal(broker, &job_id, &envelope, ttl::L2_RESULT).await;
        }
    }

    ack(broker, &message_id).await;
}

fn is_usable_credential(value: &Option<String>) -> bool {
    value.as_ref().is_some_and(|v| v.len() > MIN_CREDENTIAL_LEN)
}

fn decrypt_with_rotation(encryption: &EncryptionKeyConfig, ciphertext: &str) -> color_eyre::Result<String> {
    let primary: EncryptionKey = encryption.primary_key()?;
    if let Ok(plain) = crypto::decrypt_to_string(&primary, ciphertext) {
        return Ok(plain);
    }
    let joint: EncryptionKey = encryption.joint_key()?;
    crypto::decrypt_to_string(&joint, ciphertext).map_err(|e| color_eyre::eyre::eyre!(e))
}

async fn dispatch_google(
    batch: &UrlIndexBatchJob,
    encryption: &EncryptionKeyConfig,
    eligible: bool,
) -> GoogleOutcome {
    if !eligible {
        return GoogleOutcome::not_executed(SkipReason::MissingCredentials);
    }

    let config = match batch.auth.google_config.as_deref() {
        Some(c) => c,
        None => return GoogleOutcome::not_executed(SkipReason::MissingCredentials),
    };

    let service_account_json = match decrypt_with_rotation(encryption, config) {
        Ok(json) => json,
        Err(e) => {
            warn!(shop = batch.shop, error = %e, "failed to decrypt googleConfig");
            return GoogleOutcome::not_executed(SkipReason::Failed);
        }
    };

    let client = match GoogleIndexingClient::from_service_account_json(&service_account_json) {
        Ok(c) => c,
        Err(e) => {
            warn!(shop = batch.shop, error = %e, "invalid google service account");
            return GoogleOutcome::not_executed(SkipReason::Failed);
        }
    };

    match client
        .publish_batch(&batch.actions.index, &batch.actions.delete, batch.auth.settings.google_limit)
        .await
    {
        Ok(result) => GoogleOutcome::executed(result),
        Err(e) => {
            warn!(shop = batch.shop, error = %e, "google batch submission failed");
            GoogleOutcome::not_executed(SkipReason::Failed)
        }
    }
}

async fn dispatch_bing(
    batch: &UrlIndexBatchJob,
    encryption: &EncryptionKeyConfig,
    eligible: bool,
) -> BingOutcome {
    if !eligible {
        return BingOutcome::not_executed(SkipReason::MissingCredentials);
    }

    let api_key_ciphertext = match batch.auth.bing_api_key.as_deref() {
        Some(k) => k,
        None => return BingOutcome::not_executed(SkipReason::MissingCredentials),
    };

    let api_key = match decrypt_with_rotation(encryption, api_key_ciphertext) {
        Ok(key) => key,
        Err(e) => {
            warn!(shop = batch.shop, error = %e, "failed to decrypt bingApiKey");
            return BingOutcome::not_executed(SkipReason::Failed);
        }
    };

    let client = BingIndexingClient::new(api_key, &batch.shop);
    let retry_limit = batch.auth.settings.retry_limit.max(1);
    let result = client
        .submit_batch(
            &batch.actions.index,
            batch.actions.delete.len(),
            batch.auth.settings.bing_limit,
            retry_limit,
        )
        .await;

    BingOutcome::executed(result)
}

async fn put_terminal<T: serde::Serialize>(
    broker: &mut BrokerClient,
    job_id: &Uuid,
    envelope: &JobEnvelope<T>,
    ttl: std::time::Duration,
) {
    if let Err(e) = broker.put_terminal(keys::L2_NAMESPACE, job_id, envelope, ttl).await {
        warn!(%job_id, error = %e, "failed to write terminal L2 envelope");
    }
}

async fn ack(broker: &mut BrokerClient, message_id: &str) {
    if let Err(e) = broker.ack(keys::L2_STREAM, keys::L2_GROUP, message_id).await {
        warn!(error = %e, message_id, "failed to ack L2 message");
    }
}
