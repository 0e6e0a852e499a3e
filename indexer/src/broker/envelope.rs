use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::BrokerError;

/// Per-stage envelope lifetime. Kept distinct per stage rather than
/// unified, matching the source system's stage-specific values.
pub mod ttl {
    use super::Duration;

    /// Scheduler's seed envelope, consumed by L1.
    pub const SCHEDULER_SEED: Duration = Duration::from_secs(86_400);
    /// L1's output envelope, consumed by L2; also the TTL L1's own
    /// (now-finalized) envelope is refreshed to.
    pub const L1_OUTPUT: Duration = Duration::from_secs(43_200);
    /// L2's result envelope, consumed by L3.
    pub const L2_RESULT: Duration = Duration::from_secs(86_400);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Completed,
    Failed,
}

/// The envelope stored in the kv-store sidecar under
/// `{stage-namespace}:{job_id}`. `data` is the stage-specific payload;
/// everything else is bookkeeping a human operator or the recovery
/// loop can inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope<T> {
    pub status: JobStatus,
    pub data: T,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls_processed: Option<usize>,
}

impl<T> JobEnvelope<T> {
    pub fn queued(data: T) -> Self {
        Self {
            status: JobStatus::Queued,
            data,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            processing_time_seconds: None,
            error: None,
            urls_processed: None,
        }
    }

    pub fn mark_completed(&mut self, started_at: DateTime<Utc>, urls_processed: Option<usize>) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.processing_time_seconds = Some((now - started_at).num_milliseconds() as f64 / 1000.0);
        self.urls_processed = urls_processed;
    }

    pub fn mark_failed(&mut self, started_at: DateTime<Utc>, error: impl Into<String>) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.failed_at = Some(now);
        self.processing_time_seconds = Some((now - started_at).num_milliseconds() as f64 / 1000.0);
        self.error = Some(truncate(error.into()));
    }
}

fn truncate(mut s: String) -> String {
    const MAX: usize = 2000;
    if s.len() > MAX {
        s.truncate(MAX);
    }
    s
}

/// A message handed back by [`super::client::BrokerClient::read_one`] or
/// `claim_stale`: the stream's own delivery id plus the job id the real
/// payload is stored under in the kv-store sidecar.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub message_id: String,
    pub job_id: Uuid,
}

pub fn envelope_key(namespace: &str, job_id: &Uuid) -> String {
    format!("{namespace}:{job_id}")
}

pub fn encode<T: Serialize>(envelope: &JobEnvelope<T>) -> Result<String, BrokerError> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<JobEnvelope<T>, BrokerError> {
    Ok(serde_json::from_str(raw)?)
}
