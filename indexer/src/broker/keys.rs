//! Stream names, consumer groups and kv-store namespaces for the three
//! pipeline stages. Every stage reads one stream and, on success, writes
//! into the next stage's stream — Scheduler -> L1 -> L2 -> L3.

pub const L1_STREAM: &str = "stream:data-prep-agents";
pub const L2_STREAM: &str = "stream:indexing-workers";
pub const L3_STREAM: &str = "stream:status-sync-worker";

pub const L1_GROUP: &str = "L1-workers";
pub const L2_GROUP: &str = "L2-workers";
pub const L3_GROUP: &str = "L3-workers";

/// kv-store namespace each stage's envelope is stored under, as
/// `{namespace}:{job_id}`.
pub const L1_NAMESPACE: &str = "data-prep-msg";
pub const L2_NAMESPACE: &str = "indexing-workers-msg";
pub const L3_NAMESPACE: &str = "status-sync-worker-msg";

/// `{host}-{stage}-{8 hex chars}`, unique enough to identify this
/// process's deliveries within a consumer group.
pub fn consumer_name(stage: &str) -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{stage}-{}", &suffix[..8])
}
