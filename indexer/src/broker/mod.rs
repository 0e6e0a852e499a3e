mod client;
pub mod envelope;
pub mod keys;

pub use client::BrokerClient;
pub use envelope::{BrokerMessage, JobEnvelope, JobStatus};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("payload (de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
