use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use super::BrokerError;
use super::envelope::{BrokerMessage, JobEnvelope, decode, encode, envelope_key};

/// Thin wrapper over a redis streams connection giving the four pipeline
/// stages a shared vocabulary: create group, submit, read, ack, recover.
/// Every job's envelope lives at its own kv-store key; the stream entry
/// carries only a `job_id` reference, mirroring the original `r.hset` +
/// `r.xadd` pair (kept as a plain string key here, not a hash field, so
/// the per-job TTL in the spec's data model can be set and refreshed
/// with a standard `EXPIRE`).
#[derive(Clone)]
pub struct BrokerClient {
    conn: ConnectionManager,
}

impl BrokerClient {
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub async fn ping(&mut self) -> Result<(), BrokerError> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(())
    }

    /// Idempotently creates the consumer group at the start of the
    /// stream (`id = "0"`), creating the stream itself if absent.
    pub async fn ensure_group(&mut self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(()) => {
                debug!(stream, group, "created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a freshly-queued envelope into the kv-store and appends a
    /// thin reference entry to the stream. Returns the generated job id.
    pub async fn submit<T: Serialize>(
        &mut self,
        stream: &str,
        namespace: &str,
        payload: T,
        ttl: Duration,
    ) -> Result<Uuid, BrokerError> {
        let job_id = Uuid::new_v4();
        let envelope = JobEnvelope::queued(payload);
        self.put_envelope(namespace, &job_id, &envelope, ttl).await?;

        let message_id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg("job_id")
            .arg(job_id.to_string())
            .query_async(&mut self.conn)
            .await?;

        debug!(stream, %job_id, message_id, "submitted job");
        Ok(job_id)
    }

    async fn put_envelope<T: Serialize>(
        &mut self,
        namespace: &str,
        job_id: &Uuid,
        envelope: &JobEnvelope<T>,
        ttl: Duration,
    ) -> Result<(), BrokerError> {
        let key = envelope_key(namespace, job_id);
        let body = encode(envelope)?;
        let _: () = self.conn.set_ex(key, body, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    /// Fetches and decodes the envelope for `job_id`. `None` means the
    /// key already expired or was never written — a ghost job whose
    /// stream entry outlived its payload; callers should ack and drop
    /// rather than retry.
    pub async fn fetch_envelope<T: DeserializeOwned>(
        &mut self,
        namespace: &str,
        job_id: &Uuid,
    ) -> Result<Option<JobEnvelope<T>>, BrokerError> {
        let key = envelope_key(namespace, job_id);
        let raw: Option<String> = self.conn.get(key).await?;
        match raw {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Rewrites the envelope (e.g. after mutating its status to a
    /// terminal state) and refreshes its TTL.
    pub async fn put_terminal<T: Serialize>(
        &mut self,
        namespace: &str,
        job_id: &Uuid,
        envelope: &JobEnvelope<T>,
        ttl: Duration,
    ) -> Result<(), BrokerError> {
        self.put_envelope(namespace, job_id, envelope, ttl).await
    }

    /// Reads a single field from a kv-store hash, used by the scheduler for
    /// `scheduler:state` / `scheduler:daily_runs` bookkeeping.
    pub async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, BrokerError> {
        Ok(self.conn.hget(key, field).await?)
    }

    pub async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), BrokerError> {
        let _: () = self.conn.hset(key, field, value).await?;
        Ok(())
    }

    pub async fn hincr(&mut self, key: &str, field: &str, delta: i64) -> Result<i64, BrokerError> {
        Ok(self.conn.hincr(key, field, delta).await?)
    }

    pub async fn hgetall(&mut self, key: &str) -> Result<Vec<(String, String)>, BrokerError> {
        Ok(self.conn.hgetall(key).await?)
    }

    pub async fn hdel(&mut self, key: &str, fields: &[String]) -> Result<(), BrokerError> {
        if fields.is_empty() {
            return Ok(());
        }
        let _: () = self.conn.hdel(key, fields).await?;
        Ok(())
    }

    pub async fn expire(&mut self, key: &str, seconds: i64) -> Result<(), BrokerError> {
        let _: () = self.conn.expire(key, seconds).await?;
        Ok(())
    }

    pub async fn ack(&mut self, stream: &str, group: &str, message_id: &str) -> Result<(), BrokerError> {
        redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(message_id)
            .query_async::<()>(&mut self.conn)
            .await?;
        Ok(())
    }

    /// Blocks for up to `block_ms` for a single new (never-delivered)
    /// message. Returns `None` on a read timeout.
    pub async fn read_one(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Option<BrokerMessage>, BrokerError> {
        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut self.conn)
            .await?;

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                if let Some(redis::Value::BulkString(job_id_bytes)) = entry.map.get("job_id") {
                    let job_id_str = String::from_utf8_lossy(job_id_bytes);
                    match Uuid::parse_str(&job_id_str) {
                        Ok(job_id) => {
                            return Ok(Some(BrokerMessage {
                                message_id: entry.id,
                                job_id,
                            }));
                        }
                        Err(_) => {
                            warn!(message_id = %entry.id, "malformed job_id field, acking and dropping");
                            self.ack(stream, group, &entry.id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(None)
    }

    /// Recovers messages delivered to a consumer that never acked them
    /// (crashed worker, lost connection) after they have sat idle for
    /// at least `min_idle`.
    pub async fn claim_stale(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<BrokerMessage>, BrokerError> {
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: Vec<Vec<redis::Value>> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut self.conn)
            .await?;

        let mut stale_ids = Vec::new();
        for entry in pending {
            if let (Some(redis::Value::BulkString(id_bytes)), Some(redis::Value::Int(idle_ms))) =
                (entry.first(), entry.get(2))
            {
                if *idle_ms as u64 >= min_idle_ms {
                    if let Ok(id) = String::from_utf8(id_bytes.clone()) {
                        stale_ids.push(id);
                    }
                }
            }
        }

        if stale_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream).arg(group).arg(consumer).arg(min_idle_ms);
        for id in &stale_ids {
            cmd.arg(id);
        }

        let claimed: Vec<Vec<redis::Value>> = cmd.query_async(&mut self.conn).await?;
        let mut messages = Vec::new();

        for item in claimed {
            let (Some(redis::Value::BulkString(id_bytes)), Some(redis::Value::Array(fields))) =
                (item.first(), item.get(1))
            else {
                continue;
            };
            let Ok(message_id) = String::from_utf8(id_bytes.clone()) else {
                continue;
            };

            let mut job_id = None;
            let mut i = 0;
            while i + 1 < fields.len() {
                if let (
                    Some(redis::Value::BulkString(field_bytes)),
                    Some(redis::Value::BulkString(value_bytes)),
                ) = (fields.get(i), fields.get(i + 1))
                {
                    if field_bytes.as_slice() == b"job_id" {
                        job_id = String::from_utf8(value_bytes.clone())
                            .ok()
                            .and_then(|s| Uuid::parse_str(&s).ok());
                        break;
                    }
                }
                i += 2;
            }

            match job_id {
                Some(job_id) => messages.push(BrokerMessage { message_id, job_id }),
                None => {
                    warn!(message_id, "claimed message missing job_id, acking and dropping");
                    self.ack(stream, group, &message_id).await.ok();
                }
            }
        }

        Ok(messages)
    }
}
