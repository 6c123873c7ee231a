use super::{Broker, TaskEnvelope, TaskRecord};
use crate::error::BrokerError;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PROMOTE_BATCH: i64 = 100;

/// Moves up to ARGV[2] envelopes due by ARGV[1] from KEYS[1] onto KEYS[2]
const PROMOTE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, payload in ipairs(due) do
    redis.call('ZREM', KEYS[1], payload)
    redis.call('LPUSH', KEYS[2], payload)
end
return #due
";

/// Moves every envelope from KEYS[1] onto the consuming end of KEYS[2]
const RECOVER_SCRIPT: &str = r"
local moved = 0
while redis.call('LMOVE', KEYS[1], KEYS[2], 'LEFT', 'RIGHT') do
    moved = moved + 1
end
return moved
";

/// Redis-backed broker
///
/// Layout under `{queue}`:
/// - `{queue}:ready` list, LPUSH by enqueuers, consumed from the right
/// - `{queue}:processing` list of popped envelopes awaiting acknowledgement
/// - `{queue}:delayed` sorted set scored by due time (unix millis)
/// - `{queue}:task:{id}` task record JSON with a TTL
///
/// Needs Redis 6.2 or later for LMOVE.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    queue: String,
    record_ttl_secs: u64,
}

impl RedisBroker {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `queue` - key prefix shared by enqueuers and workers
    /// * `record_ttl_secs` - how long task records are kept
    pub async fn new(redis_url: &str, queue: &str, record_ttl_secs: u64) -> Result<Self, BrokerError> {
        let client = Client::open(redis_url)?;

        let conn = timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| BrokerError::Timeout(CONNECT_TIMEOUT))??;

        tracing::info!("Connected to Redis broker at {} (queue {})", redis_url, queue);

        Ok(Self {
            conn,
            queue: queue.to_string(),
            record_ttl_secs,
        })
    }

    fn ready_key(&self) -> String {
        format!("{}:ready", self.queue)
    }

    fn processing_key(&self) -> String {
        format!("{}:processing", self.queue)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.queue)
    }

    fn record_key(&self, task_id: Uuid) -> String {
        format!("{}:task:{}", self.queue, task_id)
    }

    /// Move due delayed envelopes onto the ready list in one script call
    async fn promote_due(&self) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();

        let promoted: usize = Script::new(PROMOTE_SCRIPT)
            .key(self.delayed_key())
            .key(self.ready_key())
            .arg(now_ms)
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        if promoted > 0 {
            tracing::debug!("Promoted {} delayed tasks", promoted);
        }

        Ok(promoted)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(self.ready_key(), payload).await?;
        Ok(())
    }

    async fn push_delayed(
        &self,
        envelope: &TaskEnvelope,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(envelope)?;
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(self.delayed_key(), payload, due_ms)
            .await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<TaskEnvelope>, BrokerError> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("LMOVE")
            .arg(self.ready_key())
            .arg(self.processing_key())
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(&mut conn)
            .await?;

        Ok(payload
            .map(|json| serde_json::from_str(&json))
            .transpose()?)
    }

    async fn ack(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        // Serialization is stable, so this matches the payload LMOVE took
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();

        let removed: usize = conn.lrem(self.processing_key(), 1, payload).await?;
        if removed == 0 {
            tracing::warn!(task_id = %envelope.id, "Acknowledged task was not in flight");
        }

        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();

        let moved: usize = Script::new(RECOVER_SCRIPT)
            .key(self.processing_key())
            .key(self.ready_key())
            .invoke_async(&mut conn)
            .await?;

        Ok(moved)
    }

    async fn save_record(&self, record: &TaskRecord) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("SET")
            .arg(self.record_key(record.id))
            .arg(payload)
            .arg("EX")
            .arg(self.record_ttl_secs)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn load_record(&self, task_id: Uuid) -> Result<Option<TaskRecord>, BrokerError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(self.record_key(task_id)).await?;

        Ok(payload
            .map(|json| serde_json::from_str(&json))
            .transpose()?)
    }

    async fn pending_count(&self) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        let ready: usize = conn.llen(self.ready_key()).await?;
        let delayed: usize = conn.zcard(self.delayed_key()).await?;
        Ok(ready + delayed)
    }
}
