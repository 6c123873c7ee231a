use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a broker implementation
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker connection timeout after {0:?}")]
    Timeout(Duration),

    #[error("broker state lock poisoned")]
    Poisoned,
}

/// Errors surfaced to callers of the task queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("invalid interval for periodic task {0}")]
    InvalidInterval(String),

    #[error("timed out waiting for task {0}")]
    WaitTimeout(Uuid),

    #[error("task {0} has no record")]
    MissingRecord(Uuid),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
