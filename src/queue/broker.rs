use super::{TaskEnvelope, TaskRecord};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Shared queue and result store between enqueuers and workers
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make an envelope available to workers now
    async fn push(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError>;

    /// Make an envelope available to workers once `delay` has elapsed
    async fn push_delayed(&self, envelope: &TaskEnvelope, delay: Duration)
        -> Result<(), BrokerError>;

    /// Take the next ready envelope, if any
    ///
    /// The envelope stays in flight until [`Broker::ack`] is called for it.
    async fn pop(&self) -> Result<Option<TaskEnvelope>, BrokerError>;

    /// Release a popped envelope once its outcome is stored
    async fn ack(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError>;

    /// Move unacknowledged envelopes back to the ready queue, returning how
    /// many were moved
    async fn recover_in_flight(&self) -> Result<usize, BrokerError>;

    async fn save_record(&self, record: &TaskRecord) -> Result<(), BrokerError>;

    async fn load_record(&self, task_id: Uuid) -> Result<Option<TaskRecord>, BrokerError>;

    /// Ready plus delayed envelopes
    async fn pending_count(&self) -> Result<usize, BrokerError>;
}
