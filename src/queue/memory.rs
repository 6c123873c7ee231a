use super::{Broker, TaskEnvelope, TaskRecord};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Record retention when none is given, same as the `task_record_ttl_secs` default
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(86_400);

#[derive(Default)]
struct MemoryState {
    ready: VecDeque<TaskEnvelope>,
    delayed: Vec<(Instant, TaskEnvelope)>,
    in_flight: Vec<TaskEnvelope>,
    records: HashMap<Uuid, (Instant, TaskRecord)>,
}

/// In-process broker for single-binary deployments and tests
///
/// Delays and record expiry follow tokio time, so paused-clock tests see
/// redelivery exactly when the retry delay elapses. Records expire
/// `record_ttl` after their last save, like the Redis broker's keys.
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
    record_ttl: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_RECORD_TTL)
    }
}

impl MemoryBroker {
    pub fn new(record_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            record_ttl,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, BrokerError> {
        let mut state = self.state.lock().map_err(|_| BrokerError::Poisoned)?;
        Ok(f(&mut state))
    }

    /// Number of task records currently held
    pub fn record_count(&self) -> Result<usize, BrokerError> {
        let now = Instant::now();
        let ttl = self.record_ttl;
        self.with_state(|state| {
            state
                .records
                .values()
                .filter(|(saved, _)| now.duration_since(*saved) < ttl)
                .count()
        })
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        self.with_state(|state| state.ready.push_back(envelope.clone()))
    }

    async fn push_delayed(
        &self,
        envelope: &TaskEnvelope,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let due = Instant::now() + delay;
        self.with_state(|state| state.delayed.push((due, envelope.clone())))
    }

    async fn pop(&self) -> Result<Option<TaskEnvelope>, BrokerError> {
        let now = Instant::now();

        self.with_state(|state| {
            if !state.delayed.is_empty() {
                // Promote due envelopes in due order
                state.delayed.sort_by_key(|(due, _)| *due);
                let due_count = state.delayed.iter().take_while(|(due, _)| *due <= now).count();
                for (_, envelope) in state.delayed.drain(..due_count) {
                    state.ready.push_back(envelope);
                }
            }

            let envelope = state.ready.pop_front()?;
            state.in_flight.push(envelope.clone());
            Some(envelope)
        })
    }

    async fn ack(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        self.with_state(|state| {
            if let Some(index) = state.in_flight.iter().position(|e| e == envelope) {
                state.in_flight.remove(index);
            }
        })
    }

    async fn recover_in_flight(&self) -> Result<usize, BrokerError> {
        self.with_state(|state| {
            let recovered = state.in_flight.len();
            // Redelivered ahead of newer work, oldest first
            for envelope in std::mem::take(&mut state.in_flight).into_iter().rev() {
                state.ready.push_front(envelope);
            }
            recovered
        })
    }

    async fn save_record(&self, record: &TaskRecord) -> Result<(), BrokerError> {
        let now = Instant::now();
        let ttl = self.record_ttl;

        self.with_state(|state| {
            state
                .records
                .retain(|_, (saved, _)| now.duration_since(*saved) < ttl);
            state.records.insert(record.id, (now, record.clone()));
        })
    }

    async fn load_record(&self, task_id: Uuid) -> Result<Option<TaskRecord>, BrokerError> {
        let now = Instant::now();
        let ttl = self.record_ttl;

        self.with_state(|state| {
            state
                .records
                .get(&task_id)
                .filter(|(saved, _)| now.duration_since(*saved) < ttl)
                .map(|(_, record)| record.clone())
        })
    }

    async fn pending_count(&self) -> Result<usize, BrokerError> {
        self.with_state(|state| state.ready.len() + state.delayed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskArgs;

    fn envelope(task: &str) -> TaskEnvelope {
        TaskEnvelope::new(task, TaskArgs::none())
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let broker = MemoryBroker::default();
        broker.push(&envelope("first")).await.unwrap();
        broker.push(&envelope("second")).await.unwrap();

        assert_eq!(broker.pop().await.unwrap().unwrap().task, "first");
        assert_eq!(broker.pop().await.unwrap().unwrap().task, "second");
        assert!(broker.pop().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_envelope_waits_for_delay() {
        let broker = MemoryBroker::default();
        broker
            .push_delayed(&envelope("later"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(broker.pop().await.unwrap().is_none());
        assert_eq!(broker.pending_count().await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(broker.pop().await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(broker.pop().await.unwrap().unwrap().task, "later");
        assert_eq!(broker.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_promoted_in_due_order() {
        let broker = MemoryBroker::default();
        broker
            .push_delayed(&envelope("slow"), Duration::from_secs(30))
            .await
            .unwrap();
        broker
            .push_delayed(&envelope("fast"), Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(broker.pop().await.unwrap().unwrap().task, "fast");
        assert_eq!(broker.pop().await.unwrap().unwrap().task, "slow");
    }

    #[tokio::test]
    async fn test_records_roundtrip() {
        let broker = MemoryBroker::default();
        let env = envelope("sync_market_data");
        let record = TaskRecord::pending(&env);

        broker.save_record(&record).await.unwrap();

        assert_eq!(broker.load_record(env.id).await.unwrap(), Some(record));
        assert!(broker.load_record(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_popped_envelope_in_flight_until_ack() {
        let broker = MemoryBroker::default();
        let env = envelope("sync_market_data");
        broker.push(&env).await.unwrap();

        let popped = broker.pop().await.unwrap().unwrap();
        assert_eq!(broker.pending_count().await.unwrap(), 0);

        // A worker that never acks leaves it recoverable
        assert_eq!(broker.recover_in_flight().await.unwrap(), 1);
        let again = broker.pop().await.unwrap().unwrap();
        assert_eq!(again, popped);

        broker.ack(&again).await.unwrap();
        assert_eq!(broker.recover_in_flight().await.unwrap(), 0);
        assert!(broker.pop().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_expire_after_ttl() {
        let broker = MemoryBroker::new(Duration::from_secs(3_600));

        let mut first = None;
        for i in 0..2_000 {
            if i > 0 {
                tokio::time::advance(Duration::from_secs(60)).await;
            }
            let mut record = TaskRecord::pending(&envelope("system_health_check"));
            record.state = crate::queue::TaskState::Completed;
            broker.save_record(&record).await.unwrap();
            if i == 0 {
                first = Some(record.id);
            }
        }

        // One hour of records at one per minute
        assert_eq!(broker.record_count().unwrap(), 60);
        assert!(broker.load_record(first.unwrap()).await.unwrap().is_none());

        let fresh = TaskRecord::pending(&envelope("sync_market_data"));
        broker.save_record(&fresh).await.unwrap();
        assert_eq!(broker.load_record(fresh.id).await.unwrap(), Some(fresh));
    }
}
