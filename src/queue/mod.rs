// Task queue: brokers, workers and the periodic scheduler
pub mod broker;
pub mod memory;
pub mod redis_broker;
pub mod scheduler;
pub mod worker;

pub use broker::Broker;
pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;
pub use scheduler::{PeriodicScheduler, PeriodicTask};
pub use worker::{Outcome, WorkerPool};

use crate::error::QueueError;
use crate::tasks::{TaskArgs, TaskRegistry, TaskResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A task invocation as it travels through the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub task: String,
    pub args: TaskArgs,
    /// Retries already spent on this invocation
    pub retries: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(task: &str, args: TaskArgs) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.to_string(),
            args,
            retries: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Lifecycle of one task invocation
///
/// `Pending -> Running -> Completed`, or
/// `Running -> Failed -> Running ... -> Abandoned` while retries remain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Abandoned,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Abandoned)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Abandoned)
                | (Failed, Running)
                | (Failed, Abandoned)
        )
    }
}

/// Stored status of a task invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: Uuid,
    pub task: String,
    pub state: TaskState,
    /// Runs started so far
    pub attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn pending(envelope: &TaskEnvelope) -> Self {
        Self {
            id: envelope.id,
            task: envelope.task.clone(),
            state: TaskState::Pending,
            attempts: envelope.retries,
            last_error: None,
            result: None,
            created_at: envelope.enqueued_at,
            updated_at: envelope.enqueued_at,
        }
    }

    /// Move to `next`, returning false (and leaving the record untouched)
    /// when the transition is not allowed
    pub fn transition(&mut self, next: TaskState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }

        self.state = next;
        self.updated_at = Utc::now();
        true
    }
}

/// Returned to the caller of [`TaskQueue::enqueue`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskHandle {
    pub task_id: Uuid,
    pub task: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Entry point for enqueuers: validates task names and talks to the broker
#[derive(Clone)]
pub struct TaskQueue {
    broker: Arc<dyn Broker>,
    registry: Arc<TaskRegistry>,
}

impl TaskQueue {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<TaskRegistry>) -> Self {
        Self { broker, registry }
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        self.registry.clone()
    }

    /// Enqueue a registered task and return immediately
    pub async fn enqueue(&self, task_name: &str, args: TaskArgs) -> Result<TaskHandle, QueueError> {
        if !self.registry.contains(task_name) {
            return Err(QueueError::UnknownTask(task_name.to_string()));
        }

        let envelope = TaskEnvelope::new(task_name, args);

        // Record first so a fast worker always finds it
        self.broker.save_record(&TaskRecord::pending(&envelope)).await?;
        self.broker.push(&envelope).await?;

        tracing::info!(task_id = %envelope.id, task = task_name, "Task enqueued");

        Ok(TaskHandle {
            task_id: envelope.id,
            task: envelope.task,
            enqueued_at: envelope.enqueued_at,
        })
    }

    pub async fn status(&self, task_id: Uuid) -> Result<Option<TaskRecord>, QueueError> {
        Ok(self.broker.load_record(task_id).await?)
    }

    /// Poll the task record until it reaches a terminal state
    pub async fn wait(
        &self,
        handle: &TaskHandle,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<TaskRecord, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let record = self
                .status(handle.task_id)
                .await?
                .ok_or(QueueError::MissingRecord(handle.task_id))?;

            if record.state.is_terminal() {
                return Ok(record);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(QueueError::WaitTimeout(handle.task_id));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::tasks::names;

    fn queue() -> TaskQueue {
        TaskQueue::new(
            Arc::new(MemoryBroker::default()),
            Arc::new(TaskRegistry::with_builtin_tasks(&Settings::default())),
        )
    }

    #[test]
    fn test_state_machine() {
        use TaskState::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Running));
        assert!(Running.can_transition_to(Abandoned));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Abandoned.can_transition_to(Running));

        assert!(Completed.is_terminal());
        assert!(Abandoned.is_terminal());
        assert!(!Failed.is_terminal());
    }

    #[test]
    fn test_record_rejects_invalid_transition() {
        let envelope = TaskEnvelope::new(names::SYNC_MARKET_DATA, TaskArgs::none());
        let mut record = TaskRecord::pending(&envelope);

        assert!(!record.transition(TaskState::Completed));
        assert_eq!(record.state, TaskState::Pending);

        assert!(record.transition(TaskState::Running));
        assert!(record.transition(TaskState::Completed));
        assert!(!record.transition(TaskState::Running));
    }

    #[tokio::test]
    async fn test_enqueue_unknown_task() {
        let result = queue().enqueue("launch_rockets", TaskArgs::none()).await;
        assert!(matches!(result, Err(QueueError::UnknownTask(name)) if name == "launch_rockets"));
    }

    #[tokio::test]
    async fn test_enqueue_records_pending() {
        let queue = queue();
        let handle = queue
            .enqueue(names::SYNC_MARKET_DATA, TaskArgs::none())
            .await
            .unwrap();

        let record = queue.status(handle.task_id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.task, names::SYNC_MARKET_DATA);
        assert_eq!(queue.broker().pending_count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_workers() {
        let queue = queue();
        let handle = queue
            .enqueue(names::SYNC_MARKET_DATA, TaskArgs::none())
            .await
            .unwrap();

        let result = queue
            .wait(&handle, Duration::from_secs(5), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(QueueError::WaitTimeout(_))));
    }
}
