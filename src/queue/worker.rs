use super::{Broker, TaskEnvelope, TaskQueue, TaskRecord, TaskState};
use crate::db::ExecutionOutcome;
use crate::error::BrokerError;
use crate::models::{ExecutionStatus, TaskExecution};
use crate::tasks::{RetryDecision, Task, TaskContext, TaskError, TaskRegistry, TaskResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How a delivered envelope was handled
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(TaskResult),
    RetryScheduled { retry: u32, delay: Duration },
    Abandoned(TaskError),
    /// Duplicate delivery of an invocation that already finished
    Skipped,
}

/// Pool of workers pulling envelopes from the broker
///
/// Every failure is caught at the task boundary (errors and panics alike) and
/// handed to the task's retry policy; nothing propagates to the pool.
pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    registry: Arc<TaskRegistry>,
    ctx: Arc<TaskContext>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: &TaskQueue,
        ctx: Arc<TaskContext>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            broker: queue.broker(),
            registry: queue.registry(),
            ctx,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Spawn `concurrency` worker loops that run until `shutdown` flips to true
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let pool = Arc::new(self);

        (0..pool.concurrency)
            .map(|index| {
                let pool = pool.clone();
                let shutdown = shutdown.clone();
                let worker_id = format!("worker-{}", index);
                tokio::spawn(async move { pool.worker_loop(worker_id, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = %worker_id, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_next(&worker_id).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker = %worker_id, "Broker error: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker = %worker_id, "Worker stopped");
    }

    /// Pop one envelope and process it; `None` when the queue is empty
    ///
    /// The delivery is acknowledged once its outcome is stored; a broker
    /// error leaves it unacknowledged for [`Broker::recover_in_flight`].
    pub async fn run_next(&self, worker_id: &str) -> Result<Option<Outcome>, BrokerError> {
        let Some(envelope) = self.broker.pop().await? else {
            return Ok(None);
        };

        let outcome = self.process(envelope.clone(), worker_id).await?;
        self.broker.ack(&envelope).await?;

        Ok(Some(outcome))
    }

    /// Run one delivery of a task invocation and apply its retry policy
    pub async fn process(
        &self,
        mut envelope: TaskEnvelope,
        worker_id: &str,
    ) -> Result<Outcome, BrokerError> {
        let mut record = self
            .broker
            .load_record(envelope.id)
            .await?
            .unwrap_or_else(|| TaskRecord::pending(&envelope));

        if record.state.is_terminal() {
            tracing::warn!(
                task_id = %envelope.id,
                state = ?record.state,
                "Skipping delivery of finished task"
            );
            return Ok(Outcome::Skipped);
        }

        let Some(task) = self.registry.get(&envelope.task) else {
            let error = TaskError::Failed(format!("task {} is not registered", envelope.task));
            tracing::error!(task_id = %envelope.id, task = %envelope.task, "Abandoning unregistered task");
            record.state = TaskState::Abandoned;
            record.last_error = Some(error.to_string());
            record.updated_at = Utc::now();
            self.broker.save_record(&record).await?;
            return Ok(Outcome::Abandoned(error));
        };

        record.transition(TaskState::Running);
        record.attempts += 1;
        if let Err(e) = self.broker.save_record(&record).await {
            // Not started yet, hand the delivery back untouched
            match self.broker.push(&envelope).await {
                Ok(()) => self.broker.ack(&envelope).await?,
                Err(push_err) => {
                    tracing::error!(task_id = %envelope.id, "Failed to requeue task: {}", push_err);
                }
            }
            return Err(e);
        }

        tracing::info!(
            task_id = %envelope.id,
            task = %envelope.task,
            attempt = record.attempts,
            worker = worker_id,
            "Task started"
        );

        let execution_id = self.record_start(&envelope, worker_id).await;
        let started = tokio::time::Instant::now();

        self.ctx.counters.started();
        let result = self.execute(task.clone(), &envelope).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(result) => {
                self.ctx.counters.completed();

                record.transition(TaskState::Completed);
                record.result = Some(result.clone());
                if let Err(e) = self.broker.save_record(&record).await {
                    tracing::error!(
                        task_id = %envelope.id,
                        task = %envelope.task,
                        result = %result.to_value(),
                        "Task completed but its record could not be stored: {}",
                        e
                    );
                    return Err(e);
                }

                tracing::info!(
                    task_id = %envelope.id,
                    task = %envelope.task,
                    duration_ms,
                    "Task completed"
                );

                self.record_finish(execution_id, duration_ms, Ok(&result)).await;

                Ok(Outcome::Completed(result))
            }
            Err(error) => {
                self.ctx.counters.failed();
                record.last_error = Some(error.to_string());
                self.record_finish(execution_id, duration_ms, Err(&error)).await;

                match task.retry_policy().next(envelope.retries) {
                    RetryDecision::Retry { retry, delay } => {
                        envelope.retries = retry;

                        // The record only says Failed once a redelivery exists
                        if let Err(e) = self.broker.push_delayed(&envelope, delay).await {
                            tracing::error!(
                                task_id = %envelope.id,
                                task = %envelope.task,
                                "Failed to schedule retry, abandoning: {}",
                                e
                            );
                            let error = TaskError::Failed(format!(
                                "{} (retry could not be scheduled: {})",
                                error, e
                            ));
                            record.transition(TaskState::Abandoned);
                            record.last_error = Some(error.to_string());
                            self.broker.save_record(&record).await?;
                            return Ok(Outcome::Abandoned(error));
                        }

                        record.transition(TaskState::Failed);
                        self.broker.save_record(&record).await?;

                        tracing::warn!(
                            task_id = %envelope.id,
                            task = %envelope.task,
                            retry,
                            max_retries = task.retry_policy().max_retries,
                            delay_secs = delay.as_secs(),
                            "Task failed, retry scheduled: {}",
                            error
                        );

                        Ok(Outcome::RetryScheduled { retry, delay })
                    }
                    RetryDecision::Abandon => {
                        record.transition(TaskState::Abandoned);
                        self.broker.save_record(&record).await?;

                        tracing::error!(
                            task_id = %envelope.id,
                            task = %envelope.task,
                            attempts = record.attempts,
                            "Task abandoned after exhausting retries: {}",
                            error
                        );

                        Ok(Outcome::Abandoned(error))
                    }
                }
            }
        }
    }

    /// Run the task on its own tokio task so a panic stays inside the boundary
    async fn execute(
        &self,
        task: Arc<dyn Task>,
        envelope: &TaskEnvelope,
    ) -> Result<TaskResult, TaskError> {
        let ctx = self.ctx.clone();
        let args = envelope.args.clone();

        let handle = tokio::spawn(async move { task.run(&ctx, &args).await });

        match handle.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(TaskError::Panicked(message))
            }
            Err(join_error) => Err(TaskError::Failed(join_error.to_string())),
        }
    }

    async fn record_start(&self, envelope: &TaskEnvelope, worker_id: &str) -> Option<i64> {
        let db = self.ctx.db.as_ref()?;

        let execution = TaskExecution {
            id: None,
            task_id: envelope.id,
            task_type: "background".to_string(),
            task_name: envelope.task.clone(),
            priority: 0,
            attempt: envelope.retries as i32,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            success: None,
            error_message: None,
            result: None,
            ai_confidence: None,
            ai_reasoning: None,
            orchestrator_id: Some(worker_id.to_string()),
        };

        match db.start_task_execution(&execution).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(task_id = %envelope.id, "Failed to record task start: {}", e);
                None
            }
        }
    }

    async fn record_finish(
        &self,
        execution_id: Option<i64>,
        duration_ms: i64,
        result: Result<&TaskResult, &TaskError>,
    ) {
        let (Some(db), Some(id)) = (self.ctx.db.as_ref(), execution_id) else {
            return;
        };

        let payload = result.ok().map(TaskResult::to_value);
        let error_message = result.err().map(|e| e.to_string());

        let outcome = ExecutionOutcome {
            status: if result.is_ok() {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            },
            completed_at: Utc::now(),
            duration_ms,
            success: result.is_ok(),
            error_message: error_message.as_deref(),
            result: payload.as_ref(),
        };

        if let Err(e) = db.finish_task_execution(id, outcome).await {
            tracing::warn!(execution_id = id, "Failed to record task completion: {}", e);
        }
    }
}
