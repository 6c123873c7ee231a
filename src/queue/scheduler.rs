use super::TaskQueue;
use crate::config::Settings;
use crate::error::QueueError;
use crate::tasks::{names, TaskArgs};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A task auto-enqueued on a fixed interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicTask {
    pub task_name: String,
    pub interval: Duration,
}

/// Fires registered periodic tasks, starting at process boot
pub struct PeriodicScheduler {
    queue: TaskQueue,
    entries: Vec<PeriodicTask>,
}

impl PeriodicScheduler {
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            queue,
            entries: Vec::new(),
        }
    }

    /// Scheduler with the health probe and the market data sync
    pub fn with_default_entries(queue: TaskQueue, settings: &Settings) -> Result<Self, QueueError> {
        let mut scheduler = Self::new(queue);

        scheduler.run_periodic(
            names::SYSTEM_HEALTH_CHECK,
            Duration::from_secs(settings.health_check_interval_secs),
        )?;
        scheduler.run_periodic(
            names::SYNC_MARKET_DATA,
            Duration::from_secs(settings.market_sync_interval_secs),
        )?;

        Ok(scheduler)
    }

    /// Register a task to be enqueued every `interval`
    pub fn run_periodic(&mut self, task_name: &str, interval: Duration) -> Result<(), QueueError> {
        if !self.queue.registry().contains(task_name) {
            return Err(QueueError::UnknownTask(task_name.to_string()));
        }

        if interval.is_zero() {
            return Err(QueueError::InvalidInterval(task_name.to_string()));
        }

        self.entries.push(PeriodicTask {
            task_name: task_name.to_string(),
            interval,
        });

        Ok(())
    }

    pub fn entries(&self) -> &[PeriodicTask] {
        &self.entries
    }

    /// Spawn one ticking loop per entry; each stops when `shutdown` flips
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let Self { queue, entries } = self;

        entries
            .into_iter()
            .map(|entry| {
                let queue = queue.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { tick_loop(queue, entry, shutdown).await })
            })
            .collect()
    }
}

async fn tick_loop(queue: TaskQueue, entry: PeriodicTask, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(
        task = %entry.task_name,
        interval_secs = entry.interval.as_secs(),
        "Periodic task scheduled"
    );

    let mut ticker = tokio::time::interval(entry.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if *shutdown.borrow() {
                    break;
                }

                if let Err(e) = queue.enqueue(&entry.task_name, TaskArgs::none()).await {
                    tracing::error!(task = %entry.task_name, "Failed to enqueue periodic task: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(task = %entry.task_name, "Periodic task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBroker;
    use crate::tasks::TaskRegistry;
    use std::sync::Arc;

    fn queue() -> TaskQueue {
        TaskQueue::new(
            Arc::new(MemoryBroker::default()),
            Arc::new(TaskRegistry::with_builtin_tasks(&Settings::default())),
        )
    }

    #[test]
    fn test_default_entries() {
        let scheduler = PeriodicScheduler::with_default_entries(queue(), &Settings::default()).unwrap();

        assert_eq!(
            scheduler.entries(),
            &[
                PeriodicTask {
                    task_name: names::SYSTEM_HEALTH_CHECK.to_string(),
                    interval: Duration::from_secs(60),
                },
                PeriodicTask {
                    task_name: names::SYNC_MARKET_DATA.to_string(),
                    interval: Duration::from_secs(300),
                },
            ]
        );
    }

    #[test]
    fn test_rejects_unknown_and_zero_interval() {
        let mut scheduler = PeriodicScheduler::new(queue());

        assert!(matches!(
            scheduler.run_periodic("nope", Duration::from_secs(10)),
            Err(QueueError::UnknownTask(_))
        ));
        assert!(matches!(
            scheduler.run_periodic(names::GENERATE_INSIGHTS, Duration::ZERO),
            Err(QueueError::InvalidInterval(_))
        ));
        assert!(scheduler.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_boot_and_every_interval() {
        let queue = queue();
        let mut scheduler = PeriodicScheduler::new(queue.clone());
        scheduler
            .run_periodic(names::SYSTEM_HEALTH_CHECK, Duration::from_secs(60))
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = scheduler.spawn(shutdown_rx);

        // Ticks at 0s, 60s and 120s
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(queue.broker().pending_count().await.unwrap(), 3);

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
