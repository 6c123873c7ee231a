use crate::config::Settings;
use crate::queue::TaskQueue;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub queue: TaskQueue,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, queue: TaskQueue) -> Self {
        Self {
            settings,
            queue,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}
