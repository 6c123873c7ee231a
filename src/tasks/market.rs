use super::{names, RetryPolicy, Task, TaskArgs, TaskContext, TaskError, TaskResult};
use crate::models::{HealthStatus, SystemHealth};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

/// Symbols synced when the caller does not name any
pub const DEFAULT_SYNC_SYMBOLS: &[&str] = &["SPY", "QQQ", "VTI", "IWM", "GLD"];

/// Market data sync
///
/// No data source is wired in; the task reports the symbols it would refresh.
pub struct SyncMarketData;

#[async_trait]
impl Task for SyncMarketData {
    fn name(&self) -> &str {
        names::SYNC_MARKET_DATA
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(60, 3)
    }

    async fn run(&self, _ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError> {
        let symbols = args
            .get_str_list("symbols", 0)
            .filter(|symbols| !symbols.is_empty())
            .unwrap_or_else(|| DEFAULT_SYNC_SYMBOLS.iter().map(|s| s.to_string()).collect());

        tracing::info!(assets = symbols.len(), "Market data sync requested");

        Ok(TaskResult::ok(json!({
            "assets_updated": symbols.len(),
            "symbols": symbols,
        })))
    }
}

/// Periodic health probe
///
/// Builds a [`SystemHealth`] snapshot from the in-process task counters and
/// stores it when Postgres is available.
pub struct SystemHealthCheck;

impl SystemHealthCheck {
    pub fn snapshot(ctx: &TaskContext) -> SystemHealth {
        let counters = ctx.counters.snapshot();
        let error_rate = counters.error_rate();
        let health_score = (1.0 - error_rate).clamp(0.0, 1.0);

        SystemHealth {
            id: None,
            cpu_usage: None,
            memory_usage: None,
            disk_usage: None,
            active_connections: 0,
            response_time_ms: None,
            error_rate,
            tasks_completed: counters.completed as i64,
            tasks_failed: counters.failed as i64,
            active_tasks: counters.active,
            health_score,
            status: HealthStatus::from_score(health_score),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl Task for SystemHealthCheck {
    fn name(&self) -> &str {
        names::SYSTEM_HEALTH_CHECK
    }

    // Runs again on the next tick anyway
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(30, 0)
    }

    async fn run(&self, ctx: &TaskContext, _args: &TaskArgs) -> Result<TaskResult, TaskError> {
        let health = Self::snapshot(ctx);

        if let Some(db) = &ctx.db {
            db.save_system_health(&health)
                .await
                .map_err(TaskError::persistence)?;
        }

        if health.status != HealthStatus::Healthy {
            tracing::warn!(
                status = %health.status,
                score = health.health_score,
                "System health degraded"
            );
        }

        Ok(TaskResult::ok(json!({
            "status": health.status,
            "health_score": health.health_score,
            "error_rate": health.error_rate,
            "tasks_completed": health.tasks_completed,
            "tasks_failed": health.tasks_failed,
            "active_tasks": health.active_tasks,
        })))
    }
}
