// Background task definitions
pub mod ai;
pub mod market;
pub mod registry;
pub mod retry;
pub mod trading;

pub use registry::{TaskInfo, TaskRegistry};
pub use retry::{RetryDecision, RetryPolicy};

use crate::config::Settings;
use crate::db::PostgresPersistence;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Registered task names
pub mod names {
    pub const SYSTEM_HEALTH_CHECK: &str = "system_health_check";
    pub const SYNC_MARKET_DATA: &str = "sync_market_data";
    pub const EXECUTE_TRADING_SIGNAL: &str = "execute_trading_signal";
    pub const REBALANCE_PORTFOLIO: &str = "rebalance_portfolio";
    pub const ASSESS_PORTFOLIO_RISK: &str = "assess_portfolio_risk";
    pub const ANALYZE_MARKET_CONDITIONS: &str = "analyze_market_conditions";
    pub const OPTIMIZE_MODEL_PARAMETERS: &str = "optimize_model_parameters";
    pub const ANALYZE_MARKET_SENTIMENT: &str = "analyze_market_sentiment";
    pub const UPDATE_LEARNING_MODEL: &str = "update_learning_model";
    pub const GENERATE_INSIGHTS: &str = "generate_insights";
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    #[error("invalid arguments for {task}: {reason}")]
    InvalidArguments { task: String, reason: String },

    #[error("{0}")]
    Failed(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn invalid_args(task: &str, reason: impl Into<String>) -> Self {
        TaskError::InvalidArguments {
            task: task.to_string(),
            reason: reason.into(),
        }
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        TaskError::Persistence(err.to_string())
    }
}

/// Positional and keyword arguments of a task invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskArgs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_kwarg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Look up an argument by keyword, falling back to its position
    pub fn get(&self, key: &str, position: usize) -> Option<&Value> {
        self.kwargs
            .get(key)
            .or_else(|| self.args.get(position))
            .filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str, position: usize) -> Option<&str> {
        self.get(key, position).and_then(Value::as_str)
    }

    /// Integer argument, accepting numbers and numeric strings
    pub fn get_i64(&self, key: &str, position: usize) -> Option<i64> {
        match self.get(key, position)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// List of strings, accepting a JSON array or a comma separated string
    pub fn get_str_list(&self, key: &str, position: usize) -> Option<Vec<String>> {
        match self.get(key, position)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Structured task result
///
/// Always carries `success` and an RFC 3339 `timestamp`; task-specific fields
/// are flattened next to them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TaskResult {
    /// Successful result; non-object payloads are stored under `result`
    pub fn ok(payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };

        Self {
            success: true,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// In-process task counters read by the health probe
#[derive(Debug, Default)]
pub struct TaskCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    active: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub active: i64,
}

impl TaskCounters {
    pub fn started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

impl CounterSnapshot {
    /// Fraction of finished attempts that failed
    pub fn error_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.failed as f64 / finished as f64
        }
    }
}

/// Shared dependencies handed to every task run
pub struct TaskContext {
    pub settings: Arc<Settings>,
    pub db: Option<PostgresPersistence>,
    pub counters: Arc<TaskCounters>,
}

impl TaskContext {
    pub fn new(settings: Arc<Settings>, db: Option<PostgresPersistence>) -> Self {
        Self {
            settings,
            db,
            counters: Arc::new(TaskCounters::default()),
        }
    }
}

/// A named, independently invocable unit of background work
#[async_trait]
pub trait Task: Send + Sync {
    /// Name the task is registered and enqueued under
    fn name(&self) -> &str;

    /// Retry policy the worker pool applies when a run fails
    fn retry_policy(&self) -> RetryPolicy;

    /// Execute one logical unit of work
    async fn run(&self, ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_keyword_then_position() {
        let args = TaskArgs::none().with_arg("AAPL").with_kwarg("symbol", "MSFT");
        assert_eq!(args.get_str("symbol", 0), Some("MSFT"));

        let positional = TaskArgs::none().with_arg("AAPL");
        assert_eq!(positional.get_str("symbol", 0), Some("AAPL"));
        assert_eq!(positional.get_str("other", 1), None);
    }

    #[test]
    fn test_args_integer_coercion() {
        let args = TaskArgs::none().with_kwarg("signal_id", "42");
        assert_eq!(args.get_i64("signal_id", 0), Some(42));

        let args = TaskArgs::none().with_arg(7);
        assert_eq!(args.get_i64("signal_id", 0), Some(7));

        let args = TaskArgs::none().with_kwarg("signal_id", "abc");
        assert_eq!(args.get_i64("signal_id", 0), None);
    }

    #[test]
    fn test_args_deserialize_with_missing_fields() {
        let args: TaskArgs = serde_json::from_value(json!({"kwargs": {"symbols": "SPY, QQQ"}})).unwrap();
        assert!(args.args.is_empty());
        assert_eq!(
            args.get_str_list("symbols", 0),
            Some(vec!["SPY".to_string(), "QQQ".to_string()])
        );
    }

    #[test]
    fn test_result_serializes_flat() {
        let result = TaskResult::ok(json!({"assets_updated": 5}));
        let value = result.to_value();

        assert_eq!(value["success"], json!(true));
        assert_eq!(value["assets_updated"], json!(5));

        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());

        let back: TaskResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_result_wraps_scalar_payload() {
        let result = TaskResult::ok(json!(3));
        assert_eq!(result.get("result"), Some(&json!(3)));
    }

    #[test]
    fn test_counters_error_rate() {
        let counters = TaskCounters::default();
        assert_eq!(counters.snapshot().error_rate(), 0.0);

        for _ in 0..3 {
            counters.started();
            counters.completed();
        }
        counters.started();
        counters.failed();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.active, 0);
        assert!((snapshot.error_rate() - 0.25).abs() < 1e-9);
    }
}
