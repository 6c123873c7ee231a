use super::{names, RetryPolicy, Task, TaskArgs, TaskContext, TaskError, TaskResult};
use crate::models::TradingSignal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

const DEFAULT_PORTFOLIO: &str = "default";

/// Execute a stored trading signal
///
/// Requires `signal_id`. With Postgres available the signal is moved from
/// active to executed; a signal that is no longer active fails the run.
pub struct ExecuteTradingSignal;

#[async_trait]
impl Task for ExecuteTradingSignal {
    fn name(&self) -> &str {
        names::EXECUTE_TRADING_SIGNAL
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(30, 2)
    }

    async fn run(&self, ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError> {
        let signal_id = args
            .get_i64("signal_id", 0)
            .ok_or_else(|| TaskError::invalid_args(self.name(), "signal_id is required"))?;

        if let Some(db) = &ctx.db {
            let mut signal = db
                .load_signal(signal_id)
                .await
                .map_err(TaskError::persistence)?
                .ok_or_else(|| TaskError::Failed(format!("signal {} not found", signal_id)))?;

            signal
                .mark_executed(Utc::now())
                .map_err(|e| TaskError::Failed(e.to_string()))?;

            let stored = db
                .save_signal_transition(&signal)
                .await
                .map_err(TaskError::persistence)?;

            if !stored {
                return Err(TaskError::Failed(format!(
                    "signal {} is no longer active",
                    signal_id
                )));
            }
        }

        tracing::info!(signal_id, "Trading signal executed");

        Ok(TaskResult::ok(json!({
            "signal_id": signal_id,
            "status": "executed",
        })))
    }
}

/// Portfolio rebalancing placeholder
pub struct RebalancePortfolio;

#[async_trait]
impl Task for RebalancePortfolio {
    fn name(&self) -> &str {
        names::REBALANCE_PORTFOLIO
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(120, 2)
    }

    async fn run(&self, ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError> {
        let portfolio_id = args.get_str("portfolio_id", 0).unwrap_or(DEFAULT_PORTFOLIO);

        Ok(TaskResult::ok(json!({
            "portfolio_id": portfolio_id,
            "rebalanced": true,
            "trades_planned": 0,
            "max_position_size": ctx.settings.max_position_size,
        })))
    }
}

/// Close active signals whose confidence is below `min_confidence`
///
/// Returns the signals that were closed, already transitioned.
pub fn close_weak_signals(
    signals: Vec<TradingSignal>,
    min_confidence: f64,
    at: DateTime<Utc>,
) -> Vec<TradingSignal> {
    signals
        .into_iter()
        .filter(|signal| signal.confidence < min_confidence)
        .filter_map(|mut signal| signal.mark_closed(at).ok().map(|_| signal))
        .collect()
}

/// Portfolio risk assessment
///
/// Reports the configured risk thresholds. With Postgres available, active
/// signals below `min_signal_confidence` are closed.
pub struct AssessPortfolioRisk;

#[async_trait]
impl Task for AssessPortfolioRisk {
    fn name(&self) -> &str {
        names::ASSESS_PORTFOLIO_RISK
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(60, 3)
    }

    async fn run(&self, ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError> {
        let portfolio_id = args.get_str("portfolio_id", 0).unwrap_or(DEFAULT_PORTFOLIO);
        let settings = &ctx.settings;

        let (active_signals, signals_closed) = match &ctx.db {
            Some(db) => {
                let active = db
                    .load_active_signals()
                    .await
                    .map_err(TaskError::persistence)?;
                let active_count = active.len();

                let mut closed = 0;
                for signal in close_weak_signals(active, settings.min_signal_confidence, Utc::now()) {
                    if db
                        .save_signal_transition(&signal)
                        .await
                        .map_err(TaskError::persistence)?
                    {
                        closed += 1;
                    }
                }

                if closed > 0 {
                    tracing::info!(closed, "Closed low-confidence signals");
                }

                (Some(active_count - closed), closed)
            }
            None => (None, 0),
        };

        Ok(TaskResult::ok(json!({
            "portfolio_id": portfolio_id,
            "within_limits": true,
            "active_signals": active_signals,
            "signals_closed": signals_closed,
            "limits": {
                "max_portfolio_risk": settings.max_portfolio_risk,
                "max_position_size": settings.max_position_size,
                "stop_loss_pct": settings.stop_loss_pct,
                "min_signal_confidence": settings.min_signal_confidence,
            },
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::sync::Arc;

    fn ctx() -> TaskContext {
        TaskContext::new(Arc::new(Settings::default()), None)
    }

    #[tokio::test]
    async fn test_execute_signal_requires_id() {
        let result = ExecuteTradingSignal.run(&ctx(), &TaskArgs::none()).await;
        assert!(matches!(result, Err(TaskError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_execute_signal_without_db() {
        let args = TaskArgs::none().with_kwarg("signal_id", 12);
        let result = ExecuteTradingSignal.run(&ctx(), &args).await.unwrap();

        assert!(result.success);
        assert_eq!(result.get("signal_id"), Some(&json!(12)));
    }

    #[tokio::test]
    async fn test_risk_assessment_reports_limits() {
        let result = AssessPortfolioRisk.run(&ctx(), &TaskArgs::none()).await.unwrap();

        assert_eq!(result.get("portfolio_id"), Some(&json!("default")));
        assert_eq!(result.payload["limits"]["max_portfolio_risk"], json!(0.02));
    }

    #[tokio::test]
    async fn test_rebalance_named_portfolio() {
        let args = TaskArgs::none().with_arg("growth");
        let result = RebalancePortfolio.run(&ctx(), &args).await.unwrap();

        assert_eq!(result.get("portfolio_id"), Some(&json!("growth")));
    }

    #[test]
    fn test_close_weak_signals() {
        use crate::models::SignalType;

        let strong = TradingSignal::new("SPY", SignalType::Buy, 0.8, "test");
        let weak = TradingSignal::new("IWM", SignalType::Sell, 0.3, "test");
        let mut done = TradingSignal::new("GLD", SignalType::Buy, 0.1, "test");
        done.mark_executed(Utc::now()).unwrap();

        let now = Utc::now();
        let closed = close_weak_signals(vec![strong, weak, done], 0.6, now);

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].symbol, "IWM");
        assert!(!closed[0].is_active);
        assert_eq!(closed[0].closed_at, Some(now));
    }
}
