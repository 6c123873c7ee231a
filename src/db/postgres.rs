use crate::models::{
    AiDecision, ExecutionStatus, MarketBar, SystemHealth, Timeframe, TaskExecution, TradingSignal,
};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use uuid::Uuid;

/// Postgres persistence for market data, signals, health snapshots,
/// task history and AI decisions
///
/// Cloning is cheap, all clones share one connection pool.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

/// Outcome of a finished task attempt
pub struct ExecutionOutcome<'a> {
    pub status: ExecutionStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub success: bool,
    pub error_message: Option<&'a str>,
    pub result: Option<&'a serde_json::Value>,
}

impl PostgresPersistence {
    /// Connect to Postgres and apply pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    // ========================================================================
    // Market data
    // ========================================================================

    /// Insert a bar, or resync it if (symbol, timeframe, timestamp) already exists
    ///
    /// Returns the row id. Invalid bars (see [`MarketBar::validate`]) are refused.
    pub async fn save_market_bar(&self, bar: &MarketBar) -> Result<i64> {
        bar.validate()?;

        let row = sqlx::query(
            r#"
            INSERT INTO market_data (
                symbol, timeframe, open, high, low, close, volume,
                volatility, trend_strength, volume_ratio,
                sentiment_score, news_sentiment, social_sentiment, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (symbol, timeframe, timestamp) DO UPDATE SET
                open = EXCLUDED.open,
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                close = EXCLUDED.close,
                volume = EXCLUDED.volume,
                volatility = EXCLUDED.volatility,
                trend_strength = EXCLUDED.trend_strength,
                volume_ratio = EXCLUDED.volume_ratio,
                sentiment_score = EXCLUDED.sentiment_score,
                news_sentiment = EXCLUDED.news_sentiment,
                social_sentiment = EXCLUDED.social_sentiment,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&bar.symbol)
        .bind(bar.timeframe.as_str())
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.volume)
        .bind(bar.volatility)
        .bind(bar.trend_strength)
        .bind(bar.volume_ratio)
        .bind(bar.sentiment_score)
        .bind(bar.news_sentiment)
        .bind(bar.social_sentiment)
        .bind(bar.timestamp)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;

        tracing::debug!(
            "Saved {} {} bar at {} (id {})",
            bar.symbol,
            bar.timeframe,
            bar.timestamp,
            id
        );

        Ok(id)
    }

    /// Load the most recent bars for a symbol, oldest first
    pub async fn load_market_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: i64,
    ) -> Result<Vec<MarketBar>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT id, symbol, timeframe, open, high, low, close, volume,
                       volatility, trend_strength, volume_ratio,
                       sentiment_score, news_sentiment, social_sentiment,
                       timestamp, created_at, updated_at
                FROM market_data
                WHERE symbol = $1 AND timeframe = $2
                ORDER BY timestamp DESC
                LIMIT $3
            ) recent
            ORDER BY timestamp ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(market_bar_from_row).collect()
    }

    // ========================================================================
    // Trading signals
    // ========================================================================

    pub async fn save_signal(&self, signal: &TradingSignal) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO trading_signals (
                symbol, signal_type, confidence, strength,
                entry_price, stop_loss, target_price, reasoning,
                source, is_active, created_at, executed_at, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(&signal.symbol)
        .bind(signal.signal_type.as_str())
        .bind(signal.confidence)
        .bind(signal.strength)
        .bind(signal.entry_price)
        .bind(signal.stop_loss)
        .bind(signal.target_price)
        .bind(&signal.reasoning)
        .bind(&signal.source)
        .bind(signal.is_active)
        .bind(signal.created_at)
        .bind(signal.executed_at)
        .bind(signal.closed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    pub async fn load_active_signals(&self) -> Result<Vec<TradingSignal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, signal_type, confidence, strength,
                   entry_price, stop_loss, target_price, reasoning,
                   source, is_active, created_at, executed_at, closed_at
            FROM trading_signals
            WHERE is_active
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    pub async fn load_signal(&self, id: i64) -> Result<Option<TradingSignal>> {
        let row = sqlx::query(
            r#"
            SELECT id, symbol, signal_type, confidence, strength,
                   entry_price, stop_loss, target_price, reasoning,
                   source, is_active, created_at, executed_at, closed_at
            FROM trading_signals
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(signal_from_row).transpose()
    }

    /// Store a lifecycle transition made with
    /// [`TradingSignal::mark_executed`] or [`TradingSignal::mark_closed`]
    ///
    /// Only rows that are still active are updated. Returns false when the
    /// stored signal was already executed or closed.
    pub async fn save_signal_transition(&self, signal: &TradingSignal) -> Result<bool> {
        let Some(id) = signal.id else {
            return Err("signal has no id".into());
        };

        let result = sqlx::query(
            r#"
            UPDATE trading_signals
            SET is_active = $2, executed_at = $3, closed_at = $4
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(id)
        .bind(signal.is_active)
        .bind(signal.executed_at)
        .bind(signal.closed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ========================================================================
    // System health
    // ========================================================================

    pub async fn save_system_health(&self, health: &SystemHealth) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO system_health (
                cpu_usage, memory_usage, disk_usage, active_connections,
                response_time_ms, error_rate, tasks_completed, tasks_failed,
                active_tasks, health_score, status, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(health.cpu_usage)
        .bind(health.memory_usage)
        .bind(health.disk_usage)
        .bind(health.active_connections)
        .bind(health.response_time_ms)
        .bind(health.error_rate)
        .bind(health.tasks_completed)
        .bind(health.tasks_failed)
        .bind(health.active_tasks)
        .bind(health.health_score)
        .bind(health.status.as_str())
        .bind(health.timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    // ========================================================================
    // Task executions
    // ========================================================================

    /// Record the start of a task attempt
    pub async fn start_task_execution(&self, execution: &TaskExecution) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO task_executions (
                task_id, task_type, task_name, priority, attempt, status,
                started_at, orchestrator_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(execution.task_id)
        .bind(&execution.task_type)
        .bind(&execution.task_name)
        .bind(execution.priority)
        .bind(execution.attempt)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(&execution.orchestrator_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    /// Record the end of a task attempt
    pub async fn finish_task_execution(&self, id: i64, outcome: ExecutionOutcome<'_>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE task_executions SET
                status = $2,
                completed_at = $3,
                duration_ms = $4,
                success = $5,
                error_message = $6,
                result = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(outcome.status.as_str())
        .bind(outcome.completed_at)
        .bind(outcome.duration_ms)
        .bind(outcome.success)
        .bind(outcome.error_message)
        .bind(outcome.result)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load every recorded attempt of one task invocation
    pub async fn load_task_executions(&self, task_id: Uuid) -> Result<Vec<TaskExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, task_type, task_name, priority, attempt, status,
                   started_at, completed_at, duration_ms, success, error_message,
                   result, ai_confidence, ai_reasoning, orchestrator_id
            FROM task_executions
            WHERE task_id = $1
            ORDER BY attempt ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_execution_from_row).collect()
    }

    // ========================================================================
    // AI decisions
    // ========================================================================

    pub async fn save_ai_decision(&self, decision: &AiDecision) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO ai_decisions (
                decision_type, context, decision, confidence, reasoning,
                executed, execution_result, success_rate, model_id, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&decision.decision_type)
        .bind(&decision.context)
        .bind(&decision.decision)
        .bind(decision.confidence)
        .bind(&decision.reasoning)
        .bind(decision.executed)
        .bind(&decision.execution_result)
        .bind(decision.success_rate)
        .bind(&decision.model_id)
        .bind(decision.timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    #[cfg(test)]
    async fn clear_market_bars(&self, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM market_data WHERE symbol = $1")
            .bind(symbol)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn market_bar_from_row(row: &PgRow) -> Result<MarketBar> {
    let timeframe: String = row.try_get("timeframe")?;

    Ok(MarketBar {
        id: Some(row.try_get("id")?),
        symbol: row.try_get("symbol")?,
        timeframe: timeframe.parse()?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
        volatility: row.try_get("volatility")?,
        trend_strength: row.try_get("trend_strength")?,
        volume_ratio: row.try_get("volume_ratio")?,
        sentiment_score: row.try_get("sentiment_score")?,
        news_sentiment: row.try_get("news_sentiment")?,
        social_sentiment: row.try_get("social_sentiment")?,
        timestamp: row.try_get("timestamp")?,
        created_at: Some(row.try_get("created_at")?),
        updated_at: Some(row.try_get("updated_at")?),
    })
}

fn signal_from_row(row: &PgRow) -> Result<TradingSignal> {
    let signal_type: String = row.try_get("signal_type")?;

    Ok(TradingSignal {
        id: Some(row.try_get("id")?),
        symbol: row.try_get("symbol")?,
        signal_type: signal_type.parse()?,
        confidence: row.try_get("confidence")?,
        strength: row.try_get("strength")?,
        entry_price: row.try_get("entry_price")?,
        stop_loss: row.try_get("stop_loss")?,
        target_price: row.try_get("target_price")?,
        reasoning: row.try_get("reasoning")?,
        source: row.try_get("source")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        executed_at: row.try_get("executed_at")?,
        closed_at: row.try_get("closed_at")?,
    })
}

fn task_execution_from_row(row: &PgRow) -> Result<TaskExecution> {
    let status: String = row.try_get("status")?;

    Ok(TaskExecution {
        id: Some(row.try_get("id")?),
        task_id: row.try_get("task_id")?,
        task_type: row.try_get("task_type")?,
        task_name: row.try_get("task_name")?,
        priority: row.try_get("priority")?,
        attempt: row.try_get("attempt")?,
        status: status.parse()?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration_ms: row.try_get("duration_ms")?,
        success: row.try_get("success")?,
        error_message: row.try_get("error_message")?,
        result: row.try_get("result")?,
        ai_confidence: row.try_get("ai_confidence")?,
        ai_reasoning: row.try_get("ai_reasoning")?,
        orchestrator_id: row.try_get("orchestrator_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalType;
    use chrono::{Duration, TimeZone};

    const TEST_DB: &str = "postgres://localhost/trading_ai_test";

    fn test_bar(symbol: &str, hours_ago: i64, close: f64) -> MarketBar {
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        MarketBar::new(
            symbol,
            Timeframe::OneHour,
            close - 1.0,
            close + 2.0,
            close - 2.0,
            close,
            10_000.0,
            base - Duration::hours(hours_ago),
        )
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_market_bar_roundtrip() {
        let db = PostgresPersistence::new(TEST_DB).await.unwrap();
        db.clear_market_bars("TEST_RT").await.unwrap();

        let bar = test_bar("TEST_RT", 1, 450.25);
        db.save_market_bar(&bar).await.unwrap();

        let loaded = db
            .load_market_bars("TEST_RT", Timeframe::OneHour, 10)
            .await
            .unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, bar.symbol);
        assert_eq!(loaded[0].timeframe, bar.timeframe);
        assert_eq!(loaded[0].open, bar.open);
        assert_eq!(loaded[0].high, bar.high);
        assert_eq!(loaded[0].low, bar.low);
        assert_eq!(loaded[0].close, bar.close);
        assert_eq!(loaded[0].volume, bar.volume);
        assert!(loaded[0].created_at.is_some());

        db.clear_market_bars("TEST_RT").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_market_bar_resync_updates_in_place() {
        let db = PostgresPersistence::new(TEST_DB).await.unwrap();
        db.clear_market_bars("TEST_RESYNC").await.unwrap();

        let bar = test_bar("TEST_RESYNC", 1, 100.0);
        let first_id = db.save_market_bar(&bar).await.unwrap();

        let mut resynced = bar.clone();
        resynced.close = 101.0;
        let second_id = db.save_market_bar(&resynced).await.unwrap();

        assert_eq!(first_id, second_id);

        let loaded = db
            .load_market_bars("TEST_RESYNC", Timeframe::OneHour, 10)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].close, 101.0);

        db.clear_market_bars("TEST_RESYNC").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_invalid_bar_refused() {
        let db = PostgresPersistence::new(TEST_DB).await.unwrap();

        let mut bar = test_bar("TEST_INVALID", 1, 100.0);
        bar.high = 50.0;

        assert!(db.save_market_bar(&bar).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_signal_transitions_only_from_active() {
        let db = PostgresPersistence::new(TEST_DB).await.unwrap();

        let signal = TradingSignal::new("TEST_SIG", SignalType::Buy, 0.7, "test");
        let id = db.save_signal(&signal).await.unwrap();

        let mut executed = db.load_signal(id).await.unwrap().unwrap();
        let mut stale = executed.clone();
        executed.mark_executed(Utc::now()).unwrap();
        assert!(db.save_signal_transition(&executed).await.unwrap());

        // A copy loaded before execution still looks active but the row is not
        stale.mark_closed(Utc::now()).unwrap();
        assert!(!db.save_signal_transition(&stale).await.unwrap());

        let stored = db.load_signal(id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert!(stored.executed_at.is_some());
        assert!(stored.closed_at.is_none());
        assert!(!db.load_active_signals().await.unwrap().iter().any(|s| s.id == Some(id)));
    }
}
