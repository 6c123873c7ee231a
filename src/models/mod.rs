use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error raised when a stored enum value or a record fails validation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("invalid market bar for {symbol}: {reason}")]
    InvalidBar { symbol: String, reason: String },

    #[error("signal {id} is not active")]
    SignalNotActive { id: i64 },
}

/// Implements `as_str`, `Display` and `FromStr` for enums persisted as text
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ModelError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ============================================================================
// Market data
// ============================================================================

/// Bar interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
}

text_enum!(Timeframe, "timeframe", {
    OneMinute => "1m",
    FiveMinutes => "5m",
    FifteenMinutes => "15m",
    OneHour => "1h",
    FourHours => "4h",
    OneDay => "1d",
    OneWeek => "1w",
});

/// One OHLCV bar plus derived indicators and sentiment
///
/// `id`, `created_at` and `updated_at` are assigned by the database and are
/// `None` until the bar has been stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketBar {
    pub id: Option<i64>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,

    // Derived indicators
    pub volatility: Option<f64>,
    pub trend_strength: Option<f64>,
    pub volume_ratio: Option<f64>,

    // Sentiment
    pub sentiment_score: Option<f64>,
    pub news_sentiment: Option<f64>,
    pub social_sentiment: Option<f64>,

    pub timestamp: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MarketBar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            symbol: symbol.into(),
            timeframe,
            open,
            high,
            low,
            close,
            volume,
            volatility: None,
            trend_strength: None,
            volume_ratio: None,
            sentiment_score: None,
            news_sentiment: None,
            social_sentiment: None,
            timestamp,
            created_at: None,
            updated_at: None,
        }
    }

    /// Check OHLC bounds and volume
    ///
    /// high must be the bar maximum, low the bar minimum, volume non-negative.
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: String| ModelError::InvalidBar {
            symbol: self.symbol.clone(),
            reason,
        };

        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(invalid("prices must be finite".to_string()));
        }

        if self.high < self.open.max(self.close).max(self.low) {
            return Err(invalid(format!(
                "high {} below open/close/low",
                self.high
            )));
        }

        if self.low > self.open.min(self.close).min(self.high) {
            return Err(invalid(format!("low {} above open/close/high", self.low)));
        }

        if !(self.volume >= 0.0) {
            return Err(invalid(format!("volume {} is negative", self.volume)));
        }

        Ok(())
    }
}

// ============================================================================
// Trading signals
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

text_enum!(SignalType, "signal type", {
    Buy => "BUY",
    Sell => "SELL",
    Hold => "HOLD",
});

/// Trading signal produced by a signal source
///
/// Lifecycle: active -> executed, or active -> closed. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingSignal {
    pub id: Option<i64>,
    pub symbol: String,
    pub signal_type: SignalType,
    pub confidence: f64, // 0.0 - 1.0
    pub strength: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub target_price: Option<f64>,
    pub reasoning: Option<String>,
    pub source: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradingSignal {
    pub fn new(
        symbol: impl Into<String>,
        signal_type: SignalType,
        confidence: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            symbol: symbol.into(),
            signal_type,
            confidence: confidence.clamp(0.0, 1.0),
            strength: 0.0,
            entry_price: None,
            stop_loss: None,
            target_price: None,
            reasoning: None,
            source: source.into(),
            is_active: true,
            created_at: Utc::now(),
            executed_at: None,
            closed_at: None,
        }
    }

    pub fn mark_executed(&mut self, at: DateTime<Utc>) -> Result<(), ModelError> {
        self.ensure_active()?;
        self.is_active = false;
        self.executed_at = Some(at);
        Ok(())
    }

    pub fn mark_closed(&mut self, at: DateTime<Utc>) -> Result<(), ModelError> {
        self.ensure_active()?;
        self.is_active = false;
        self.closed_at = Some(at);
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), ModelError> {
        if self.is_active {
            Ok(())
        } else {
            Err(ModelError::SignalNotActive {
                id: self.id.unwrap_or_default(),
            })
        }
    }
}

// ============================================================================
// System health
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

text_enum!(HealthStatus, "health status", {
    Healthy => "healthy",
    Warning => "warning",
    Critical => "critical",
});

impl HealthStatus {
    /// Map a health score in [0, 1] to a status
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            HealthStatus::Healthy
        } else if score >= 0.5 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }
}

/// Point-in-time system metrics snapshot (append-only)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemHealth {
    pub id: Option<i64>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub active_connections: i32,
    pub response_time_ms: Option<f64>,
    pub error_rate: f64,
    pub tasks_completed: i64,
    pub tasks_failed: i64,
    pub active_tasks: i64,
    pub health_score: f64, // 0.0 - 1.0
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Task execution history
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

text_enum!(ExecutionStatus, "execution status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

/// One background task run
///
/// Inserted when an attempt starts, updated once when it finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExecution {
    pub id: Option<i64>,
    pub task_id: uuid::Uuid,
    pub task_type: String,
    pub task_name: String,
    pub priority: i32,
    pub attempt: i32,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub ai_confidence: Option<f64>,
    pub ai_reasoning: Option<String>,
    pub orchestrator_id: Option<String>,
}

// ============================================================================
// AI decisions
// ============================================================================

/// Record of a component claiming to have made a decision (append-only)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiDecision {
    pub id: Option<i64>,
    pub decision_type: String,
    pub context: serde_json::Value,
    pub decision: serde_json::Value,
    pub confidence: f64,
    pub reasoning: Option<String>,
    pub executed: bool,
    pub execution_result: Option<serde_json::Value>,
    pub success_rate: Option<f64>,
    pub model_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: f64) -> MarketBar {
        MarketBar::new("SPY", Timeframe::OneDay, open, high, low, close, volume, Utc::now())
    }

    #[test]
    fn test_valid_bar() {
        assert!(bar(100.0, 105.0, 98.0, 103.0, 1_000.0).validate().is_ok());
        // Flat bar
        assert!(bar(100.0, 100.0, 100.0, 100.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_bar_high_below_close() {
        let result = bar(100.0, 101.0, 98.0, 103.0, 1_000.0).validate();
        assert!(matches!(result, Err(ModelError::InvalidBar { .. })));
    }

    #[test]
    fn test_bar_low_above_open() {
        let result = bar(97.0, 105.0, 98.0, 103.0, 1_000.0).validate();
        assert!(result.is_err());
    }

    #[test]
    fn test_bar_negative_volume() {
        assert!(bar(100.0, 105.0, 98.0, 103.0, -1.0).validate().is_err());
    }

    #[test]
    fn test_timeframe_text_roundtrip() {
        assert_eq!("5m".parse::<Timeframe>().unwrap(), Timeframe::FiveMinutes);
        assert_eq!(Timeframe::OneDay.as_str(), "1d");
        assert_eq!(
            serde_json::to_string(&Timeframe::OneHour).unwrap(),
            "\"1h\""
        );
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_signal_lifecycle() {
        let mut signal = TradingSignal::new("QQQ", SignalType::Buy, 0.8, "demo");
        assert!(signal.is_active);

        signal.mark_executed(Utc::now()).unwrap();
        assert!(!signal.is_active);
        assert!(signal.executed_at.is_some());

        // Executed signals cannot be closed
        assert!(signal.mark_closed(Utc::now()).is_err());
        assert!(signal.closed_at.is_none());
    }

    #[test]
    fn test_signal_confidence_clamped() {
        let signal = TradingSignal::new("QQQ", SignalType::Sell, 1.7, "demo");
        assert_eq!(signal.confidence, 1.0);
        assert_eq!(signal.signal_type.to_string(), "SELL");
    }

    #[test]
    fn test_health_status_from_score() {
        assert_eq!(HealthStatus::from_score(1.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(0.8), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(0.6), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(0.1), HealthStatus::Critical);
    }
}
