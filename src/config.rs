use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Broker URL scheme that selects the in-process broker
pub const MEMORY_BROKER_URL: &str = "memory://";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Process-wide configuration
///
/// Built once at startup by [`Settings::load`] and shared read-only
/// (usually as `Arc<Settings>`) with every component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // API
    pub api_host: String,
    pub api_port: u16,
    pub demo_mode: bool,
    pub app_version: String,

    // Risk thresholds
    pub max_portfolio_risk: f64,
    pub max_position_size: f64,
    pub stop_loss_pct: f64,
    pub min_signal_confidence: f64,

    // Connections
    pub redis_url: String,
    pub database_url: String,

    // Feature toggles
    pub enable_ai_tasks: bool,
    pub enable_sentiment_analysis: bool,
    pub enable_auto_rebalancing: bool,

    // Workers
    pub worker_concurrency: usize,
    pub queue_name: String,
    pub broker_poll_interval_ms: u64,
    pub task_record_ttl_secs: u64,

    // Periodic tasks
    pub health_check_interval_secs: u64,
    pub market_sync_interval_secs: u64,

    // Demo payloads
    pub portfolio_baseline_value: f64,
    pub portfolio_jitter: f64,

    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            demo_mode: true,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            max_portfolio_risk: 0.02,   // 2% of portfolio at risk
            max_position_size: 0.10,    // 10% max per position
            stop_loss_pct: 0.05,        // -5% stop
            min_signal_confidence: 0.6,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            database_url: "postgres://localhost/trading_ai".to_string(),
            enable_ai_tasks: true,
            enable_sentiment_analysis: true,
            enable_auto_rebalancing: true,
            worker_concurrency: 4,
            queue_name: "trading_ai".to_string(),
            broker_poll_interval_ms: 500,
            task_record_ttl_secs: 86_400,
            health_check_interval_secs: 60,
            market_sync_interval_secs: 300,
            portfolio_baseline_value: 125_000.0,
            portfolio_jitter: 2_500.0,
            log_filter: "trading_ai=info,tower_http=info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, `.env` and the process environment
    ///
    /// Environment variables map to fields by name, case-insensitively
    /// (e.g. `API_PORT=9000`, `DEMO_MODE=false`).
    pub fn load() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();
        Self::from_environment(Environment::default().try_parsing(true))
    }

    /// Build settings from the defaults layered under the given environment source
    pub fn from_environment(environment: Environment) -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let config = Config::builder()
            .set_default("api_host", defaults.api_host)?
            .set_default("api_port", i64::from(defaults.api_port))?
            .set_default("demo_mode", defaults.demo_mode)?
            .set_default("app_version", defaults.app_version)?
            .set_default("max_portfolio_risk", defaults.max_portfolio_risk)?
            .set_default("max_position_size", defaults.max_position_size)?
            .set_default("stop_loss_pct", defaults.stop_loss_pct)?
            .set_default("min_signal_confidence", defaults.min_signal_confidence)?
            .set_default("redis_url", defaults.redis_url)?
            .set_default("database_url", defaults.database_url)?
            .set_default("enable_ai_tasks", defaults.enable_ai_tasks)?
            .set_default("enable_sentiment_analysis", defaults.enable_sentiment_analysis)?
            .set_default("enable_auto_rebalancing", defaults.enable_auto_rebalancing)?
            .set_default("worker_concurrency", defaults.worker_concurrency as i64)?
            .set_default("queue_name", defaults.queue_name)?
            .set_default("broker_poll_interval_ms", defaults.broker_poll_interval_ms as i64)?
            .set_default("task_record_ttl_secs", defaults.task_record_ttl_secs as i64)?
            .set_default("health_check_interval_secs", defaults.health_check_interval_secs as i64)?
            .set_default("market_sync_interval_secs", defaults.market_sync_interval_secs as i64)?
            .set_default("portfolio_baseline_value", defaults.portfolio_baseline_value)?
            .set_default("portfolio_jitter", defaults.portfolio_jitter)?
            .set_default("log_filter", defaults.log_filter)?
            .add_source(environment)
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (key, value) in [
            ("max_portfolio_risk", self.max_portfolio_risk),
            ("max_position_size", self.max_position_size),
            ("stop_loss_pct", self.stop_loss_pct),
            ("min_signal_confidence", self.min_signal_confidence),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(SettingsError::Invalid {
                    key,
                    reason: format!("{} is outside (0, 1]", value),
                });
            }
        }

        if self.worker_concurrency == 0 {
            return Err(SettingsError::Invalid {
                key: "worker_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.health_check_interval_secs == 0 || self.market_sync_interval_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "interval_secs",
                reason: "periodic intervals must be positive".to_string(),
            });
        }

        if self.portfolio_jitter < 0.0 {
            return Err(SettingsError::Invalid {
                key: "portfolio_jitter",
                reason: "must not be negative".to_string(),
            });
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn uses_memory_broker(&self) -> bool {
        self.redis_url.starts_with(MEMORY_BROKER_URL)
    }

    pub fn broker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.broker_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_with(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().try_parsing(true).source(Some(source))
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.api_port, 8000);
        assert!(settings.demo_mode);
        assert!(!settings.uses_memory_broker());
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let settings = Settings::from_environment(env_with(&[
            ("API_PORT", "9100"),
            ("DEMO_MODE", "false"),
            ("REDIS_URL", "memory://"),
            ("WORKER_CONCURRENCY", "8"),
        ]))
        .unwrap();

        assert_eq!(settings.api_port, 9100);
        assert!(!settings.demo_mode);
        assert!(settings.uses_memory_broker());
        assert_eq!(settings.worker_concurrency, 8);
        // Untouched keys keep their defaults
        assert_eq!(settings.market_sync_interval_secs, 300);
    }

    #[test]
    fn test_rejects_out_of_range_risk() {
        let result = Settings::from_environment(env_with(&[("MAX_PORTFOLIO_RISK", "1.5")]));
        assert!(matches!(
            result,
            Err(SettingsError::Invalid { key: "max_portfolio_risk", .. })
        ));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let settings = Settings {
            worker_concurrency: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bind_address() {
        let settings = Settings::default();
        assert_eq!(settings.bind_address(), "0.0.0.0:8000");
    }
}
