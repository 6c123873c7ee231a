use super::ai::{
    AnalyzeMarketConditions, AnalyzeMarketSentiment, GenerateInsights, OptimizeModelParameters,
    UpdateLearningModel,
};
use super::market::{SyncMarketData, SystemHealthCheck};
use super::trading::{AssessPortfolioRisk, ExecuteTradingSignal, RebalancePortfolio};
use super::Task;
use crate::config::Settings;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Public description of a registered task
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: String,
    pub retry_delay_secs: u64,
    pub max_retries: u32,
}

/// Name -> task definition lookup used by enqueuers and workers
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in task whose feature toggle is on
    pub fn with_builtin_tasks(settings: &Settings) -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(SystemHealthCheck));
        registry.register(Arc::new(SyncMarketData));
        registry.register(Arc::new(ExecuteTradingSignal));
        registry.register(Arc::new(AssessPortfolioRisk));

        if settings.enable_auto_rebalancing {
            registry.register(Arc::new(RebalancePortfolio));
        }

        if settings.enable_sentiment_analysis {
            registry.register(Arc::new(AnalyzeMarketSentiment));
        }

        if settings.enable_ai_tasks {
            registry.register(Arc::new(AnalyzeMarketConditions));
            registry.register(Arc::new(OptimizeModelParameters));
            registry.register(Arc::new(UpdateLearningModel));
            registry.register(Arc::new(GenerateInsights));
        }

        tracing::debug!("Registered {} tasks", registry.len());

        registry
    }

    /// Register a task, replacing any task with the same name
    pub fn register(&mut self, task: Arc<dyn Task>) {
        let name = task.name().to_string();
        if self.tasks.insert(name.clone(), task).is_some() {
            tracing::warn!("Task {} registered twice, keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All registered tasks sorted by name
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = self
            .tasks
            .values()
            .map(|task| {
                let policy = task.retry_policy();
                TaskInfo {
                    name: task.name().to_string(),
                    retry_delay_secs: policy.delay.as_secs(),
                    max_retries: policy.max_retries,
                }
            })
            .collect();

        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::names;

    fn policy_of(registry: &TaskRegistry, name: &str) -> (u64, u32) {
        let policy = registry.get(name).unwrap().retry_policy();
        (policy.delay.as_secs(), policy.max_retries)
    }

    #[test]
    fn test_builtin_retry_table() {
        let registry = TaskRegistry::with_builtin_tasks(&Settings::default());

        assert_eq!(registry.len(), 10);
        assert_eq!(policy_of(&registry, names::SYNC_MARKET_DATA), (60, 3));
        assert_eq!(policy_of(&registry, names::EXECUTE_TRADING_SIGNAL), (30, 2));
        assert_eq!(policy_of(&registry, names::REBALANCE_PORTFOLIO), (120, 2));
        assert_eq!(policy_of(&registry, names::ASSESS_PORTFOLIO_RISK), (60, 3));
        assert_eq!(policy_of(&registry, names::ANALYZE_MARKET_CONDITIONS), (120, 2));
        assert_eq!(policy_of(&registry, names::OPTIMIZE_MODEL_PARAMETERS), (300, 2));
        assert_eq!(policy_of(&registry, names::ANALYZE_MARKET_SENTIMENT), (180, 3));
        assert_eq!(policy_of(&registry, names::UPDATE_LEARNING_MODEL), (600, 1));
        assert_eq!(policy_of(&registry, names::GENERATE_INSIGHTS), (60, 3));
        assert_eq!(policy_of(&registry, names::SYSTEM_HEALTH_CHECK).1, 0);
    }

    #[test]
    fn test_feature_toggles_skip_registration() {
        let settings = Settings {
            enable_ai_tasks: false,
            enable_sentiment_analysis: false,
            enable_auto_rebalancing: false,
            ..Settings::default()
        };
        let registry = TaskRegistry::with_builtin_tasks(&settings);

        assert_eq!(registry.len(), 4);
        assert!(registry.contains(names::SYNC_MARKET_DATA));
        assert!(!registry.contains(names::GENERATE_INSIGHTS));
        assert!(!registry.contains(names::ANALYZE_MARKET_SENTIMENT));
        assert!(!registry.contains(names::REBALANCE_PORTFOLIO));
    }

    #[test]
    fn test_list_sorted() {
        let registry = TaskRegistry::with_builtin_tasks(&Settings::default());
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();

        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
