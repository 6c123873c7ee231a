//! AI task placeholders
//!
//! None of these run a model. They return neutral literal values and, when
//! Postgres is available, log an [`AiDecision`] so the decision history has
//! the same shape it will have once real logic exists.

use super::{names, RetryPolicy, Task, TaskArgs, TaskContext, TaskError, TaskResult};
use crate::models::AiDecision;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

pub const PLACEHOLDER_MODEL_ID: &str = "placeholder-v0";

async fn record_decision(
    ctx: &TaskContext,
    decision_type: &str,
    context: Value,
    decision: Value,
    confidence: f64,
) -> Result<(), TaskError> {
    let Some(db) = &ctx.db else {
        return Ok(());
    };

    let record = AiDecision {
        id: None,
        decision_type: decision_type.to_string(),
        context,
        decision,
        confidence,
        reasoning: Some("placeholder: no model configured".to_string()),
        executed: false,
        execution_result: None,
        success_rate: None,
        model_id: Some(PLACEHOLDER_MODEL_ID.to_string()),
        timestamp: Utc::now(),
    };

    db.save_ai_decision(&record)
        .await
        .map_err(TaskError::persistence)?;

    Ok(())
}

pub struct AnalyzeMarketConditions;

#[async_trait]
impl Task for AnalyzeMarketConditions {
    fn name(&self) -> &str {
        names::ANALYZE_MARKET_CONDITIONS
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(120, 2)
    }

    async fn run(&self, ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError> {
        let decision = json!({
            "market_regime": "neutral",
            "confidence": 0.5,
        });

        record_decision(ctx, "market_analysis", json!(args), decision.clone(), 0.5).await?;

        Ok(TaskResult::ok(json!({
            "analysis": decision,
            "placeholder": true,
        })))
    }
}

pub struct OptimizeModelParameters;

#[async_trait]
impl Task for OptimizeModelParameters {
    fn name(&self) -> &str {
        names::OPTIMIZE_MODEL_PARAMETERS
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(300, 2)
    }

    async fn run(&self, ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError> {
        let decision = json!({ "parameters_changed": 0 });

        record_decision(ctx, "model_optimization", json!(args), decision, 0.0).await?;

        Ok(TaskResult::ok(json!({
            "optimized": false,
            "parameters_changed": 0,
            "placeholder": true,
        })))
    }
}

pub struct AnalyzeMarketSentiment;

#[async_trait]
impl Task for AnalyzeMarketSentiment {
    fn name(&self) -> &str {
        names::ANALYZE_MARKET_SENTIMENT
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(180, 3)
    }

    async fn run(&self, ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError> {
        let symbols = args.get_str_list("symbols", 0).unwrap_or_default();

        let scores: serde_json::Map<String, Value> = symbols
            .iter()
            .map(|symbol| (symbol.clone(), json!(0.0)))
            .collect();

        let decision = json!({ "overall_sentiment": 0.0 });
        record_decision(ctx, "sentiment_analysis", json!(args), decision, 0.0).await?;

        Ok(TaskResult::ok(json!({
            "symbols_analyzed": symbols.len(),
            "sentiment": scores,
            "overall_sentiment": 0.0,
            "placeholder": true,
        })))
    }
}

pub struct UpdateLearningModel;

#[async_trait]
impl Task for UpdateLearningModel {
    fn name(&self) -> &str {
        names::UPDATE_LEARNING_MODEL
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(600, 1)
    }

    async fn run(&self, ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError> {
        record_decision(ctx, "learning_update", json!(args), json!({ "samples": 0 }), 0.0).await?;

        Ok(TaskResult::ok(json!({
            "model_updated": false,
            "samples_processed": 0,
            "placeholder": true,
        })))
    }
}

pub struct GenerateInsights;

#[async_trait]
impl Task for GenerateInsights {
    fn name(&self) -> &str {
        names::GENERATE_INSIGHTS
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(60, 3)
    }

    async fn run(&self, ctx: &TaskContext, args: &TaskArgs) -> Result<TaskResult, TaskError> {
        record_decision(ctx, "insight_generation", json!(args), json!({ "insights": [] }), 0.0)
            .await?;

        Ok(TaskResult::ok(json!({
            "insights": [],
            "count": 0,
            "placeholder": true,
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
    async fn test_placeholders_succeed_without_db() {
        let ctx = ctx();
        let tasks: Vec<Box<dyn Task>> = vec![
            Box::new(AnalyzeMarketConditions),
            Box::new(OptimizeModelParameters),
            Box::new(AnalyzeMarketSentiment),
            Box::new(UpdateLearningModel),
            Box::new(GenerateInsights),
        ];

        for task in tasks {
            let result = task.run(&ctx, &TaskArgs::none()).await.unwrap();
            assert!(result.success, "{} failed", task.name());
            assert_eq!(result.get("placeholder"), Some(&json!(true)));
        }
    }

    #[tokio::test]
    async fn test_sentiment_scores_each_symbol() {
        let args = TaskArgs::none().with_kwarg("symbols", "SPY,QQQ");
        let result = AnalyzeMarketSentiment.run(&ctx(), &args).await.unwrap();

        assert_eq!(result.get("symbols_analyzed"), Some(&json!(2)));
        assert_eq!(result.payload["sentiment"]["QQQ"], json!(0.0));
    }
}
