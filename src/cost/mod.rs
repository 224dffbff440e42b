//! Cost and usage tracking - records, aggregation, budget alerts

pub mod pricing;

use crate::persistence::Store;
use crate::provider::ProviderKind;
use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub use pricing::{calculate_cost, Rate, DEFAULT_RATE};

/// One priced provider call, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub provider: ProviderKind,
    pub model: String,
    /// What kind of call this was ("generate", "stream", "embed")
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub execution_id: Option<Uuid>,
    pub step_execution_id: Option<Uuid>,
    pub user_id: Option<String>,
}

/// How often a budget threshold resets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl BudgetPeriod {
    /// Start of the current period
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            BudgetPeriod::Daily => now - Duration::days(1),
            BudgetPeriod::Weekly => now - Duration::days(7),
            BudgetPeriod::Monthly => now - Duration::days(30),
        }
    }
}

/// A configured spend threshold for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub id: Uuid,
    pub user_id: String,
    pub threshold_usd: f64,
    pub period: BudgetPeriod,
    pub active: bool,
}

/// A budget alert whose threshold has been crossed
///
/// Notification delivery belongs to an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub alert: BudgetAlert,
    pub spend_usd: f64,
}

/// Filters for usage queries
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub user_id: Option<String>,
    pub provider: Option<ProviderKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Aggregated usage over a filter window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    /// Cost per model id
    pub by_model: HashMap<String, f64>,
    /// Cost per operation
    pub by_operation: HashMap<String, f64>,
}

/// Prices provider calls and aggregates the resulting records
pub struct CostTracker {
    store: Arc<dyn Store>,
}

impl CostTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Price a call and append the usage record; returns the cost
    #[allow(clippy::too_many_arguments)]
    pub async fn record_usage(
        &self,
        provider: ProviderKind,
        model: &str,
        operation: &str,
        input_tokens: u64,
        output_tokens: u64,
        execution_id: Option<Uuid>,
        step_execution_id: Option<Uuid>,
        user_id: Option<&str>,
    ) -> Result<f64> {
        let cost = calculate_cost(provider, model, input_tokens, output_tokens);
        let record = UsageRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            provider,
            model: model.to_string(),
            operation: operation.to_string(),
            input_tokens,
            output_tokens,
            cost,
            execution_id,
            step_execution_id,
            user_id: user_id.map(str::to_string),
        };
        debug!(provider = %provider, model, cost, "Recording usage");
        self.store.append_usage(&record).await?;
        Ok(cost)
    }

    /// Aggregate request count, tokens, and cost over a filter window
    pub async fn usage_metrics(&self, filter: &UsageFilter) -> Result<UsageMetrics> {
        let records = self.store.query_usage(filter).await?;

        let mut metrics = UsageMetrics::default();
        for record in &records {
            metrics.requests += 1;
            metrics.input_tokens += record.input_tokens;
            metrics.output_tokens += record.output_tokens;
            metrics.total_cost += record.cost;
            *metrics.by_model.entry(record.model.clone()).or_insert(0.0) += record.cost;
            *metrics
                .by_operation
                .entry(record.operation.clone())
                .or_insert(0.0) += record.cost;
        }
        Ok(metrics)
    }

    /// Date -> cost rollup for the past `days` days
    pub async fn daily_costs(&self, days: u32) -> Result<BTreeMap<NaiveDate, f64>> {
        let filter = UsageFilter {
            from: Some(Utc::now() - Duration::days(i64::from(days))),
            ..Default::default()
        };
        let records = self.store.query_usage(&filter).await?;

        let mut rollup = BTreeMap::new();
        for record in &records {
            *rollup.entry(record.timestamp.date_naive()).or_insert(0.0) += record.cost;
        }
        Ok(rollup)
    }

    /// Alerts whose period-to-date spend has reached the threshold
    pub async fn check_budget_alerts(&self, user_id: &str) -> Result<Vec<TriggeredAlert>> {
        let alerts = self.store.budget_alerts(user_id).await?;
        let now = Utc::now();

        let mut triggered = Vec::new();
        for alert in alerts.into_iter().filter(|a| a.active) {
            let filter = UsageFilter {
                user_id: Some(user_id.to_string()),
                from: Some(alert.period.window_start(now)),
                ..Default::default()
            };
            let spend: f64 = self
                .store
                .query_usage(&filter)
                .await?
                .iter()
                .map(|r| r.cost)
                .sum();
            if spend >= alert.threshold_usd {
                triggered.push(TriggeredAlert {
                    spend_usd: spend,
                    alert,
                });
            }
        }
        Ok(triggered)
    }
}
