//! Persistence layer - store trait and in-memory backend
//!
//! The engine never issues raw queries: everything goes through
//! create/get/update/list operations keyed by id, with simple
//! equality/range filters.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::{Execution, Pipeline, StepExecution};
use crate::cost::{BudgetAlert, UsageFilter, UsageRecord};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Create or update a pipeline
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<()>;

    /// Load a pipeline by id
    async fn get_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>>;

    /// List pipelines, optionally filtered by owner
    async fn list_pipelines(&self, owner: Option<&str>) -> Result<Vec<Pipeline>>;

    /// Create or update an execution
    async fn save_execution(&self, execution: &Execution) -> Result<()>;

    /// Load an execution by id
    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>>;

    /// List executions of a pipeline, most recent first
    async fn list_executions(&self, pipeline_id: Uuid) -> Result<Vec<Execution>>;

    /// Create or update a step-execution record
    async fn save_step_execution(&self, record: &StepExecution) -> Result<()>;

    /// List step-execution records of an execution, in creation order
    async fn list_step_executions(&self, execution_id: Uuid) -> Result<Vec<StepExecution>>;

    /// Append a usage record (append-only)
    async fn append_usage(&self, record: &UsageRecord) -> Result<()>;

    /// Query usage records by user/provider/date window
    async fn query_usage(&self, filter: &UsageFilter) -> Result<Vec<UsageRecord>>;

    /// Budget alerts configured for a user
    async fn budget_alerts(&self, user_id: &str) -> Result<Vec<BudgetAlert>>;

    /// Create or update a budget alert
    async fn save_budget_alert(&self, alert: &BudgetAlert) -> Result<()>;
}

/// In-memory store (for testing or ephemeral use)
pub struct MemoryStore {
    pipelines: RwLock<HashMap<Uuid, Pipeline>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
    step_executions: RwLock<Vec<StepExecution>>,
    usage: RwLock<Vec<UsageRecord>>,
    alerts: RwLock<HashMap<Uuid, BudgetAlert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            step_executions: RwLock::new(Vec::new()),
            usage: RwLock::new(Vec::new()),
            alerts: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        self.pipelines
            .write()
            .await
            .insert(pipeline.id, pipeline.clone());
        Ok(())
    }

    async fn get_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>> {
        Ok(self.pipelines.read().await.get(&id).cloned())
    }

    async fn list_pipelines(&self, owner: Option<&str>) -> Result<Vec<Pipeline>> {
        let pipelines = self.pipelines.read().await;
        Ok(pipelines
            .values()
            .filter(|p| owner.is_none_or(|o| p.owner == o))
            .cloned()
            .collect())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn list_executions(&self, pipeline_id: Uuid) -> Result<Vec<Execution>> {
        let executions = self.executions.read().await;
        let mut matching: Vec<Execution> = executions
            .values()
            .filter(|e| e.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matching)
    }

    async fn save_step_execution(&self, record: &StepExecution) -> Result<()> {
        let mut records = self.step_executions.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn list_step_executions(&self, execution_id: Uuid) -> Result<Vec<StepExecution>> {
        Ok(self
            .step_executions
            .read()
            .await
            .iter()
            .filter(|r| r.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn append_usage(&self, record: &UsageRecord) -> Result<()> {
        self.usage.write().await.push(record.clone());
        Ok(())
    }

    async fn query_usage(&self, filter: &UsageFilter) -> Result<Vec<UsageRecord>> {
        Ok(self
            .usage
            .read()
            .await
            .iter()
            .filter(|r| {
                filter
                    .user_id
                    .as_deref()
                    .is_none_or(|u| r.user_id.as_deref() == Some(u))
                    && filter.provider.is_none_or(|p| r.provider == p)
                    && filter.from.is_none_or(|from| r.timestamp >= from)
                    && filter.to.is_none_or(|to| r.timestamp <= to)
            })
            .cloned()
            .collect())
    }

    async fn budget_alerts(&self, user_id: &str) -> Result<Vec<BudgetAlert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn save_budget_alert(&self, alert: &BudgetAlert) -> Result<()> {
        self.alerts.write().await.insert(alert.id, alert.clone());
        Ok(())
    }
}
