//! SQLite-backed persistence store

use crate::core::{
    Execution, ExecutionStatus, Pipeline, StepExecution, StepMetrics, StepStatus,
};
use crate::cost::{BudgetAlert, BudgetPeriod, UsageFilter, UsageRecord};
use crate::persistence::Store;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// SQLite store for pipelines, executions, usage, and budget alerts
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store backed by the given database path
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}", db_path))
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create a store at the platform-default data path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("weft");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("weft.db");
        Self::new(db_path.to_str().unwrap()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                pipeline_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                results TEXT NOT NULL,
                error TEXT,
                total_cost REAL NOT NULL DEFAULT 0.0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS step_executions (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                step_name TEXT NOT NULL,
                status TEXT NOT NULL,
                inputs TEXT NOT NULL,
                outputs TEXT,
                error TEXT,
                logs TEXT NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                tokens INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0.0,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                seq INTEGER
            );

            CREATE TABLE IF NOT EXISTS usage_records (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                operation TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost REAL NOT NULL,
                execution_id TEXT,
                step_execution_id TEXT,
                user_id TEXT
            );

            CREATE TABLE IF NOT EXISTS budget_alerts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                threshold_usd REAL NOT NULL,
                period TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_executions_pipeline ON executions(pipeline_id);
            CREATE INDEX IF NOT EXISTS idx_step_executions_execution ON step_executions(execution_id);
            CREATE INDEX IF NOT EXISTS idx_usage_timestamp ON usage_records(timestamp);
            CREATE INDEX IF NOT EXISTS idx_usage_user ON usage_records(user_id);
            CREATE INDEX IF NOT EXISTS idx_alerts_user ON budget_alerts(user_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_map(text: &str) -> Map<String, Value> {
        serde_json::from_str(text).unwrap_or_default()
    }

    fn parse_execution_status(text: &str) -> ExecutionStatus {
        match text {
            "Pending" => ExecutionStatus::Pending,
            "Running" => ExecutionStatus::Running,
            "Completed" => ExecutionStatus::Completed,
            "Failed" => ExecutionStatus::Failed,
            "Cancelled" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Pending,
        }
    }

    fn parse_step_status(text: &str) -> StepStatus {
        match text {
            "Pending" => StepStatus::Pending,
            "Running" => StepStatus::Running,
            "Completed" => StepStatus::Completed,
            "Failed" => StepStatus::Failed,
            "Skipped" => StepStatus::Skipped,
            _ => StepStatus::Pending,
        }
    }

    fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> Result<Execution> {
        Ok(Execution {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_id: Uuid::parse_str(&row.get::<String, _>("pipeline_id"))?,
            owner: row.get("owner"),
            status: Self::parse_execution_status(&row.get::<String, _>("status")),
            input: Self::parse_map(&row.get::<String, _>("input")),
            results: Self::parse_map(&row.get::<String, _>("results")),
            error: row.get("error"),
            total_cost: row.get("total_cost"),
            total_tokens: row.get::<i64, _>("total_tokens") as u64,
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
        })
    }

    fn row_to_step_execution(row: &sqlx::sqlite::SqliteRow) -> Result<StepExecution> {
        let outputs: Option<String> = row.get("outputs");
        Ok(StepExecution {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            execution_id: Uuid::parse_str(&row.get::<String, _>("execution_id"))?,
            step_id: Uuid::parse_str(&row.get::<String, _>("step_id"))?,
            step_name: row.get("step_name"),
            status: Self::parse_step_status(&row.get::<String, _>("status")),
            inputs: Self::parse_map(&row.get::<String, _>("inputs")),
            outputs: outputs.as_deref().map(Self::parse_map),
            error: row.get("error"),
            logs: serde_json::from_str(&row.get::<String, _>("logs")).unwrap_or_default(),
            metrics: StepMetrics {
                duration_ms: row.get::<i64, _>("duration_ms") as u64,
                tokens: row.get::<i64, _>("tokens") as u64,
                cost: row.get("cost"),
            },
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
        })
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO pipelines (id, owner, name, data)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(pipeline.id.to_string())
        .bind(&pipeline.owner)
        .bind(&pipeline.name)
        .bind(serde_json::to_string(pipeline)?)
        .execute(&self.pool)
        .await
        .context("Failed to save pipeline")?;

        Ok(())
    }

    async fn get_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>> {
        let row = sqlx::query("SELECT data FROM pipelines WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load pipeline")?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>("data"))?)),
            None => Ok(None),
        }
    }

    async fn list_pipelines(&self, owner: Option<&str>) -> Result<Vec<Pipeline>> {
        let rows = match owner {
            Some(owner) => {
                sqlx::query("SELECT data FROM pipelines WHERE owner = ?1 ORDER BY name ASC")
                    .bind(owner)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT data FROM pipelines ORDER BY name ASC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list pipelines")?;

        rows.iter()
            .map(|row| Ok(serde_json::from_str(&row.get::<String, _>("data"))?))
            .collect()
    }

    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO executions
            (id, pipeline_id, owner, status, input, results, error, total_cost, total_tokens, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.pipeline_id.to_string())
        .bind(&execution.owner)
        .bind(execution.status.to_string())
        .bind(serde_json::to_string(&execution.input)?)
        .bind(serde_json::to_string(&execution.results)?)
        .bind(&execution.error)
        .bind(execution.total_cost)
        .bind(execution.total_tokens as i64)
        .bind(Self::to_naive(execution.started_at))
        .bind(execution.completed_at.map(Self::to_naive))
        .execute(&self.pool)
        .await
        .context("Failed to save execution")?;

        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load execution")?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn list_executions(&self, pipeline_id: Uuid) -> Result<Vec<Execution>> {
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE pipeline_id = ?1 ORDER BY started_at DESC",
        )
        .bind(pipeline_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn save_step_execution(&self, record: &StepExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO step_executions
            (id, execution_id, step_id, step_name, status, inputs, outputs, error, logs,
             duration_ms, tokens, cost, started_at, completed_at, seq)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                    COALESCE((SELECT seq FROM step_executions WHERE id = ?1),
                             (SELECT COALESCE(MAX(seq), 0) + 1 FROM step_executions WHERE execution_id = ?2)))
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.execution_id.to_string())
        .bind(record.step_id.to_string())
        .bind(&record.step_name)
        .bind(format!("{:?}", record.status))
        .bind(serde_json::to_string(&record.inputs)?)
        .bind(
            record
                .outputs
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(&record.error)
        .bind(serde_json::to_string(&record.logs)?)
        .bind(record.metrics.duration_ms as i64)
        .bind(record.metrics.tokens as i64)
        .bind(record.metrics.cost)
        .bind(Self::to_naive(record.started_at))
        .bind(record.completed_at.map(Self::to_naive))
        .execute(&self.pool)
        .await
        .context("Failed to save step execution")?;

        Ok(())
    }

    async fn list_step_executions(&self, execution_id: Uuid) -> Result<Vec<StepExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM step_executions WHERE execution_id = ?1 ORDER BY seq ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list step executions")?;

        rows.iter().map(Self::row_to_step_execution).collect()
    }

    async fn append_usage(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records
            (id, timestamp, provider, model, operation, input_tokens, output_tokens, cost,
             execution_id, step_execution_id, user_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(record.id.to_string())
        .bind(Self::to_naive(record.timestamp))
        .bind(record.provider.to_string())
        .bind(&record.model)
        .bind(&record.operation)
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.cost)
        .bind(record.execution_id.map(|id| id.to_string()))
        .bind(record.step_execution_id.map(|id| id.to_string()))
        .bind(&record.user_id)
        .execute(&self.pool)
        .await
        .context("Failed to append usage record")?;

        Ok(())
    }

    async fn query_usage(&self, filter: &UsageFilter) -> Result<Vec<UsageRecord>> {
        // Simple equality/range filters only; composed dynamically
        let mut sql = String::from("SELECT * FROM usage_records WHERE 1=1");
        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.provider.is_some() {
            sql.push_str(" AND provider = ?");
        }
        if filter.from.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filter.to.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp ASC");

        let mut query = sqlx::query(&sql);
        if let Some(user_id) = &filter.user_id {
            query = query.bind(user_id);
        }
        if let Some(provider) = filter.provider {
            query = query.bind(provider.to_string());
        }
        if let Some(from) = filter.from {
            query = query.bind(Self::to_naive(from));
        }
        if let Some(to) = filter.to {
            query = query.bind(Self::to_naive(to));
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to query usage records")?;

        rows.iter()
            .map(|row| {
                Ok(UsageRecord {
                    id: Uuid::parse_str(&row.get::<String, _>("id"))?,
                    timestamp: Self::from_naive(row.get("timestamp")),
                    provider: row
                        .get::<String, _>("provider")
                        .parse()
                        .unwrap_or(crate::provider::ProviderKind::OpenAi),
                    model: row.get("model"),
                    operation: row.get("operation"),
                    input_tokens: row.get::<i64, _>("input_tokens") as u64,
                    output_tokens: row.get::<i64, _>("output_tokens") as u64,
                    cost: row.get("cost"),
                    execution_id: row
                        .get::<Option<String>, _>("execution_id")
                        .and_then(|s| Uuid::parse_str(&s).ok()),
                    step_execution_id: row
                        .get::<Option<String>, _>("step_execution_id")
                        .and_then(|s| Uuid::parse_str(&s).ok()),
                    user_id: row.get("user_id"),
                })
            })
            .collect()
    }

    async fn budget_alerts(&self, user_id: &str) -> Result<Vec<BudgetAlert>> {
        let rows = sqlx::query("SELECT * FROM budget_alerts WHERE user_id = ?1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load budget alerts")?;

        rows.iter()
            .map(|row| {
                Ok(BudgetAlert {
                    id: Uuid::parse_str(&row.get::<String, _>("id"))?,
                    user_id: row.get("user_id"),
                    threshold_usd: row.get("threshold_usd"),
                    period: match row.get::<String, _>("period").as_str() {
                        "daily" => BudgetPeriod::Daily,
                        "weekly" => BudgetPeriod::Weekly,
                        _ => BudgetPeriod::Monthly,
                    },
                    active: row.get::<i64, _>("active") != 0,
                })
            })
            .collect()
    }

    async fn save_budget_alert(&self, alert: &BudgetAlert) -> Result<()> {
        let period = match alert.period {
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Weekly => "weekly",
            BudgetPeriod::Monthly => "monthly",
        };
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO budget_alerts (id, user_id, threshold_usd, period, active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(&alert.user_id)
        .bind(alert.threshold_usd)
        .bind(period)
        .bind(alert.active as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save budget alert")?;

        Ok(())
    }
}
