//! Execution and step-execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Overall execution status
///
/// Transitions are monotonic: Pending -> Running -> one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Execution record created, no step dispatched yet
    Pending,
    /// Steps are being dispatched
    Running,
    /// All steps completed
    Completed,
    /// A step failed; remaining steps were aborted
    Failed,
    /// Removed from the active registry before finishing
    Cancelled,
}

impl ExecutionStatus {
    /// Check whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Status of a single step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Step was never dispatched (e.g. dry-run short-circuit)
    Skipped,
}

/// One run of a pipeline with concrete input parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique execution identifier
    pub id: Uuid,

    /// The pipeline this execution ran
    pub pipeline_id: Uuid,

    /// The user that started it
    pub owner: String,

    /// Current status
    pub status: ExecutionStatus,

    /// Caller-supplied input parameters
    pub input: Map<String, Value>,

    /// Final output namespace (partial on failure)
    pub results: Map<String, Value>,

    /// Error text when status is Failed
    pub error: Option<String>,

    /// Sum of step costs in USD
    pub total_cost: f64,

    /// Sum of step token counts
    pub total_tokens: u64,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Create a pending execution
    pub fn new(pipeline_id: Uuid, owner: &str, input: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            owner: owner.to_string(),
            status: ExecutionStatus::Pending,
            input,
            results: Map::new(),
            error: None,
            total_cost: 0.0,
            total_tokens: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transition to Running
    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Utc::now();
    }

    /// Transition to Completed with the final output namespace
    pub fn complete(&mut self, results: Map<String, Value>) {
        self.status = ExecutionStatus::Completed;
        self.results = results;
        self.completed_at = Some(Utc::now());
    }

    /// Transition to Failed, preserving partial results
    pub fn fail(&mut self, error: String, partial_results: Map<String, Value>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error);
        self.results = partial_results;
        self.completed_at = Some(Utc::now());
    }

    /// Transition to Cancelled, preserving partial results
    pub fn cancel(&mut self, partial_results: Map<String, Value>) {
        self.status = ExecutionStatus::Cancelled;
        self.results = partial_results;
        self.completed_at = Some(Utc::now());
    }
}

/// Duration, token, and cost metrics for one step attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    /// Tokens consumed (prompt steps only)
    pub tokens: u64,

    /// Cost in USD (prompt steps only)
    pub cost: f64,
}

/// The record of one step's attempt within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique record identifier
    pub id: Uuid,

    /// Owning execution
    pub execution_id: Uuid,

    /// The step that was attempted
    pub step_id: Uuid,

    /// Step name at time of execution
    pub step_name: String,

    /// Current status
    pub status: StepStatus,

    /// Inputs after config overlay and mapping resolution
    pub inputs: Map<String, Value>,

    /// Handler outputs; present iff status is Completed
    pub outputs: Option<Map<String, Value>>,

    /// Error text when status is Failed
    pub error: Option<String>,

    /// Structured log lines emitted by the handler
    pub logs: Vec<String>,

    /// Duration/token/cost metrics
    pub metrics: StepMetrics,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// When the attempt finished
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    /// Create a running record for a step attempt
    pub fn start(execution_id: Uuid, step_id: Uuid, step_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id,
            step_name: step_name.to_string(),
            status: StepStatus::Running,
            inputs: Map::new(),
            outputs: None,
            error: None,
            logs: Vec::new(),
            metrics: StepMetrics::default(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Finalize as completed with outputs
    pub fn complete(&mut self, outputs: Map<String, Value>, metrics: StepMetrics) {
        self.status = StepStatus::Completed;
        self.outputs = Some(outputs);
        self.metrics = metrics;
        self.completed_at = Some(Utc::now());
    }

    /// Finalize as failed; outputs stay absent
    pub fn fail(&mut self, error: String, metrics: StepMetrics) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.metrics = metrics;
        self.completed_at = Some(Utc::now());
    }

    /// Finalize as skipped
    pub fn skip(&mut self, reason: &str) {
        self.status = StepStatus::Skipped;
        self.logs.push(format!("skipped: {}", reason));
        self.completed_at = Some(Utc::now());
    }
}
