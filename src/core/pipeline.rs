//! Pipeline and step domain model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

/// Who can see and run a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Only the owner may run it
    Private,
    /// Anyone may run it
    Public,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Private
    }
}

/// The closed set of step types
///
/// Dispatch is by enum variant through the handler registry; adding a
/// type means registering a new handler, never branching on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Prompt,
    Code,
    File,
    Http,
    Condition,
    Transform,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepType::Prompt => "prompt",
            StepType::Code => "code",
            StepType::File => "file",
            StepType::Http => "http",
            StepType::Condition => "condition",
            StepType::Transform => "transform",
        };
        f.write_str(name)
    }
}

/// A single typed unit of work within a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique step identifier
    pub id: Uuid,

    /// Human-readable step name
    pub name: String,

    /// Which handler executes this step
    pub step_type: StepType,

    /// Position within the pipeline (strictly increasing, unique)
    pub order: u32,

    /// Type-specific configuration
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Named inputs fetched from the context (name -> dotted path)
    #[serde(default)]
    pub input_mapping: Map<String, Value>,

    /// Context keys written from handler outputs (context key -> output key)
    #[serde(default)]
    pub output_mapping: Option<Map<String, Value>>,

    /// Disabled steps are skipped entirely
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Wall-clock budget for one invocation, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Additional attempts after the first failure
    #[serde(default)]
    pub retry_count: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

impl Step {
    /// Create a step with defaults for the optional fields
    pub fn new(name: &str, step_type: StepType, order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            step_type,
            order,
            config: Map::new(),
            input_mapping: Map::new(),
            output_mapping: None,
            enabled: true,
            timeout_secs: default_timeout_secs(),
            retry_count: 0,
        }
    }

    /// Set a config key, consuming and returning the step
    pub fn with_config(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    /// Map a named input to a dotted context path
    pub fn with_input(mut self, name: &str, path: &str) -> Self {
        self.input_mapping
            .insert(name.to_string(), Value::String(path.to_string()));
        self
    }

    /// Fetch a string config value
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// A named, ordered collection of steps
///
/// Immutable while an execution is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Unique pipeline identifier
    pub id: Uuid,

    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Ordered steps
    pub steps: Vec<Step>,

    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Arbitrary pipeline configuration
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Variables merged into the output namespace as defaults at start
    #[serde(default)]
    pub variables: Map<String, Value>,

    /// Owning user
    pub owner: String,

    /// Private or public
    #[serde(default)]
    pub visibility: Visibility,
}

impl Pipeline {
    /// Create an empty pipeline owned by `owner`
    pub fn new(name: &str, owner: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            steps: Vec::new(),
            tags: Vec::new(),
            config: Map::new(),
            variables: Map::new(),
            owner: owner.to_string(),
            visibility: Visibility::Private,
        }
    }

    /// Append a step, consuming and returning the pipeline
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Enabled steps sorted by `order` (never insertion order)
    pub fn enabled_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().filter(|s| s.enabled).collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Check whether `user` may run this pipeline
    pub fn runnable_by(&self, user: &str) -> bool {
        self.visibility == Visibility::Public || self.owner == user
    }

    /// Structural validation: step orders must be unique
    ///
    /// Handler-specific config checks live in the handler registry.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.order) {
                errors.push(format!(
                    "duplicate step order {} (step '{}')",
                    step.order, step.name
                ));
            }
        }
        errors
    }
}
