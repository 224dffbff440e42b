//! Pipeline definitions loaded from YAML

use crate::core::pipeline::{Pipeline, Step, StepType, Visibility};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

/// Top-level pipeline definition as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Owning user (defaults to "local" for file-based pipelines)
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Private or public
    #[serde(default)]
    pub visibility: Visibility,

    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Variables merged into the output namespace as defaults
    #[serde(default)]
    pub variables: Map<String, Value>,

    /// Arbitrary pipeline configuration
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Step definitions
    pub steps: Vec<StepDefinition>,
}

fn default_owner() -> String {
    "local".to_string()
}

/// Step definition as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Human-readable step name
    pub name: String,

    /// Handler type
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Position within the pipeline
    pub order: u32,

    /// Type-specific configuration
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Named inputs fetched from the context (name -> dotted path)
    #[serde(default)]
    pub input_mapping: Map<String, Value>,

    /// Context keys written from handler outputs
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

impl PipelineDefinition {
    /// Load a definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).with_context(|| {
            format!("Failed to read pipeline file {}", path.as_ref().display())
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let definition: PipelineDefinition =
            serde_yaml::from_str(yaml).context("Failed to parse pipeline YAML")?;
        definition.validate()?;
        Ok(definition)
    }

    /// Validate the definition structurally
    pub fn validate(&self) -> Result<()> {
        let mut seen_orders = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen_orders.insert(step.order) {
                anyhow::bail!("Duplicate step order: {}", step.order);
            }
        }

        let mut seen_names = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen_names.insert(&step.name) {
                anyhow::bail!("Duplicate step name: {}", step.name);
            }
        }

        if !self.steps.iter().any(|s| s.enabled) {
            anyhow::bail!("Pipeline '{}' has no enabled steps", self.name);
        }

        Ok(())
    }

    /// Convert the definition into a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            description: self.description.clone(),
            steps: self
                .steps
                .iter()
                .map(|s| Step {
                    id: Uuid::new_v4(),
                    name: s.name.clone(),
                    step_type: s.step_type,
                    order: s.order,
                    config: s.config.clone(),
                    input_mapping: s.input_mapping.clone(),
                    output_mapping: s.output_mapping.clone(),
                    enabled: s.enabled,
                    timeout_secs: s.timeout_secs,
                    retry_count: s.retry_count,
                })
                .collect(),
            tags: self.tags.clone(),
            config: self.config.clone(),
            variables: self.variables.clone(),
            owner: self.owner.clone(),
            visibility: self.visibility,
        }
    }
}
