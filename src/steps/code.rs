//! Code step - scripts in a child OS process
//!
//! Best-effort process isolation, not a hardened sandbox: scripts run
//! as a child process with a hard wall-clock timeout and an advisory
//! deny-list scan. Do not treat the deny-list as a security boundary.

use crate::core::{ExecutionContext, Step, StepMetrics, StepType};
use crate::steps::{StepHandler, StepResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Substrings flagged (non-fatally) when found in submitted code
const UNSAFE_PATTERNS: &[&str] = &[
    "rm -rf",
    "mkfs",
    "shutil.rmtree",
    "os.system",
    "subprocess.",
    "__import__",
    "eval(",
    "exec(",
    "/dev/sd",
    "curl ",
    "wget ",
];

/// Executes code steps as child processes
pub struct CodeHandler;

impl CodeHandler {
    pub fn new() -> Self {
        Self
    }

    fn command_for(language: &str, code: &str) -> Option<Command> {
        let mut command = match language {
            "python" => {
                let mut c = Command::new("python3");
                c.arg("-c").arg(code);
                c
            }
            "shell" => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(code);
                c
            }
            _ => return None,
        };
        command.kill_on_drop(true);
        Some(command)
    }

    /// Scan source text for deny-listed substrings (advisory only)
    fn security_warnings(code: &str) -> Vec<String> {
        UNSAFE_PATTERNS
            .iter()
            .filter(|pattern| code.contains(*pattern))
            .map(|pattern| format!("security warning: code contains {:?}", pattern))
            .collect()
    }
}

impl Default for CodeHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler for CodeHandler {
    fn step_type(&self) -> StepType {
        StepType::Code
    }

    fn validate(&self, step: &Step) -> Vec<String> {
        let mut errors = Vec::new();
        if step.config_str("code").is_none() {
            errors.push("code is required".to_string());
        }
        if let Some(language) = step.config_str("language") {
            if !matches!(language, "python" | "shell") {
                errors.push(format!("unsupported language: {}", language));
            }
        }
        errors
    }

    fn side_effecting(&self, _step: &Step, _inputs: &Map<String, Value>) -> bool {
        // A child process can do anything; dry-run always skips it
        true
    }

    async fn execute(
        &self,
        step: &Step,
        inputs: &Map<String, Value>,
        _context: &ExecutionContext,
    ) -> StepResult {
        let Some(code) = inputs.get("code").and_then(Value::as_str) else {
            return StepResult::fail_terminal("code is required");
        };
        let language = inputs
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or("python");

        let Some(mut command) = Self::command_for(language, code) else {
            return StepResult::fail_terminal(format!("unsupported language: {}", language));
        };

        // Resolved parameters reach the script via the environment
        for (name, value) in inputs {
            if name == "code" || name == "language" {
                continue;
            }
            let key = format!("WEFT_PARAM_{}", name.to_uppercase());
            command.env(key, crate::core::context::stringify(value));
        }

        let warnings = Self::security_warnings(code);
        for warning in &warnings {
            warn!("{} ({})", warning, step.name);
        }

        let started = std::time::Instant::now();
        let budget = Duration::from_secs(step.timeout_secs);
        debug!(language, timeout_secs = step.timeout_secs, "Spawning code step");

        // kill_on_drop reaps the child when the timeout wins the race
        let output = match timeout(budget, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return StepResult::fail(format!("failed to spawn {}: {}", language, err))
            }
            Err(_) => {
                return StepResult::fail(format!(
                    "timeout after {} seconds",
                    step.timeout_secs
                ))
                .with_metrics(StepMetrics {
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        let mut outputs = Map::new();
        outputs.insert("stdout".to_string(), json!(stdout));
        outputs.insert("stderr".to_string(), json!(stderr));
        outputs.insert("exit_code".to_string(), json!(exit_code));

        // Expose structured stdout when it looks like a JSON object
        let trimmed = stdout.trim();
        if trimmed.starts_with('{') {
            if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                outputs.insert("parsed".to_string(), parsed);
            }
        }

        let metrics = StepMetrics {
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        };

        if !output.status.success() {
            let mut result = StepResult::fail(format!(
                "{} exited with code {}: {}",
                language,
                exit_code,
                stderr.trim()
            ))
            .with_metrics(metrics);
            result.outputs = outputs;
            result.logs.extend(warnings);
            return result;
        }

        let mut result = StepResult::ok(outputs).with_metrics(metrics);
        result.logs.extend(warnings);
        result
    }
}
