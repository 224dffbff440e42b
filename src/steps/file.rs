//! File step - sandbox-rooted filesystem operations
//!
//! Every path is normalized and rebased under a single sandbox root.
//! A path resolving outside the root is silently remapped to
//! `<root>/<basename>` rather than rejected; a warning is logged when
//! that happens.

use crate::core::{ExecutionContext, Step, StepType};
use crate::steps::{StepHandler, StepResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const OPERATIONS: &[&str] = &["read", "write", "append", "delete", "list"];

/// Executes file steps inside a sandbox root
pub struct FileHandler {
    root: PathBuf,
}

impl FileHandler {
    /// Create a handler rooted at `root`; the directory is created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Normalize a requested path and rebase it under the sandbox root
    ///
    /// Escaping paths (absolute, or `..`-climbing past the root) are
    /// remapped to `<root>/<basename>`.
    pub fn resolve(&self, requested: &str) -> PathBuf {
        let requested_path = Path::new(requested);

        let mut normalized = PathBuf::new();
        let mut escaped = requested_path.is_absolute();
        for component in requested_path.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    if !normalized.pop() {
                        escaped = true;
                    }
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => escaped = true,
            }
        }

        if escaped {
            let basename = requested_path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("unnamed"));
            warn!(
                "Path {:?} escapes the sandbox root; remapping to {:?}",
                requested, basename
            );
            return self.root.join(basename);
        }

        self.root.join(normalized)
    }

    async fn read(&self, path: &Path) -> StepResult {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let mut outputs = Map::new();
                // Structured form exposed alongside the raw text
                if let Ok(parsed) = serde_json::from_str::<Value>(content.trim()) {
                    outputs.insert("parsed".to_string(), parsed);
                }
                outputs.insert("content".to_string(), json!(content));
                outputs.insert("path".to_string(), json!(path.display().to_string()));
                StepResult::ok(outputs)
            }
            Err(err) => StepResult::fail(format!("read {}: {}", path.display(), err)),
        }
    }

    async fn write(&self, path: &Path, content: &str, append: bool) -> StepResult {
        if let Some(parent) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return StepResult::fail(format!("mkdir {}: {}", parent.display(), err));
            }
        }

        let result = if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
            {
                Ok(mut file) => file.write_all(content.as_bytes()).await,
                Err(err) => Err(err),
            }
        } else {
            tokio::fs::write(path, content).await
        };

        match result {
            Ok(()) => {
                let mut outputs = Map::new();
                outputs.insert("path".to_string(), json!(path.display().to_string()));
                outputs.insert("bytes_written".to_string(), json!(content.len()));
                StepResult::ok(outputs)
            }
            Err(err) => StepResult::fail(format!("write {}: {}", path.display(), err)),
        }
    }

    async fn delete(&self, path: &Path) -> StepResult {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                let mut outputs = Map::new();
                outputs.insert("path".to_string(), json!(path.display().to_string()));
                outputs.insert("deleted".to_string(), json!(true));
                StepResult::ok(outputs)
            }
            Err(err) => StepResult::fail(format!("delete {}: {}", path.display(), err)),
        }
    }

    async fn list(&self, path: &Path, pattern: Option<&str>) -> StepResult {
        let matcher = match pattern.map(glob::Pattern::new) {
            Some(Ok(matcher)) => Some(matcher),
            Some(Err(err)) => return StepResult::fail_terminal(format!("bad pattern: {}", err)),
            None => None,
        };

        let mut reader = match tokio::fs::read_dir(path).await {
            Ok(reader) => reader,
            Err(err) => return StepResult::fail(format!("list {}: {}", path.display(), err)),
        };

        let mut entries = Vec::new();
        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => return StepResult::fail(format!("list {}: {}", path.display(), err)),
            };

            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(matcher) = &matcher {
                if !matcher.matches(&name) {
                    continue;
                }
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let modified = metadata
                .modified()
                .ok()
                .map(chrono::DateTime::<chrono::Utc>::from);
            let created = metadata
                .created()
                .ok()
                .map(chrono::DateTime::<chrono::Utc>::from);

            entries.push(json!({
                "name": name,
                "path": entry.path().display().to_string(),
                "is_dir": metadata.is_dir(),
                "size": metadata.len(),
                "modified": modified.map(|t| t.to_rfc3339()),
                "created": created.map(|t| t.to_rfc3339()),
            }));
        }

        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        let mut outputs = Map::new();
        outputs.insert("count".to_string(), json!(entries.len()));
        outputs.insert("entries".to_string(), json!(entries));
        StepResult::ok(outputs)
    }
}

#[async_trait]
impl StepHandler for FileHandler {
    fn step_type(&self) -> StepType {
        StepType::File
    }

    fn validate(&self, step: &Step) -> Vec<String> {
        let mut errors = Vec::new();
        match step.config_str("operation") {
            None => errors.push("operation is required".to_string()),
            Some(op) if !OPERATIONS.contains(&op) => {
                errors.push(format!("unknown operation: {}", op))
            }
            Some(_) => {}
        }
        if step.config_str("file_path").is_none() {
            errors.push("file_path is required".to_string());
        }
        errors
    }

    fn side_effecting(&self, _step: &Step, inputs: &Map<String, Value>) -> bool {
        matches!(
            inputs.get("operation").and_then(Value::as_str),
            Some("write") | Some("append") | Some("delete")
        )
    }

    async fn execute(
        &self,
        _step: &Step,
        inputs: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> StepResult {
        let Some(operation) = inputs.get("operation").and_then(Value::as_str) else {
            return StepResult::fail_terminal("operation is required");
        };
        let Some(requested) = inputs.get("file_path").and_then(Value::as_str) else {
            return StepResult::fail_terminal("file_path is required");
        };

        let requested = context.interpolate(requested);
        let path = self.resolve(&requested);
        debug!(operation, path = %path.display(), "File step");

        match operation {
            "read" => self.read(&path).await,
            "write" | "append" => {
                let content = inputs
                    .get("content")
                    .map(crate::core::context::stringify)
                    .unwrap_or_default();
                let content = context.interpolate(&content);
                self.write(&path, &content, operation == "append").await
            }
            "delete" => self.delete(&path).await,
            "list" => {
                let pattern = inputs.get("pattern").and_then(Value::as_str);
                self.list(&path, pattern).await
            }
            other => StepResult::fail_terminal(format!("unknown operation: {}", other)),
        }
    }
}
