//! Execution context - input/output namespaces and variable resolution

use serde_json::{Map, Value};
use uuid::Uuid;

/// Shared context threaded through one pipeline execution
///
/// The `input` namespace holds caller-supplied parameters and is read-only
/// for the duration of the run. The `output` namespace accumulates step
/// outputs; a later step may overwrite a key written by an earlier one.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Caller-supplied parameters (read-only)
    pub input: Map<String, Value>,

    /// Accumulated step outputs
    pub output: Map<String, Value>,

    /// The execution this context belongs to
    pub execution_id: Uuid,

    /// The user that started the execution
    pub user_id: String,

    /// The step-execution record currently being produced (if any)
    pub current_step_execution: Option<Uuid>,
}

impl ExecutionContext {
    /// Create a context with the given input parameters
    pub fn new(execution_id: Uuid, user_id: &str, input: Map<String, Value>) -> Self {
        Self {
            input,
            output: Map::new(),
            execution_id,
            user_id: user_id.to_string(),
            current_step_execution: None,
        }
    }

    /// Merge pipeline-level variables into the output namespace as defaults
    ///
    /// Keys already present in `output` win over variable defaults.
    pub fn merge_variables(&mut self, variables: &Map<String, Value>) {
        for (key, value) in variables {
            self.output
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Resolve a dotted path against the context
    ///
    /// Paths prefixed with `input.` read the input namespace, `output.`
    /// the output namespace. Unprefixed paths default to `output`.
    /// Missing segments and type mismatches yield `None`, never errors.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        if let Some(rest) = path.strip_prefix("input.") {
            return resolve_path_in(&self.input, rest);
        }
        if let Some(rest) = path.strip_prefix("output.") {
            return resolve_path_in(&self.output, rest);
        }
        resolve_path_in(&self.output, path)
    }

    /// Replace `{{dotted.path}}` placeholders with stringified context values
    ///
    /// Unresolved placeholders are left verbatim.
    pub fn interpolate(&self, template: &str) -> String {
        interpolate_with(template, |path| self.resolve(path).map(stringify))
    }
}

/// Resolve a dotted path inside a value tree
///
/// Maps are traversed by key, lists by numeric index. Any mismatch
/// (missing key, non-numeric index into a list, scalar mid-path)
/// resolves to `None`.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn resolve_path_in<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = map.get(head)?;
    match rest {
        Some(rest) => resolve_path(value, rest),
        None => Some(value),
    }
}

/// Stringify a context value for template substitution
///
/// Strings render without quotes; structured values render as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Apply `{{name}}` substitution using the given resolver
///
/// Placeholders the resolver cannot supply are left verbatim.
pub fn interpolate_with<F>(template: &str, resolve: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let name = after[..end].trim();
        match resolve(name) {
            Some(value) => {
                result.push_str(&rest[..start]);
                result.push_str(&value);
            }
            None => {
                // Leave the placeholder in place
                result.push_str(&rest[..start + 2 + end + 2]);
            }
        }
        rest = &after[end + 2..];
    }

    result.push_str(rest);
    result
}
