//! Boundary validation for untyped request params.
//!
//! Schema validation happens at the protocol boundary only; handler bodies
//! assume validated inputs. Each accessor records an issue instead of
//! failing fast so the caller gets the full list in one response.

use serde_json::Value;

use crate::{ErrorShape, error_codes};

/// A single validation problem: dotted path plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// Accumulating reader over a params object.
pub struct ParamReader<'a> {
    params: &'a Value,
    issues: Vec<ValidationIssue>,
}

impl<'a> ParamReader<'a> {
    pub fn new(params: &'a Value) -> Self {
        Self {
            params,
            issues: Vec::new(),
        }
    }

    fn push(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }

    pub fn raw(&self) -> &'a Value {
        self.params
    }

    /// Required trimmed non-empty string.
    pub fn require_str(&mut self, path: &str) -> Option<String> {
        match self.params.get(path) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::String(_)) => {
                self.push(path, "must not be empty");
                None
            },
            Some(_) => {
                self.push(path, "expected string");
                None
            },
            None => {
                self.push(path, "required");
                None
            },
        }
    }

    /// Optional trimmed string; empty strings collapse to `None`.
    pub fn opt_str(&mut self, path: &str) -> Option<String> {
        match self.params.get(path) {
            Some(Value::String(s)) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            },
            Some(Value::Null) | None => None,
            Some(_) => {
                self.push(path, "expected string");
                None
            },
        }
    }

    pub fn opt_bool(&mut self, path: &str) -> Option<bool> {
        match self.params.get(path) {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::Null) | None => None,
            Some(_) => {
                self.push(path, "expected boolean");
                None
            },
        }
    }

    /// Optional unsigned integer clamped into `[min, max]`.
    pub fn opt_u64_bounded(&mut self, path: &str, min: u64, max: u64) -> Option<u64> {
        match self.params.get(path) {
            Some(v) if v.is_u64() || v.is_i64() || v.is_f64() => match v.as_u64() {
                Some(n) => Some(n.clamp(min, max)),
                None => {
                    self.push(path, "expected non-negative integer");
                    None
                },
            },
            Some(Value::Null) | None => None,
            Some(_) => {
                self.push(path, "expected integer");
                None
            },
        }
    }

    pub fn opt_object(&mut self, path: &str) -> Option<&'a serde_json::Map<String, Value>> {
        match self.params.get(path) {
            Some(Value::Object(m)) => Some(m),
            Some(Value::Null) | None => None,
            Some(_) => {
                self.push(path, "expected object");
                None
            },
        }
    }

    pub fn opt_array(&mut self, path: &str) -> Option<&'a Vec<Value>> {
        match self.params.get(path) {
            Some(Value::Array(a)) => Some(a),
            Some(Value::Null) | None => None,
            Some(_) => {
                self.push(path, "expected array");
                None
            },
        }
    }

    /// Required array.
    pub fn require_array(&mut self, path: &str) -> Option<&'a Vec<Value>> {
        match self.params.get(path) {
            Some(Value::Array(a)) => Some(a),
            Some(_) => {
                self.push(path, "expected array");
                None
            },
            None => {
                self.push(path, "required");
                None
            },
        }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Finish validation: `Ok(())` when clean, else an `INVALID_REQUEST`
    /// error carrying the formatted issue list.
    pub fn finish(self) -> Result<(), ErrorShape> {
        if self.issues.is_empty() {
            return Ok(());
        }
        Err(issues_to_error(&self.issues))
    }
}

/// Format a validation issue list into one `INVALID_REQUEST` error.
pub fn issues_to_error(issues: &[ValidationIssue]) -> ErrorShape {
    let summary = issues
        .iter()
        .map(|i| format!("params.{}: {}", i.path, i.message))
        .collect::<Vec<_>>()
        .join("; ");
    ErrorShape::new(error_codes::INVALID_REQUEST, summary).with_details(
        serde_json::json!({ "issues": issues }),
    )
}
