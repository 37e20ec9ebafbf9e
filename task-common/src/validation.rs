use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::task::{SourceMetadata, Task};

const FIELD_TASK_ID: &str = "task_id";
const FIELD_DATA: &str = "data";
const FIELD_PRIORITY: &str = "priority";

/// JSON types the request envelope schema can demand of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Object,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldKind::String => write!(f, "string"),
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Object => write!(f, "object"),
        }
    }
}

/// Name of the JSON type a value actually has, for violation messages.
fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub problem: ViolationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    Missing(FieldKind),
    WrongType {
        expected: FieldKind,
        found: &'static str,
    },
    Unknown,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.problem {
            ViolationKind::Missing(expected) => {
                write!(f, "{}: required {} field is missing", self.field, expected)
            }
            ViolationKind::WrongType { expected, found } => {
                write!(f, "{}: expected {}, found {}", self.field, expected, found)
            }
            ViolationKind::Unknown => write!(f, "{}: unknown field", self.field),
        }
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|violation| violation.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid JSON payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("payload is not a JSON object, found {0}")]
    NotAnObject(&'static str),
    #[error("schema violations: {}", format_violations(.violations))]
    Schema { violations: Vec<FieldViolation> },
}

impl ValidationError {
    /// The `error_type` string used on the wire for failure outcomes.
    pub fn error_type(&self) -> &'static str {
        match self {
            ValidationError::Decode(_) | ValidationError::NotAnObject(_) => "DecodeError",
            ValidationError::Schema { .. } => "SchemaError",
        }
    }
}

/// A declared request-envelope schema: `task_id` (string) and `data`
/// (object) are required, `priority` (integer) is optional with a default.
/// Variants differ in how they treat fields the schema does not declare.
///
/// Schemas are a closed set resolved by name at startup; deployments pick
/// one through configuration.
#[derive(Debug, Clone)]
pub struct TaskSchema {
    name: &'static str,
    deny_unknown: bool,
    default_priority: i64,
}

impl TaskSchema {
    /// The strict request schema: unknown fields are rejected.
    pub fn task_request() -> Self {
        Self {
            name: "task-request",
            deny_unknown: true,
            default_priority: 1,
        }
    }

    /// Accepts and ignores fields beyond the declared envelope.
    pub fn task_request_open() -> Self {
        Self {
            name: "task-request-open",
            deny_unknown: false,
            default_priority: 1,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "task-request" => Some(Self::task_request()),
            "task-request-open" => Some(Self::task_request_open()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decode and validate one raw record into a `Task`, attaching the
    /// caller-supplied source metadata. Pure over its inputs: no side
    /// effects, same answer for the same bytes.
    ///
    /// Every violated field is reported, not just the first one found.
    pub fn validate(
        &self,
        raw: &[u8],
        source: SourceMetadata,
    ) -> Result<Task, ValidationError> {
        let decoded: Value = serde_json::from_slice(raw)?;
        let fields = match decoded {
            Value::Object(fields) => fields,
            other => return Err(ValidationError::NotAnObject(kind_of(&other))),
        };

        let mut violations = Vec::new();

        let task_id = match fields.get(FIELD_TASK_ID) {
            Some(Value::String(task_id)) => Some(task_id.clone()),
            Some(other) => {
                violations.push(wrong_type(FIELD_TASK_ID, FieldKind::String, other));
                None
            }
            None => {
                violations.push(missing(FIELD_TASK_ID, FieldKind::String));
                None
            }
        };

        let payload = match fields.get(FIELD_DATA) {
            Some(Value::Object(payload)) => Some(payload.clone()),
            Some(other) => {
                violations.push(wrong_type(FIELD_DATA, FieldKind::Object, other));
                None
            }
            None => {
                violations.push(missing(FIELD_DATA, FieldKind::Object));
                None
            }
        };

        let priority = match fields.get(FIELD_PRIORITY) {
            None => Some(self.default_priority),
            Some(value) => match value.as_i64() {
                Some(priority) => Some(priority),
                None => {
                    violations.push(wrong_type(FIELD_PRIORITY, FieldKind::Integer, value));
                    None
                }
            },
        };

        if self.deny_unknown {
            for field in fields.keys() {
                if ![FIELD_TASK_ID, FIELD_DATA, FIELD_PRIORITY].contains(&field.as_str()) {
                    violations.push(FieldViolation {
                        field: field.clone(),
                        problem: ViolationKind::Unknown,
                    });
                }
            }
        }

        match (task_id, payload, priority) {
            (Some(task_id), Some(payload), Some(priority)) if violations.is_empty() => Ok(Task {
                task_id,
                payload,
                priority: Some(priority),
                source,
            }),
            _ => Err(ValidationError::Schema { violations }),
        }
    }
}

fn missing(field: &str, expected: FieldKind) -> FieldViolation {
    FieldViolation {
        field: field.to_string(),
        problem: ViolationKind::Missing(expected),
    }
}

fn wrong_type(field: &str, expected: FieldKind, found: &Value) -> FieldViolation {
    FieldViolation {
        field: field.to_string(),
        problem: ViolationKind::WrongType {
            expected,
            found: kind_of(found),
        },
    }
}
