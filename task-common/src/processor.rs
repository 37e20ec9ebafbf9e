use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::task::Task;

/// Raised by a processor while executing a task. Converted into a failure
/// outcome by the calling pipeline stage, never allowed to propagate into
/// the intake loop.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessingError {
    pub message: String,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The capability a deployment plugs its business logic into. Implementations
/// may await I/O for arbitrarily long; the pipelines tolerate per-task
/// latency without blocking unrelated work.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Stable name the processor is resolved by, also stamped on outcomes.
    fn name(&self) -> &'static str;

    async fn process(&self, task: &Task) -> Result<Value, ProcessingError>;
}

/// Returns the task payload unchanged. The default processor, useful for
/// wiring checks and as a template for real implementations.
pub struct EchoProcessor;

#[async_trait]
impl TaskProcessor for EchoProcessor {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn process(&self, task: &Task) -> Result<Value, ProcessingError> {
        Ok(Value::Object(task.payload.clone()))
    }
}

/// The closed set of processors a deployment can select from by name.
/// Resolution happens once at startup; there is no runtime code loading.
pub struct ProcessorRegistry {
    processors: HashMap<&'static str, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoProcessor));
        registry
    }

    /// Registers a processor under its own name. The last registration for
    /// a name wins.
    pub fn register(&mut self, processor: Arc<dyn TaskProcessor>) {
        self.processors.insert(processor.name(), processor);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn TaskProcessor>> {
        self.processors.get(name).cloned()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SourceMetadata;
    use chrono::Utc;
    use serde_json::json;

    fn task(payload: Value) -> Task {
        Task {
            task_id: "t1".to_string(),
            payload: payload.as_object().cloned().unwrap_or_default(),
            priority: Some(1),
            source: SourceMetadata {
                topic: "task-requests".to_string(),
                partition: 0,
                offset: 0,
                timestamp: None,
                received_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn echo_returns_the_payload() {
        let result = EchoProcessor
            .process(&task(json!({"x": 1})))
            .await
            .expect("echo cannot fail");
        assert_eq!(result, json!({"x": 1}));
    }

    #[test]
    fn registry_resolves_builtins_by_name() {
        let registry = ProcessorRegistry::with_builtins();
        let processor = registry.resolve("echo").expect("echo is built in");
        assert_eq!(processor.name(), "echo");
        assert!(registry.resolve("no-such-processor").is_none());
    }

    #[tokio::test]
    async fn later_registration_wins() {
        struct OtherEcho;

        #[async_trait]
        impl TaskProcessor for OtherEcho {
            fn name(&self) -> &'static str {
                "echo"
            }

            async fn process(&self, _: &Task) -> Result<Value, ProcessingError> {
                Ok(json!("other"))
            }
        }

        let mut registry = ProcessorRegistry::with_builtins();
        registry.register(Arc::new(OtherEcho));
        let resolved = registry.resolve("echo").expect("echo is registered");
        let result = resolved
            .process(&task(json!({})))
            .await
            .expect("processor cannot fail");
        assert_eq!(result, json!("other"));
    }
}
