use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The pluggable workflow execution engine.
///
/// The orchestrator treats the runner as a black box: it hands over the
/// workflow name (possibly empty, meaning "runner chooses via intent
/// detection") and the free-form attrs, and gets back either a result string
/// or an error. Implementations must be safe for concurrent calls and must
/// stop promptly when their future is dropped — the dispatcher enforces the
/// per-message timeout by dropping the call.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn execute(
        &self,
        workflow: &str,
        attrs: &HashMap<String, serde_json::Value>,
    ) -> Result<String, RunnerError>;
}

/// Error returned by a workflow runner.
///
/// `retryable` is a hint for the dispatcher's classification predicate; the
/// default classifier ignores it and treats every runner error as fatal.
#[derive(Debug, Clone)]
pub struct RunnerError {
    pub message: String,
    pub retryable: bool,
}

impl RunnerError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RunnerError {}

/// Predicate deciding whether a runner error is worth a broker redelivery.
pub type RetryClassifier = Arc<dyn Fn(&RunnerError) -> bool + Send + Sync>;

/// Default classification: every runner error is fatal. Redelivery-based
/// retry is opt-in to keep poisoned commands from looping forever.
pub fn fatal_only_classifier() -> RetryClassifier {
    Arc::new(|_| false)
}

/// Classifier that honors the runner's own retryable hint.
pub fn hint_classifier() -> RetryClassifier {
    Arc::new(|error| error.retryable)
}
