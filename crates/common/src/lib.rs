pub mod dedup;
pub mod envelope;
pub mod errors;
pub mod runner;

// Re-export the core types that other crates will use
pub use dedup::{DedupStore, MemoryDedupStore, RedisDedupStore};
pub use envelope::{CommandEnvelope, ResponseEnvelope, ResponseStatus};
pub use errors::ProcessingError;
pub use runner::{
    RetryClassifier, RunnerError, WorkflowRunner, fatal_only_classifier, hint_classifier,
};
