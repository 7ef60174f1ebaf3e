use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to serialize message: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Kafka producer error: {0}")]
    ProducerError(String),

    #[error("Kafka consumer error: {0}")]
    ConsumerError(String),

    #[error("Kafka admin error: {0}")]
    AdminError(String),

    #[error("Dedup store error: {0}")]
    DedupError(String),

    #[error("Workflow execution timed out after {0} ms")]
    WorkflowTimeout(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProcessingError {
    /// Attach partition/offset context to the transport error kinds without
    /// changing the kind itself.
    pub fn with_message_context(self, partition: i32, offset: i64) -> Self {
        match self {
            ProcessingError::ProducerError(msg) => ProcessingError::ProducerError(format!(
                "{} (partition={}, offset={})",
                msg, partition, offset
            )),
            ProcessingError::ConsumerError(msg) => ProcessingError::ConsumerError(format!(
                "{} (partition={}, offset={})",
                msg, partition, offset
            )),
            ProcessingError::DedupError(msg) => ProcessingError::DedupError(format!(
                "{} (partition={}, offset={})",
                msg, partition, offset
            )),
            other => other,
        }
    }
}
