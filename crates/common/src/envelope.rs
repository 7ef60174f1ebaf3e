use crate::errors::ProcessingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inbound workflow-invocation command.
///
/// Arrives as the JSON value of a message on the commands topic. Only
/// `correlation_id` is mandatory; an empty `workflow` means the runner picks
/// one via intent detection, and an empty `reply_topic` disables success
/// publishing (fire-and-forget mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub correlation_id: String,

    #[serde(default)]
    pub workflow: String,

    #[serde(default)]
    pub reply_topic: String,

    /// Free-form workflow inputs, passed to the runner untouched.
    #[serde(default)]
    pub attrs: HashMap<String, serde_json::Value>,
}

impl CommandEnvelope {
    /// Decode a raw Kafka payload into a validated command.
    ///
    /// Rejects both unparseable JSON and envelopes missing a non-empty
    /// `correlation_id`; the dispatcher turns either into a DLQ entry with
    /// `status=rejected` without ever invoking the runner.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProcessingError> {
        let envelope: CommandEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| ProcessingError::MalformedEnvelope(format!("invalid JSON: {}", e)))?;

        if envelope.correlation_id.is_empty() {
            return Err(ProcessingError::MalformedEnvelope(
                "correlation_id must be a non-empty string".to_string(),
            ));
        }

        Ok(envelope)
    }
}

/// Terminal outcome of a command, as published to reply and DLQ topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
    Timeout,
    Rejected,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Ok => "ok",
            ResponseStatus::Error => "error",
            ResponseStatus::Timeout => "timeout",
            ResponseStatus::Rejected => "rejected",
        }
    }
}

/// Outbound response envelope.
///
/// `result` is present iff `status == ok`; `error` is present iff the status
/// is anything else. `correlation_id` and `status` are always serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub correlation_id: String,
    pub status: ResponseStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Echoed from the command (may be empty when the runner chose).
    #[serde(default)]
    pub workflow: String,

    pub produced_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ResponseEnvelope {
    pub fn success(
        correlation_id: impl Into<String>,
        workflow: impl Into<String>,
        result: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Ok,
            result: Some(result.into()),
            error: None,
            workflow: workflow.into(),
            produced_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn failure(
        correlation_id: impl Into<String>,
        workflow: impl Into<String>,
        status: ResponseStatus,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status,
            result: None,
            error: Some(error.into()),
            workflow: workflow.into(),
            produced_at: Utc::now(),
            duration_ms,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProcessingError> {
        Ok(serde_json::to_vec(self)?)
    }
}
