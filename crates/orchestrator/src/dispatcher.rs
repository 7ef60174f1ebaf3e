use crate::config::OrchestratorConfig;
use crate::producer::ResponsePublisher;
use crate::ticket::JobTicket;
use common::{
    CommandEnvelope, DedupStore, ProcessingError, ResponseEnvelope, ResponseStatus,
    RetryClassifier, RunnerError, WorkflowRunner, fatal_only_classifier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Terminal classification of one runner invocation.
enum Outcome {
    Succeeded(String),
    Failed(RunnerError),
    TimedOut,
    Canceled,
}

/// Drives one message end-to-end: decode, dedupe, execute, classify,
/// publish, complete.
///
/// This is the single place where errors become response envelopes. Every
/// ticket that enters `dispatch` leaves with exactly one terminal outcome
/// and one completion signal.
pub struct Dispatcher {
    runner: Arc<dyn WorkflowRunner>,
    dedup: Arc<dyn DedupStore>,
    publisher: Arc<dyn ResponsePublisher>,
    dlq_topic: String,
    workflow_timeout: Duration,
    dedup_ttl: Duration,
    classify_retryable: RetryClassifier,
    /// Opt-in: hold the offset back on retryable errors so the broker
    /// redelivers. Off by default to keep poisoned commands from looping.
    redeliver_retryable: bool,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        config: &OrchestratorConfig,
        runner: Arc<dyn WorkflowRunner>,
        dedup: Arc<dyn DedupStore>,
        publisher: Arc<dyn ResponsePublisher>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            runner,
            dedup,
            publisher,
            dlq_topic: config.dlq_topic.clone(),
            workflow_timeout: config.workflow_timeout,
            dedup_ttl: config.dedup_ttl,
            classify_retryable: fatal_only_classifier(),
            redeliver_retryable: false,
            shutdown,
        }
    }

    pub fn with_retry_classifier(mut self, classifier: RetryClassifier, redeliver: bool) -> Self {
        self.classify_retryable = classifier;
        self.redeliver_retryable = redeliver;
        self
    }

    pub async fn dispatch(&self, ticket: JobTicket) {
        let partition = ticket.partition;
        let offset = ticket.offset;

        // A malformed envelope goes straight to the DLQ as rejected, keyed
        // by the Kafka key or a synthetic id. No runner call.
        let command = match ticket
            .payload
            .as_deref()
            .ok_or_else(|| ProcessingError::MalformedEnvelope("empty payload".to_string()))
            .and_then(CommandEnvelope::decode)
        {
            Ok(command) => command,
            Err(e) => {
                let key = ticket.message_key();
                warn!(
                    "❗ Rejecting message at {}:{} ({}): {}",
                    partition, offset, key, e
                );
                let response =
                    ResponseEnvelope::failure(key.clone(), "", ResponseStatus::Rejected, e.to_string(), 0);
                self.publish(&self.dlq_topic, &key, &response).await;
                ticket.completion.resolve(true);
                return;
            }
        };

        if ticket.has_synthetic_key() {
            debug!(
                "🔖 Message at {}:{} arrived unkeyed, correlation_id={}",
                partition, offset, command.correlation_id
            );
        }

        // Dedup claim. Losing the claim means a prior invocation owns this
        // correlation_id; we complete without executing or responding.
        // A store error fails open: duplicates are acceptable, missed work
        // is not.
        match self.dedup.claim(&command.correlation_id, self.dedup_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    "🔁 Duplicate suppressed: correlation_id={} ({}:{})",
                    command.correlation_id, partition, offset
                );
                ticket.completion.resolve(true);
                return;
            }
            Err(e) => {
                warn!(
                    "⚠️ Dedup store unavailable, proceeding without claim: {}",
                    e.with_message_context(partition, offset)
                );
            }
        }

        // Execute with the per-message budget. The runner future is
        // dropped at the deadline, so a runner that ignores cancellation
        // still frees the worker slot on time. Shutdown cancels the same
        // way: tickets still in flight (or drained from the queue after the
        // signal) are cut short, dead-lettered, and their offsets held back.
        let mut shutdown = self.shutdown.clone();
        let started = tokio::time::Instant::now();
        let outcome = if *shutdown.borrow_and_update() {
            Outcome::Canceled
        } else {
            tokio::select! {
                _ = shutdown.changed() => Outcome::Canceled,
                result = tokio::time::timeout(
                    self.workflow_timeout,
                    self.runner.execute(&command.workflow, &command.attrs),
                ) => match result {
                    Ok(Ok(output)) => Outcome::Succeeded(output),
                    Ok(Err(e)) => Outcome::Failed(e),
                    Err(_) => Outcome::TimedOut,
                }
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        // Classify the outcome and publish the response envelope.
        let commit = match outcome {
            Outcome::Succeeded(output) => {
                debug!(
                    "✅ Workflow succeeded: correlation_id={} duration_ms={}",
                    command.correlation_id, duration_ms
                );
                if command.reply_topic.is_empty() {
                    // Fire-and-forget mode: success without a reply topic
                    // publishes nothing.
                    debug!(
                        "📭 No reply topic for correlation_id={}, skipping publish",
                        command.correlation_id
                    );
                } else {
                    let response = ResponseEnvelope::success(
                        command.correlation_id.clone(),
                        command.workflow.clone(),
                        output,
                        duration_ms,
                    );
                    self.publish(&command.reply_topic, &command.correlation_id, &response)
                        .await;
                }
                true
            }
            Outcome::TimedOut => {
                warn!(
                    "⏰ Workflow timed out: correlation_id={} after {}ms",
                    command.correlation_id, duration_ms
                );
                let response = ResponseEnvelope::failure(
                    command.correlation_id.clone(),
                    command.workflow.clone(),
                    ResponseStatus::Timeout,
                    format!(
                        "workflow did not finish within {}ms",
                        self.workflow_timeout.as_millis()
                    ),
                    duration_ms,
                );
                self.publish(&self.dlq_topic, &command.correlation_id, &response)
                    .await;
                true
            }
            Outcome::Canceled => {
                warn!(
                    "🛑 Workflow canceled by shutdown: correlation_id={} ({}:{})",
                    command.correlation_id, partition, offset
                );
                let response = ResponseEnvelope::failure(
                    command.correlation_id.clone(),
                    command.workflow.clone(),
                    ResponseStatus::Error,
                    "canceled by shutdown before completion",
                    duration_ms,
                );
                self.publish(&self.dlq_topic, &command.correlation_id, &response)
                    .await;
                // Hold the offset back: the broker redelivers on next start
                // and the dedup claim guards against double execution.
                false
            }
            Outcome::Failed(e) => {
                error!(
                    "❌ Workflow failed: correlation_id={}: {}",
                    command.correlation_id, e
                );
                let response = ResponseEnvelope::failure(
                    command.correlation_id.clone(),
                    command.workflow.clone(),
                    ResponseStatus::Error,
                    e.to_string(),
                    duration_ms,
                );
                self.publish(&self.dlq_topic, &command.correlation_id, &response)
                    .await;

                let retryable = (self.classify_retryable)(&e);
                if retryable && self.redeliver_retryable {
                    info!(
                        "🔂 Holding offset for redelivery: correlation_id={}",
                        command.correlation_id
                    );
                    false
                } else {
                    true
                }
            }
        };

        // Complete: the offset becomes eligible for commit (or is held).
        ticket.completion.resolve(commit);
    }

    /// Encode and publish one response. Failures are logged with their
    /// correlation context and never block ticket completion.
    async fn publish(&self, topic: &str, key: &str, response: &ResponseEnvelope) {
        let payload = match response.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    "❌ Failed to encode response for correlation_id={}: {}",
                    response.correlation_id, e
                );
                return;
            }
        };

        if let Err(e) = self.publisher.publish(topic, key, &payload).await {
            error!(
                "❌ Failed to publish {} response for correlation_id={} to {}: {}",
                response.status.as_str(),
                response.correlation_id,
                topic,
                e
            );
        }
    }
}
