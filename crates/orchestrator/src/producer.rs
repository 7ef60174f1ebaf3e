use crate::config::OrchestratorConfig;
use async_trait::async_trait;
use common::ProcessingError;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const PUBLISH_MAX_ATTEMPTS: u32 = 5;
const PUBLISH_BACKOFF_BASE_MS: u64 = 200;
const PUBLISH_BACKOFF_MAX_MS: u64 = 5_000;

/// Seam between the dispatcher and Kafka so tests can record publishes
/// instead of talking to a broker.
#[async_trait]
pub trait ResponsePublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), ProcessingError>;
}

/// Publishes response envelopes to per-message topics.
///
/// One instance is shared by every worker; the underlying rdkafka producer
/// is thread-safe and batches across topics on its own. The topic comes from
/// each call, which is what makes per-message reply routing work.
pub struct ResponseProducer {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl ResponseProducer {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, ProcessingError> {
        info!("🔧 Initializing Kafka producer for {}", config.brokers);

        let producer: FutureProducer = ClientConfig::new()
            // Basic connection settings
            .set("bootstrap.servers", &config.brokers)

            // Reliability settings - these ensure messages are safely delivered
            .set("acks", "all")  // Wait for all replicas to acknowledge
            .set("enable.idempotence", "true")  // Prevent duplicate messages
            .set("retries", "10")  // Retry failed sends up to 10 times
            .set("retry.backoff.ms", "1000")  // Wait 1 second between retries

            // Performance optimization settings
            .set("compression.type", "zstd")  // Compress messages to save bandwidth
            .set("batch.size", "65536")  // Batch up to 64KB of messages
            .set("linger.ms", "5")  // Wait up to 5ms to batch messages
            .set("queue.buffering.max.kbytes", "32768")  // 32MB buffer

            // Keyed messages spread across partitions per topic
            .set("partitioner", "consistent_random")

            .create()
            .map_err(|e| ProcessingError::ProducerError(format!("failed to create producer: {}", e)))?;

        Ok(Self {
            producer,
            // The per-send delivery budget; the retry loop adds backoff on top.
            delivery_timeout: Duration::from_secs(5),
        })
    }

    /// Flush any pending messages and wait for delivery.
    ///
    /// Called once during shutdown, after the workers have drained, so that
    /// DLQ entries for timed-out or canceled jobs still make it out.
    pub async fn flush(&self) -> Result<(), ProcessingError> {
        info!("🔄 Flushing Kafka producer");

        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(Duration::from_secs(10)));

        match tokio::time::timeout(Duration::from_secs(30), flushed).await {
            Ok(Ok(Ok(()))) => {
                info!("✅ All pending messages flushed");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(ProcessingError::ProducerError(format!(
                "failed to flush: {}",
                e
            ))),
            Ok(Err(e)) => Err(ProcessingError::ProducerError(format!(
                "flush task failed: {}",
                e
            ))),
            Err(_) => Err(ProcessingError::ProducerError(
                "flush timed out".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ResponsePublisher for ResponseProducer {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), ProcessingError> {
        let mut attempt = 0u32;
        loop {
            let record = FutureRecord::to(topic).key(key).payload(payload);
            match self
                .producer
                .send(record, Timeout::After(self.delivery_timeout))
                .await
            {
                Ok(_) => {
                    debug!("📤 Published response to {} (key={})", topic, key);
                    return Ok(());
                }
                Err((kafka_error, _)) => {
                    attempt += 1;
                    if attempt >= PUBLISH_MAX_ATTEMPTS {
                        error!(
                            "❌ Publish to {} failed after {} attempts: {}",
                            topic, attempt, kafka_error
                        );
                        return Err(ProcessingError::ProducerError(format!(
                            "publish to {} failed after {} attempts: {}",
                            topic, attempt, kafka_error
                        )));
                    }

                    let backoff = backoff_ms(attempt - 1);
                    warn!(
                        "🔁 Publish to {} failed (attempt {}), retrying in {}ms: {}",
                        topic, attempt, backoff, kafka_error
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }
}

fn backoff_ms(attempt: u32) -> u64 {
    let shifted = PUBLISH_BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
    shifted.min(PUBLISH_BACKOFF_MAX_MS)
}
