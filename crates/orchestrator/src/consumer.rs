use crate::config::OrchestratorConfig;
use crate::ticket::{Completion, JobTicket, TrackerEvent};
use common::ProcessingError;
use rdkafka::{
    Message, Offset, TopicPartitionList,
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Single-threaded fetcher for the commands topic.
///
/// The loop owns the only Kafka consumer connection. It fetches one message
/// at a time, registers it with the committer, and hands it to the worker
/// pool through a bounded queue. A full queue blocks the loop - that is the
/// intended backpressure against the broker.
pub struct CommandConsumer {
    consumer: Arc<StreamConsumer>,
    commands_topic: String,
}

impl CommandConsumer {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, ProcessingError> {
        debug!("🔧 Initializing Kafka consumer for group {}", config.group_id);

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)

            // Offset management ~ offsets are committed by the committer only
            // after the corresponding ticket completes
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")

            // Session and heartbeat settings - these control failure detection
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")

            // Processing settings
            .set("max.poll.interval.ms", "300000")
            .set("fetch.min.bytes", "1")  // Don't wait for large batches
            .set("fetch.wait.max.ms", "500")

            .create()
            .map_err(|e| {
                ProcessingError::ConsumerError(format!("failed to create consumer: {}", e))
            })?;

        consumer.subscribe(&[&config.commands_topic]).map_err(|e| {
            ProcessingError::ConsumerError(format!(
                "failed to subscribe to {}: {}",
                config.commands_topic, e
            ))
        })?;

        info!(
            "🔧 Kafka consumer subscribed to topic: {}",
            config.commands_topic
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            commands_topic: config.commands_topic.clone(),
        })
    }

    /// Shared handle for the committer task.
    pub fn shared(&self) -> Arc<StreamConsumer> {
        Arc::clone(&self.consumer)
    }

    pub fn topic(&self) -> &str {
        &self.commands_topic
    }

    /// Fetch until shutdown. Every fetched message becomes a ticket that is
    /// registered with the committer before it is enqueued, so completion
    /// events always find their partition state.
    pub async fn run(
        &self,
        queue: mpsc::Sender<JobTicket>,
        events: mpsc::UnboundedSender<TrackerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ProcessingError> {
        info!("🔄 Consumer loop started for topic {}", self.commands_topic);

        loop {
            let message = tokio::select! {
                _ = shutdown.changed() => {
                    info!("🛑 Shutdown signal received, consumer stops fetching");
                    break;
                }
                result = self.consumer.recv() => match result {
                    Ok(message) => message,
                    Err(e) => {
                        error!("❌ Error receiving message: {}", e);
                        // Avoid a tight loop on persistent fetch errors
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                        continue;
                    }
                }
            };

            let partition = message.partition();
            let offset = message.offset();
            debug!(
                "📥 Fetched {}:{}@{}",
                self.commands_topic, partition, offset
            );

            let _ = events.send(TrackerEvent::Registered { partition, offset });
            let ticket = JobTicket {
                partition,
                offset,
                key: message.key().map(|k| k.to_vec()),
                payload: message.payload().map(|p| p.to_vec()),
                received_at: tokio::time::Instant::now(),
                completion: Completion::new(partition, offset, events.clone()),
            };

            tokio::select! {
                sent = queue.send(ticket) => {
                    if sent.is_err() {
                        error!("❌ Worker queue closed unexpectedly, consumer stops");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    // The un-enqueued ticket is dropped here; its completion
                    // reports hold-back so the message is redelivered.
                    info!("🛑 Shutdown while waiting for a worker slot");
                    break;
                }
            }
        }

        info!("🏁 Consumer loop ended for topic {}", self.commands_topic);
        Ok(())
    }
}

/// Drains tracker events and commits offsets.
///
/// Commits advance to the highest contiguous completed offset per partition,
/// in receive order. The committed value is `offset + 1` so a restarted
/// consumer resumes after the last processed message instead of repeating
/// it. A held-back ticket (shutdown cancellation) freezes its partition:
/// nothing at or past that offset is committed, and the broker redelivers
/// from there on the next start.
pub async fn run_committer(
    consumer: Arc<StreamConsumer>,
    topic: String,
    mut events: mpsc::UnboundedReceiver<TrackerEvent>,
) {
    let mut tracker = CommitTracker::default();

    while let Some(event) = events.recv().await {
        match event {
            TrackerEvent::Registered { partition, offset } => {
                tracker.register(partition, offset);
            }
            TrackerEvent::Completed {
                partition,
                offset,
                commit,
            } => {
                if let Some(position) = tracker.complete(partition, offset, commit) {
                    commit_position(&consumer, &topic, partition, position, CommitMode::Async);
                }
            }
        }
    }

    // Every sender is gone: all tickets are terminal. Re-commit the final
    // positions synchronously so nothing is lost to an async commit in flight.
    for (partition, position) in tracker.positions() {
        commit_position(&consumer, &topic, partition, position, CommitMode::Sync);
    }
    debug!("Committer drained for topic {}", topic);
}

fn commit_position(
    consumer: &StreamConsumer,
    topic: &str,
    partition: i32,
    position: i64,
    mode: CommitMode,
) {
    let mut list = TopicPartitionList::new();
    if let Err(e) = list.add_partition_offset(topic, partition, Offset::Offset(position)) {
        error!("❌ Failed to build commit list for {}:{}: {}", topic, partition, e);
        return;
    }
    if let Err(e) = consumer.commit(&list, mode) {
        warn!(
            "⚠️ Stuck trying to commit {}:{}:{}: {}",
            topic,
            partition,
            position - 1,
            e
        );
    } else {
        debug!("✔ Committed {}:{} up to {}", topic, partition, position);
    }
}

/// Pure per-partition commit bookkeeping, kept free of Kafka so it can be
/// tested directly.
#[derive(Default)]
pub struct CommitTracker {
    partitions: HashMap<i32, PartitionProgress>,
}

#[derive(Default)]
struct PartitionProgress {
    /// Offsets in receive order, not yet drained.
    pending: VecDeque<i64>,
    /// Terminal outcomes waiting for their turn at the front.
    resolved: HashMap<i64, bool>,
    /// Last commit position handed out (`offset + 1`).
    committable: Option<i64>,
    /// A hold-back was reached; commits never advance past it.
    held: bool,
}

impl CommitTracker {
    pub fn register(&mut self, partition: i32, offset: i64) {
        self.partitions
            .entry(partition)
            .or_default()
            .pending
            .push_back(offset);
    }

    /// Record a terminal outcome. Returns the new commit position when the
    /// contiguous frontier advanced, `None` otherwise.
    pub fn complete(&mut self, partition: i32, offset: i64, commit: bool) -> Option<i64> {
        let progress = self.partitions.entry(partition).or_default();
        if progress.held {
            return None;
        }
        progress.resolved.insert(offset, commit);

        let mut advanced = None;
        while let Some(&front) = progress.pending.front() {
            match progress.resolved.remove(&front) {
                Some(true) => {
                    progress.pending.pop_front();
                    advanced = Some(front + 1);
                }
                Some(false) => {
                    progress.held = true;
                    break;
                }
                None => break,
            }
        }

        if let Some(position) = advanced {
            progress.committable = Some(position);
        }
        advanced
    }

    /// Final commit positions for every partition that made progress.
    pub fn positions(&self) -> Vec<(i32, i64)> {
        self.partitions
            .iter()
            .filter_map(|(partition, progress)| {
                progress.committable.map(|position| (*partition, position))
            })
            .collect()
    }
}
