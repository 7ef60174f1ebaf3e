pub mod admin;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod producer;
pub mod ticket;
pub mod worker;

pub use config::OrchestratorConfig;
pub use dispatcher::Dispatcher;

use common::{DedupStore, ProcessingError, RedisDedupStore, WorkflowRunner};
use consumer::{CommandConsumer, run_committer};
use producer::{ResponsePublisher, ResponseProducer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use worker::WorkerPool;

/// Flips the shutdown signal every component listens on. Handed out by
/// `Orchestrator::new` so a signal handler (or test) can stop the pipeline
/// without owning it.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn stop(&self) {
        info!("🛑 Shutdown requested");
        let _ = self.tx.send(true);
    }
}

/// The assembled pipeline: consumer loop, committer, worker pool,
/// dispatcher, producer, dedup store.
///
/// Construction performs the fatal startup work (broker check, topic
/// bootstrap, dedup store connection); `run` drives the pipeline until the
/// shutdown trigger fires, then drains it in order: stop intake, close the
/// queue, join workers, flush the producer, final offset commit, close the
/// dedup store.
pub struct Orchestrator {
    config: OrchestratorConfig,
    runner: Arc<dyn WorkflowRunner>,
    dedup: Arc<dyn DedupStore>,
    producer: Arc<ResponseProducer>,
    consumer: CommandConsumer,
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    pub async fn new(
        config: OrchestratorConfig,
        runner: Arc<dyn WorkflowRunner>,
    ) -> Result<(Self, ShutdownTrigger), ProcessingError> {
        admin::bootstrap_topics(&config).await?;

        let dedup: Arc<dyn DedupStore> =
            Arc::new(RedisDedupStore::connect(&config.dedup_store_addr).await?);
        let producer = Arc::new(ResponseProducer::new(&config)?);
        let consumer = CommandConsumer::new(&config)?;

        let (tx, rx) = watch::channel(false);

        Ok((
            Self {
                config,
                runner,
                dedup,
                producer,
                consumer,
                shutdown: rx,
            },
            ShutdownTrigger { tx },
        ))
    }

    pub async fn run(self) -> Result<(), ProcessingError> {
        let Self {
            config,
            runner,
            dedup,
            producer,
            consumer,
            shutdown,
        } = self;

        // Queue capacity equals the worker count: with every worker busy and
        // the queue full, the consumer loop blocks instead of fetching ahead.
        let (queue_tx, queue_rx) = mpsc::channel(config.worker_count);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let committer = tokio::spawn(run_committer(
            consumer.shared(),
            consumer.topic().to_string(),
            event_rx,
        ));

        let publisher: Arc<dyn ResponsePublisher> = producer.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            &config,
            runner,
            Arc::clone(&dedup),
            publisher,
            shutdown.clone(),
        ));
        let pool = WorkerPool::start(config.worker_count, queue_rx, dispatcher);

        info!(
            "🚀 Orchestrator running: {} worker(s), workflow timeout {:?}",
            config.worker_count, config.workflow_timeout
        );

        // Blocks until shutdown; dropping queue_tx afterwards closes the
        // worker queue so the pool drains and exits.
        consumer.run(queue_tx, event_tx, shutdown.clone()).await?;

        pool.join(config.shutdown_grace()).await;

        if let Err(e) = producer.flush().await {
            error!("❌ Producer flush during shutdown failed: {}", e);
        }

        // With the consumer loop and all tickets gone, the committer's event
        // channel closes and it performs the final synchronous commit.
        if tokio::time::timeout(Duration::from_secs(10), committer)
            .await
            .is_err()
        {
            warn!("⚠️ Committer did not finish its final commit in time");
        }

        dedup.close().await;
        info!("✅ Orchestrator shut down cleanly");
        Ok(())
    }
}
