use crate::config::OrchestratorConfig;
use common::ProcessingError;
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    config::ClientConfig,
    consumer::{BaseConsumer, Consumer},
    types::RDKafkaErrorCode,
};
use tracing::{error, info};

/// Startup bootstrap: confirm the cluster answers, then make sure the
/// commands, responses, and DLQ topics exist.
///
/// Existing topics are left untouched; a partition or replication mismatch
/// on an existing topic is not reconciled and not an error. Any other
/// failure here is fatal to startup.
pub async fn bootstrap_topics(config: &OrchestratorConfig) -> Result<(), ProcessingError> {
    check_brokers(config).await?;
    ensure_topics(config).await
}

/// Fetch cluster metadata within the configured check timeout. rdkafka's
/// metadata call is blocking, so it runs on the blocking pool the same way
/// the producer flush does.
async fn check_brokers(config: &OrchestratorConfig) -> Result<(), ProcessingError> {
    info!("🔎 Checking broker reachability: {}", config.brokers);

    let probe: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .create()
        .map_err(|e| ProcessingError::AdminError(format!("failed to create probe client: {}", e)))?;

    let timeout = config.broker_check_timeout;
    let metadata = tokio::task::spawn_blocking(move || probe.fetch_metadata(None, timeout))
        .await
        .map_err(|e| ProcessingError::AdminError(format!("broker check task failed: {}", e)))?;

    match metadata {
        Ok(metadata) => {
            info!(
                "✅ Cluster reachable ({} broker(s) reported)",
                metadata.brokers().len()
            );
            Ok(())
        }
        Err(e) => {
            error!("❌ No reachable brokers in {}: {}", config.brokers, e);
            Err(ProcessingError::AdminError(format!(
                "no reachable brokers: {}",
                e
            )))
        }
    }
}

async fn ensure_topics(config: &OrchestratorConfig) -> Result<(), ProcessingError> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .create()
        .map_err(|e| ProcessingError::AdminError(format!("failed to create admin client: {}", e)))?;

    let names = [
        config.commands_topic.as_str(),
        config.responses_topic.as_str(),
        config.dlq_topic.as_str(),
    ];
    let topics: Vec<NewTopic> = names
        .into_iter()
        .map(|name| {
            NewTopic::new(
                name,
                config.topic_partitions,
                TopicReplication::Fixed(config.topic_replication),
            )
        })
        .collect();

    let results = admin
        .create_topics(&topics, &AdminOptions::new())
        .await
        .map_err(|e| ProcessingError::AdminError(format!("create_topics failed: {}", e)))?;

    for result in results {
        match result {
            Ok(topic) => {
                info!("✅ Created topic {}", topic);
            }
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                info!("ℹ️ Topic {} already exists", topic);
            }
            Err((topic, code)) => {
                return Err(ProcessingError::AdminError(format!(
                    "failed to create topic {}: {}",
                    topic, code
                )));
            }
        }
    }

    Ok(())
}
