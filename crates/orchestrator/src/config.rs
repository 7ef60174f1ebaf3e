use common::ProcessingError;
use std::time::Duration;

/// Runtime configuration for the orchestrator service.
///
/// Values come from environment variables (a `.env` file is loaded first,
/// but real environment variables win). Required variables produce a
/// `ConfigError` when missing so startup can fail fast with a non-zero exit.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Comma-separated Kafka broker addresses.
    pub brokers: String,

    pub commands_topic: String,
    pub responses_topic: String,
    /// Derived: `<responses_topic>.dlq`.
    pub dlq_topic: String,

    pub group_id: String,

    /// Number of parallel workers; also the job queue capacity.
    pub worker_count: usize,

    /// Per-message execution budget for the runner.
    pub workflow_timeout: Duration,

    /// Dedup claim TTL; defaults to the workflow timeout.
    pub dedup_ttl: Duration,

    pub dedup_store_addr: String,

    pub broker_check_timeout: Duration,

    pub topic_partitions: i32,
    pub topic_replication: i32,
}

impl OrchestratorConfig {
    /// Expected environment variables:
    /// - KAFKA_BROKERS: comma-separated broker list (required)
    /// - KAFKA_COMMANDS_TOPIC / KAFKA_RESPONSES_TOPIC: topic names (required)
    /// - KAFKA_GROUP_ID: consumer group (default: "orchestrator")
    /// - WORKER_COUNT: parallel workers (default: 4)
    /// - DEFAULT_WORKFLOW_TIMEOUT: per-message budget (default: 10m)
    /// - DEDUPE_TTL: dedup window (default: the workflow timeout)
    /// - DEDUPE_STORE_ADDR: KV store address (default: redis://127.0.0.1:6379)
    /// - BROKER_CHECK_TIMEOUT: startup reachability budget (default: 3s)
    /// - TOPIC_CREATE_PARTITIONS / TOPIC_CREATE_REPLICATION: defaults 1 / 1
    pub fn from_env() -> Result<Self, ProcessingError> {
        dotenv::dotenv().ok();

        let brokers = require("KAFKA_BROKERS")?;
        let commands_topic = require("KAFKA_COMMANDS_TOPIC")?;
        let responses_topic = require("KAFKA_RESPONSES_TOPIC")?;
        let dlq_topic = format!("{}.dlq", responses_topic);

        let group_id =
            std::env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "orchestrator".to_string());

        let worker_count: usize = std::env::var("WORKER_COUNT")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .map_err(|_| {
                ProcessingError::ConfigError("WORKER_COUNT must be a valid number".to_string())
            })?;
        if worker_count == 0 {
            return Err(ProcessingError::ConfigError(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }

        let workflow_timeout = duration_var("DEFAULT_WORKFLOW_TIMEOUT", "10m")?;
        let dedup_ttl = match std::env::var("DEDUPE_TTL") {
            Ok(raw) => parse_duration("DEDUPE_TTL", &raw)?,
            Err(_) => workflow_timeout,
        };

        let dedup_store_addr = std::env::var("DEDUPE_STORE_ADDR")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let broker_check_timeout = duration_var("BROKER_CHECK_TIMEOUT", "3s")?;

        let topic_partitions = int_var("TOPIC_CREATE_PARTITIONS", 1)?;
        let topic_replication = int_var("TOPIC_CREATE_REPLICATION", 1)?;

        Ok(Self {
            brokers,
            commands_topic,
            responses_topic,
            dlq_topic,
            group_id,
            worker_count,
            workflow_timeout,
            dedup_ttl,
            dedup_store_addr,
            broker_check_timeout,
            topic_partitions,
            topic_replication,
        })
    }

    pub fn broker_list(&self) -> Vec<&str> {
        self.brokers.split(',').map(|s| s.trim()).collect()
    }

    /// How long shutdown waits for in-flight workers before giving up.
    pub fn shutdown_grace(&self) -> Duration {
        self.workflow_timeout
    }
}

fn require(name: &str) -> Result<String, ProcessingError> {
    std::env::var(name)
        .map_err(|_| ProcessingError::ConfigError(format!("{} must be set", name)))
        .and_then(|value| {
            if value.trim().is_empty() {
                Err(ProcessingError::ConfigError(format!(
                    "{} must not be empty",
                    name
                )))
            } else {
                Ok(value)
            }
        })
}

fn int_var(name: &str, default: i32) -> Result<i32, ProcessingError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ProcessingError::ConfigError(format!("{} must be a valid number", name))),
        Err(_) => Ok(default),
    }
}

fn duration_var(name: &str, default: &str) -> Result<Duration, ProcessingError> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    parse_duration(name, &raw)
}

/// Parse `500ms`, `30s`, `10m`, `1h`, or a bare integer (seconds).
fn parse_duration(name: &str, raw: &str) -> Result<Duration, ProcessingError> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };

    let value: u64 = digits.parse().map_err(|_| {
        ProcessingError::ConfigError(format!("{} must be a duration, got '{}'", name, raw))
    })?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(ProcessingError::ConfigError(format!(
            "{} has unknown duration unit '{}'",
            name, other
        ))),
    }
}
