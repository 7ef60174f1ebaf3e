use anyhow::Result;
use async_trait::async_trait;
use common::{RunnerError, WorkflowRunner};
use orchestrator::{Orchestrator, OrchestratorConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

/// Echo runner wired in as a stand-in for the real workflow engine client.
///
/// This is a placeholder implementation. It should be replaced with the
/// client that forwards the command to the actual workflow engine; the
/// orchestrator only sees the `WorkflowRunner` trait either way.
struct EchoRunner;

#[async_trait]
impl WorkflowRunner for EchoRunner {
    async fn execute(
        &self,
        workflow: &str,
        attrs: &HashMap<String, serde_json::Value>,
    ) -> Result<String, RunnerError> {
        let input = attrs.get("q").and_then(|v| v.as_str()).unwrap_or_default();
        if workflow.is_empty() {
            // Empty workflow means "runner chooses"; the echo stand-in has
            // exactly one trick.
            Ok(format!("echo: {}", input))
        } else {
            Ok(format!("{}: {}", workflow, input))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new("orchestrator=info,common=info,rdkafka=info"),
        ))
        .init();

    let config = OrchestratorConfig::from_env()?;
    info!(
        "🔧 Starting orchestrator: brokers={}, commands={}, responses={}, dlq={}",
        config.brokers, config.commands_topic, config.responses_topic, config.dlq_topic
    );

    let (service, trigger) = Orchestrator::new(config, Arc::new(EchoRunner)).await?;

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        trigger.stop();
    });

    service.run().await?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    match signal(SignalKind::terminate()).ok() {
        Some(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("🔌 Received Ctrl+C, shutting down gracefully...");
                }
                _ = sigterm.recv() => {
                    info!("🔌 Received SIGTERM, shutting down gracefully...");
                }
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
            info!("🔌 Received Ctrl+C, shutting down gracefully...");
        }
    }
}
