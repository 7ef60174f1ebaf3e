use crate::errors::ProcessingError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Set-if-absent claim store keyed by correlation ID.
///
/// `claim` returns `Ok(true)` when the caller now owns the key for `ttl`,
/// `Ok(false)` when another invocation already holds it, and `Err` only for
/// transport failures. The dispatcher decides what a transport failure means
/// (it fails open); the store never does.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, ProcessingError>;

    /// Release the underlying connections. Safe to call once at shutdown.
    async fn close(&self) {}
}

/// Redis-backed dedup store using `SET key value NX PX ttl_ms`.
///
/// The claim marker is a fresh UUID so operators inspecting the store can
/// tell claims apart; its value is otherwise irrelevant, only key presence
/// matters. A claim is visible to every worker and replica as soon as Redis
/// acks the SET.
pub struct RedisDedupStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisDedupStore {
    pub async fn connect(addr: &str) -> Result<Self, ProcessingError> {
        info!("🔧 Connecting dedup store at {}", addr);

        let client = redis::Client::open(addr)
            .map_err(|e| ProcessingError::DedupError(format!("invalid store address: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ProcessingError::DedupError(format!("failed to connect: {}", e)))?;

        info!("✅ Dedup store connected");
        Ok(Self {
            conn,
            key_prefix: "dedup:".to_string(),
        })
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, ProcessingError> {
        let marker = uuid::Uuid::new_v4().to_string();
        let prefixed = format!("{}{}", self.key_prefix, key);
        let ttl_ms = ttl.as_millis().max(1) as u64;

        // SET NX PX answers "OK" when the key was set and nil when it
        // already existed.
        let mut conn = self.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(&prefixed)
            .arg(&marker)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| ProcessingError::DedupError(format!("SET NX failed: {}", e)))?;

        let claimed = outcome.is_some();
        debug!("🔑 Dedup claim for {}: claimed={}", key, claimed);
        Ok(claimed)
    }

    async fn close(&self) {
        // ConnectionManager drops its pool when the last clone goes away.
        debug!("Dedup store closed");
    }
}

/// In-memory dedup store for tests and single-process local runs.
///
/// Uses the tokio clock so paused-time tests can drive TTL expiry.
#[derive(Default)]
pub struct MemoryDedupStore {
    claims: Arc<Mutex<HashMap<String, tokio::time::Instant>>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, ProcessingError> {
        let now = tokio::time::Instant::now();
        let mut claims = self.claims.lock().await;
        claims.retain(|_, expires_at| *expires_at > now);

        if claims.contains_key(key) {
            return Ok(false);
        }
        claims.insert(key.to_string(), now + ttl);
        Ok(true)
    }
}
