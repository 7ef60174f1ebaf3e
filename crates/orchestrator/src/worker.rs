use crate::dispatcher::Dispatcher;
use crate::ticket::JobTicket;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Bounded pool of long-lived workers.
///
/// All workers read from the single job queue the consumer loop feeds; the
/// queue capacity equals the worker count, so a saturated pool pushes back
/// on the consumer rather than buffering unbounded work. Workers exit when
/// the queue is closed and drained.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        worker_count: usize,
        queue: mpsc::Receiver<JobTicket>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        info!("🔧 Starting worker pool with {} workers", worker_count);

        let queue = Arc::new(Mutex::new(queue));
        let handles = (0..worker_count)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    info!("👷 Worker {} started", worker_id);
                    loop {
                        // The receiver lock is held only for the handoff;
                        // dispatch runs with the queue free for the others.
                        let ticket = { queue.lock().await.recv().await };
                        match ticket {
                            Some(ticket) => dispatcher.dispatch(ticket).await,
                            None => break,
                        }
                    }
                    info!("👷 Worker {} shutting down", worker_id);
                })
            })
            .collect();

        Self { handles }
    }

    /// Wait for every worker to drain, bounded by the shutdown grace
    /// deadline. Stragglers are aborted; their tickets report hold-back
    /// through the completion drop guard.
    pub async fn join(self, grace: Duration) {
        let abort_handles: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();

        if tokio::time::timeout(grace, join_all(self.handles))
            .await
            .is_err()
        {
            warn!(
                "⚠️ Workers did not drain within {:?}, aborting stragglers",
                grace
            );
            for handle in abort_handles {
                handle.abort();
            }
        } else {
            info!("✅ All workers drained");
        }
    }
}
