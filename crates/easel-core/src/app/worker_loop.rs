//! WorkerGroup - N 本の polling ループ
//!
//! 各ループは独立に queue を poll する（水平スケールと同じ形）。
//! ループ間で共有するのは queue と外部 client だけで、ロックは持たない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::worker::FulfillmentWorker;

/// Back-off after a failed receive so a dead queue is not hammered.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub batch_size: usize,
    pub wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            wait: Duration::from_secs(2),
        }
    }
}

/// Worker group handle.
/// - `request_shutdown()` で新しい receive を止める（処理中の attempt は最後まで走る）
/// - `shutdown_and_join()` で全ループの終了を待つ
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn(n: usize, worker: Arc<FulfillmentWorker>, poll: PollSettings) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let w = Arc::clone(&worker);
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, w, poll, &mut rx).await;
            }));
        }
        info!(workers = n, "worker group started");

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    worker: Arc<FulfillmentWorker>,
    poll: PollSettings,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // receive は待つ可能性があるので shutdown と競合させる。
        // 受信後の attempt は shutdown が来ても最後まで走らせる
        let received = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            received = worker.receive(poll.batch_size, poll.wait) => received,
        };

        match received {
            Ok(deliveries) => {
                let received_at = Instant::now();
                for report in worker.process_batch(&deliveries, received_at).await {
                    debug!(
                        worker_id,
                        message_id = %report.message_id,
                        state = %report.state,
                        "attempt finished"
                    );
                }
            }
            Err(e) => {
                error!(worker_id, error = %e, "receive failed");
                tokio::select! {
                    _ = shutdown_rx.changed() => {},
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {},
                }
            }
        }
    }
    debug!(worker_id, "worker loop stopped");
}
