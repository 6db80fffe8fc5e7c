//! DispatchQueue port - 配送キュー（SQS または InMemory）
//!
//! at-least-once の FIFO 風キュー。受信した message は visibility timeout の間だけ
//! 他の consumer から見えなくなり、finalize されなければ再配送されます。
//!
//! # 設計原則
//! - queue が pending work の唯一の正本（プロセス内に request を持ち越さない）
//! - finalize は冪等（既に消えた message に対しては no-op）
//! - 同時実行制御は visibility timeout のみ

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque token proving a consumer received a message.
///
/// Each delivery gets a fresh handle; a handle from an earlier delivery is
/// stale once the message has been redelivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One received message (a delivery attempt).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub receipt: ReceiptHandle,
    pub body: String,
    /// 1 on first delivery, incremented on each redelivery.
    pub receive_count: u32,
}

/// Observability snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Visible and waiting for a consumer.
    pub visible: usize,
    /// Received but not yet finalized.
    pub in_flight: usize,
    /// Removed by finalize since start.
    pub finalized: usize,
}

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue operation failed: {0}")]
    OperationFailed(String),
}

#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Enqueue one message body. Returns the message id.
    async fn send(&self, body: String) -> Result<String, QueueError>;

    /// Receive up to `max` messages, waiting at most `wait` for the first one.
    /// An empty Vec means nothing arrived in time.
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, QueueError>;

    /// Remove a received message. Must succeed (no-op) when the message is
    /// already gone or the handle is stale.
    async fn finalize(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;
}
