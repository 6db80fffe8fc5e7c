//! InMemoryDispatchQueue - 開発用の配送キュー
//!
//! SQS 風の at-least-once キューをプロセス内で再現します。
//!
//! # 実装詳細
//! - tokio::sync::Mutex で状態を保護し、Notify で send を待機中の receive に通知
//! - receive した message は visibility timeout の間 in-flight になり、
//!   期限切れで visible に戻る（再配送、receive_count が増える）
//! - 期限は BinaryHeap（min-heap）で管理
//! - finalize は既に消えた message に対しては no-op

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use ulid::Ulid;

use crate::ports::{Delivery, DispatchQueue, QueueCounts, QueueError, ReceiptHandle};

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Visibility deadline for an in-flight message.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Expiry {
    visible_at: Instant,
    message_id: String,
}

impl PartialOrd for Expiry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Expiry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.visible_at.cmp(&self.visible_at)
    }
}

#[derive(Debug)]
struct StoredMessage {
    body: String,
    receive_count: u32,
    /// `Some` while in flight.
    in_flight_until: Option<Instant>,
    /// Every handle issued for this message. Any of them may finalize it.
    receipts: Vec<ReceiptHandle>,
}

struct QueueState {
    messages: HashMap<String, StoredMessage>,
    /// Visible message ids in arrival order. May hold ids already removed.
    ready: VecDeque<String>,
    expiries: BinaryHeap<Expiry>,
    receipts: HashMap<ReceiptHandle, String>,
    finalized: usize,
    visibility_timeout: Duration,
}

impl QueueState {
    fn new(visibility_timeout: Duration) -> Self {
        Self {
            messages: HashMap::new(),
            ready: VecDeque::new(),
            expiries: BinaryHeap::new(),
            receipts: HashMap::new(),
            finalized: 0,
            visibility_timeout,
        }
    }

    /// Make expired in-flight messages visible again.
    fn release_expired(&mut self, now: Instant) {
        while let Some(entry) = self.expiries.peek() {
            if entry.visible_at > now {
                break;
            }
            let Some(entry) = self.expiries.pop() else {
                break;
            };
            // 同じ message が再 receive されている場合、古い期限は無視する
            if let Some(msg) = self.messages.get_mut(&entry.message_id)
                && msg.in_flight_until == Some(entry.visible_at)
            {
                msg.in_flight_until = None;
                self.ready.push_back(entry.message_id);
            }
        }
    }

    fn take_visible(&mut self, max: usize, now: Instant) -> Vec<Delivery> {
        let mut out = Vec::new();
        while out.len() < max {
            let Some(message_id) = self.ready.pop_front() else {
                break;
            };
            let Some(msg) = self.messages.get_mut(&message_id) else {
                continue;
            };
            if msg.in_flight_until.is_some() {
                continue;
            }
            let visible_at = now + self.visibility_timeout;
            let receipt = ReceiptHandle::new(new_id());
            msg.in_flight_until = Some(visible_at);
            msg.receive_count += 1;
            msg.receipts.push(receipt.clone());
            self.receipts.insert(receipt.clone(), message_id.clone());
            self.expiries.push(Expiry {
                visible_at,
                message_id: message_id.clone(),
            });
            out.push(Delivery {
                message_id,
                receipt,
                body: msg.body.clone(),
                receive_count: msg.receive_count,
            });
        }
        out
    }

    fn counts(&self) -> QueueCounts {
        let in_flight = self
            .messages
            .values()
            .filter(|m| m.in_flight_until.is_some())
            .count();
        QueueCounts {
            visible: self.messages.len() - in_flight,
            in_flight,
            finalized: self.finalized,
        }
    }
}

fn new_id() -> String {
    let ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    Ulid::from_parts(ms, rand::random()).to_string()
}

/// In-memory DispatchQueue implementation.
pub struct InMemoryDispatchQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl InMemoryDispatchQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new(visibility_timeout))),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl Default for InMemoryDispatchQueue {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_TIMEOUT)
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn send(&self, body: String) -> Result<String, QueueError> {
        let message_id = new_id();
        {
            let mut state = self.state.lock().await;
            state.messages.insert(
                message_id.clone(),
                StoredMessage {
                    body,
                    receive_count: 0,
                    in_flight_until: None,
                    receipts: Vec::new(),
                },
            );
            state.ready.push_back(message_id.clone());
        }
        // lock の外で通知
        self.notify.notify_one();
        Ok(message_id)
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let next_expiry = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.release_expired(now);
                let out = state.take_visible(max.max(1), now);
                if !out.is_empty() {
                    let more_visible = !state.ready.is_empty();
                    drop(state);
                    if more_visible {
                        // 取り残した message を他の receiver に渡す
                        self.notify.notify_one();
                    }
                    return Ok(out);
                }
                state.expiries.peek().map(|e| e.visible_at)
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = match next_expiry {
                Some(at) if at < deadline => at,
                _ => deadline,
            };
            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep_until(wake_at) => {},
            }
        }
    }

    async fn finalize(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let Some(message_id) = state.receipts.remove(receipt) else {
            debug!(receipt = %receipt, "finalize on unknown receipt, already gone");
            return Ok(());
        };
        if let Some(msg) = state.messages.remove(&message_id) {
            for r in &msg.receipts {
                state.receipts.remove(r);
            }
            state.finalized += 1;
        }
        Ok(())
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(self.state.lock().await.counts())
    }
}
