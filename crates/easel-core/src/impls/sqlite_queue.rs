//! SqliteDispatchQueue - SQLite に永続化する配送キュー
//!
//! プロセスが落ちても pending / in-flight の request は残る。
//!
//! # 実装詳細
//! - 書き込みは tokio-rusqlite の単一バックグラウンドスレッドに直列化
//! - receive は `locked_until` を visibility window として行を借りる。期限切れの行は
//!   再び visible になり、次の receive で `receive_count` が増える
//! - receipt は `{row id}:{lease}`。lease は delivery ごとに新しい ULID
//! - finalize は行を DELETE する。既に消えた行や壊れた receipt は no-op
//! - 同一プロセス内の send は Notify で receive を起こす。他プロセスからの send は
//!   POLL_INTERVAL ごとの再確認で拾う

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_rusqlite::Connection;
use tracing::debug;
use ulid::Ulid;

use crate::ports::{Delivery, DispatchQueue, QueueCounts, QueueError, ReceiptHandle};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dispatch_queue (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_name    TEXT    NOT NULL,
    body          TEXT    NOT NULL,
    receive_count INTEGER NOT NULL DEFAULT 0,
    lease         TEXT,
    locked_until  INTEGER,
    created_at    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dispatch_queue_visible
    ON dispatch_queue (queue_name, locked_until, id);
CREATE TABLE IF NOT EXISTS dispatch_queue_stats (
    queue_name TEXT PRIMARY KEY,
    finalized  INTEGER NOT NULL DEFAULT 0
);
";

fn map_tr_err(op: &'static str) -> impl Fn(tokio_rusqlite::Error<rusqlite::Error>) -> QueueError {
    move |e| match e {
        tokio_rusqlite::Error::ConnectionClosed => {
            QueueError::Unavailable(format!("{op}: connection closed"))
        }
        other => QueueError::OperationFailed(format!("{op}: {other}")),
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `{id}:{lease}` → id. Anything else is treated as an unknown receipt.
fn parse_receipt(receipt: &ReceiptHandle) -> Option<i64> {
    let (id, lease) = receipt.as_str().split_once(':')?;
    if lease.is_empty() {
        return None;
    }
    id.parse().ok()
}

pub struct SqliteDispatchQueue {
    conn: Connection,
    queue_name: String,
    visibility_timeout: Duration,
    notify: Arc<Notify>,
}

impl SqliteDispatchQueue {
    /// Open (or create) the queue database at `path`.
    pub async fn open(
        path: impl AsRef<Path>,
        queue_name: impl Into<String>,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .await
            .map_err(|e| QueueError::Unavailable(format!("open {}: {e}", path.display())))?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)
        })
        .await
        .map_err(map_tr_err("migrate"))?;

        Ok(Self {
            conn,
            queue_name: queue_name.into(),
            visibility_timeout,
            notify: Arc::new(Notify::new()),
        })
    }

    pub async fn close(self) -> Result<(), QueueError> {
        self.conn.close().await.map_err(map_tr_err("close"))
    }

    /// Lease up to `max` visible rows in one transaction.
    async fn take_visible(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let queue_name = self.queue_name.clone();
        let visibility_ms = self.visibility_timeout.as_millis() as i64;
        let limit = max.max(1) as i64;
        self.conn
            .call(move |conn| -> Result<Vec<Delivery>, rusqlite::Error> {
                let now = now_ms();
                let tx = conn.transaction()?;
                let rows = {
                    let mut stmt = tx.prepare(
                        "SELECT id, body, receive_count
                         FROM dispatch_queue
                         WHERE queue_name = ?1 AND (locked_until IS NULL OR locked_until <= ?2)
                         ORDER BY id ASC
                         LIMIT ?3",
                    )?;
                    stmt.query_map(params![queue_name, now, limit], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?
                };

                let mut out = Vec::with_capacity(rows.len());
                for (id, body, receive_count) in rows {
                    let lease = Ulid::new().to_string();
                    tx.execute(
                        "UPDATE dispatch_queue
                         SET receive_count = receive_count + 1, lease = ?1, locked_until = ?2
                         WHERE id = ?3",
                        params![lease, now + visibility_ms, id],
                    )?;
                    out.push(Delivery {
                        message_id: id.to_string(),
                        receipt: ReceiptHandle::new(format!("{id}:{lease}")),
                        body,
                        receive_count: (receive_count + 1) as u32,
                    });
                }
                tx.commit()?;
                Ok(out)
            })
            .await
            .map_err(map_tr_err("receive"))
    }
}

#[async_trait]
impl DispatchQueue for SqliteDispatchQueue {
    async fn send(&self, body: String) -> Result<String, QueueError> {
        let queue_name = self.queue_name.clone();
        let id = self
            .conn
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.execute(
                    "INSERT INTO dispatch_queue (queue_name, body, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![queue_name, body, now_ms()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(map_tr_err("send"))?;
        self.notify.notify_one();
        Ok(id.to_string())
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let out = self.take_visible(max).await?;
            if !out.is_empty() {
                return Ok(out);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = (now + POLL_INTERVAL).min(deadline);
            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep_until(wake_at) => {},
            }
        }
    }

    async fn finalize(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let Some(id) = parse_receipt(receipt) else {
            debug!(receipt = %receipt, "finalize on unknown receipt, ignoring");
            return Ok(());
        };
        let queue_name = self.queue_name.clone();
        let removed = self
            .conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let tx = conn.transaction()?;
                let deleted = tx.execute(
                    "DELETE FROM dispatch_queue WHERE id = ?1 AND queue_name = ?2",
                    params![id, queue_name],
                )?;
                if deleted > 0 {
                    tx.execute(
                        "INSERT INTO dispatch_queue_stats (queue_name, finalized) VALUES (?1, 1)
                         ON CONFLICT(queue_name) DO UPDATE SET finalized = finalized + 1",
                        params![queue_name],
                    )?;
                }
                tx.commit()?;
                Ok(deleted > 0)
            })
            .await
            .map_err(map_tr_err("finalize"))?;
        if !removed {
            debug!(receipt = %receipt, "finalize on a message already gone");
        }
        Ok(())
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let queue_name = self.queue_name.clone();
        self.conn
            .call(move |conn| -> Result<QueueCounts, rusqlite::Error> {
                let now = now_ms();
                let (visible, in_flight): (i64, i64) = conn.query_row(
                    "SELECT
                        COALESCE(SUM(CASE WHEN locked_until IS NULL OR locked_until <= ?2
                                     THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN locked_until > ?2 THEN 1 ELSE 0 END), 0)
                     FROM dispatch_queue WHERE queue_name = ?1",
                    params![queue_name, now],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                let finalized: i64 = conn
                    .query_row(
                        "SELECT finalized FROM dispatch_queue_stats WHERE queue_name = ?1",
                        params![queue_name],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or(0);
                Ok(QueueCounts {
                    visible: visible as usize,
                    in_flight: in_flight as usize,
                    finalized: finalized as usize,
                })
            })
            .await
            .map_err(map_tr_err("counts"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SHORT: Duration = Duration::from_millis(50);

    async fn open(dir: &tempfile::TempDir, visibility: Duration) -> SqliteDispatchQueue {
        SqliteDispatchQueue::open(dir.path().join("queue.db"), "requests", visibility)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn send_then_receive_roundtrip() {
        let dir = tempdir().unwrap();
        let queue = open(&dir, Duration::from_secs(30)).await;
        let id = queue.send("hello".into()).await.unwrap();

        let got = queue.receive(1, SHORT).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message_id, id);
        assert_eq!(got[0].body, "hello");
        assert_eq!(got[0].receive_count, 1);
        assert!(queue.receive(1, SHORT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_message_survives_reopen() {
        let dir = tempdir().unwrap();
        let queue = open(&dir, Duration::from_secs(30)).await;
        queue.send("durable".into()).await.unwrap();
        queue.close().await.unwrap();

        let reopened = open(&dir, Duration::from_secs(30)).await;
        assert_eq!(reopened.counts().await.unwrap().visible, 1);
        let got = reopened.receive(1, SHORT).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, "durable");
    }

    #[tokio::test]
    async fn in_flight_message_is_redelivered_after_restart() {
        let dir = tempdir().unwrap();
        let queue = open(&dir, Duration::from_millis(100)).await;
        queue.send("x".into()).await.unwrap();
        let first = queue.receive(1, SHORT).await.unwrap().remove(0);
        // worker が finalize 前に落ちた
        queue.close().await.unwrap();

        let reopened = open(&dir, Duration::from_millis(100)).await;
        assert_eq!(reopened.counts().await.unwrap().in_flight, 1);
        let again = reopened
            .receive(1, Duration::from_millis(500))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(again.message_id, first.message_id);
        assert_eq!(again.receive_count, 2);
        assert_ne!(again.receipt, first.receipt);
    }

    #[tokio::test]
    async fn finalize_removes_message_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let queue = open(&dir, Duration::from_millis(100)).await;
        queue.send("x".into()).await.unwrap();
        let d = queue.receive(1, SHORT).await.unwrap().remove(0);

        queue.finalize(&d.receipt).await.unwrap();
        queue.finalize(&d.receipt).await.unwrap();
        queue.finalize(&ReceiptHandle::new("garbage")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(queue.receive(1, SHORT).await.unwrap().is_empty());
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.finalized, 1);
        assert_eq!(counts.visible + counts.in_flight, 0);
    }

    #[tokio::test]
    async fn receive_respects_batch_size_and_order() {
        let dir = tempdir().unwrap();
        let queue = open(&dir, Duration::from_secs(30)).await;
        for i in 0..3 {
            queue.send(format!("m{i}")).await.unwrap();
        }
        let batch = queue.receive(2, SHORT).await.unwrap();
        assert_eq!(
            batch.iter().map(|d| d.body.as_str()).collect::<Vec<_>>(),
            vec!["m0", "m1"]
        );
        assert_eq!(queue.receive(10, SHORT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_wakes_waiting_receive() {
        let dir = tempdir().unwrap();
        let queue = Arc::new(open(&dir, Duration::from_secs(30)).await);
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.receive(1, Duration::from_secs(5)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.send("late".into()).await.unwrap();

        let got = waiter.await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, "late");
    }

    #[tokio::test]
    async fn queues_with_different_names_are_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let a = SqliteDispatchQueue::open(&path, "a", Duration::from_secs(30))
            .await
            .unwrap();
        let b = SqliteDispatchQueue::open(&path, "b", Duration::from_secs(30))
            .await
            .unwrap();
        a.send("for-a".into()).await.unwrap();

        assert!(b.receive(1, SHORT).await.unwrap().is_empty());
        assert_eq!(a.receive(1, SHORT).await.unwrap()[0].body, "for-a");
    }
}
