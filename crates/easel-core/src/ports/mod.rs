//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部システム（queue, 推論サービス,
//! object storage, chat）へのインターフェースを定義し、receiver と worker には
//! コンストラクタで注入します（テストでは test double に差し替え）。

pub mod artifact_store;
pub mod clock;
pub mod dispatch_queue;
pub mod inference;
pub mod notifier;

pub use self::artifact_store::{ArtifactStore, StoreError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dispatch_queue::{Delivery, DispatchQueue, QueueCounts, QueueError, ReceiptHandle};
pub use self::inference::{InferenceError, InferenceGateway};
pub use self::notifier::{FileUpload, NotificationChannel, NotifyError};
