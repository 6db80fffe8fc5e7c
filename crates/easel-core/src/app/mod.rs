//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **EventReceiver**: mention を検証して enqueue するだけの受け口
//! - **EventDispatchTable**: event type → handler
//! - **FulfillmentWorker**: 1 attempt（parse→generate→store→notify→finalize）
//! - **WorkerGroup**: N 本の polling ループ
//! - **server**: Slack Events API の HTTP 面

pub mod builder;
pub mod dispatch;
pub mod receiver;
pub mod server;
pub mod worker;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::dispatch::{
    APP_MENTION, DispatchError, EventDispatchTable, EventHandler, MentionHandler,
};
pub use self::receiver::{EventReceiver, ReceiveOutcome};
pub use self::server::{ServerError, ServerState};
pub use self::worker::{FulfillmentWorker, WorkerConfig, caption_for};
pub use self::worker_loop::{PollSettings, WorkerGroup};
