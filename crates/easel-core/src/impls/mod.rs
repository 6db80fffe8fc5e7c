//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteDispatchQueue**: 永続化された配送キュー（再起動しても残る）
//! - **InMemoryDispatchQueue**: 開発・テスト用の配送キュー（visibility timeout 付き）
//! - **LocalArtifactStore**: ファイルシステムへの保存
//! - **HttpInferenceGateway**: HTTP 越しの画像生成
//! - **SlackNotifier**: Slack Web API への投稿

pub mod http_inference;
pub mod inmem_queue;
pub mod local_store;
pub mod slack;
pub mod sqlite_queue;

pub use self::http_inference::HttpInferenceGateway;
pub use self::inmem_queue::InMemoryDispatchQueue;
pub use self::local_store::LocalArtifactStore;
pub use self::slack::SlackNotifier;
pub use self::sqlite_queue::SqliteDispatchQueue;
