//! ArtifactStore port - Blob ストレージ（S3/Local）
//!
//! 生成画像を階層キーで保存します。このシステムから見ると append-only で、
//! 既存オブジェクトを書き換えることはありません（同一キーの衝突は上書き）。

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError>;
}
