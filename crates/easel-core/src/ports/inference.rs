//! InferenceGateway port - テキストから画像を生成する外部モデル
//!
//! 遅い（数秒〜数十秒）、rate limit されうる、失敗しうる前提で扱う。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("inference timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("inference rate limited: {0}")]
    RateLimited(String),

    #[error("inference service error: {0}")]
    Upstream(String),

    #[error("inference returned an empty image")]
    EmptyBody,
}

#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Turn `prompt` into raw PNG bytes.
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, InferenceError>;
}
