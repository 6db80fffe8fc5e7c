//! NotificationChannel port - 会話への投稿（Slack など）

use async_trait::async_trait;
use thiserror::Error;

/// A file attachment addressed to one conversation.
#[derive(Debug, Clone, Copy)]
pub struct FileUpload<'a> {
    pub conversation_id: &'a str,
    pub bytes: &'a [u8],
    pub filename: &'a str,
    pub title: &'a str,
    /// Comment posted alongside the file.
    pub caption: &'a str,
}

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("notification rejected: {0}")]
    Api(String),
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn upload_file(&self, upload: FileUpload<'_>) -> Result<(), NotifyError>;

    async fn post_message(&self, conversation_id: &str, text: &str) -> Result<(), NotifyError>;
}
