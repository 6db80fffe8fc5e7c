//! Errors - エラー型と分類
//!
//! worker 側のエラーは全て [`FulfillmentError`] に集約され、
//! attempt 処理の最上位で捕捉されます（外に伝播しない）。

use thiserror::Error;

use super::state::AttemptState;
use crate::ports::{InferenceError, NotifyError, QueueError, StoreError};

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（再試行すれば成功しうる）
/// - Permanent: 恒久的なエラー（再試行無意味）
/// - Infrastructure: インフラエラー（Queue/Storage/Slack の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Why a queue message or mention event could not become a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("malformed message body: {0}")]
    Malformed(String),

    #[error("missing channel_id")]
    MissingConversation,

    #[error("missing input_text")]
    MissingPrompt,

    #[error("input_text is empty")]
    EmptyPrompt,
}

/// A failure in one of the four pipeline steps.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("invalid request: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("failed to generate image: {0}")]
    Generation(#[from] InferenceError),

    #[error("failed to store image: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to upload image: {0}")]
    Notification(#[from] NotifyError),
}

impl FulfillmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::Permanent,
            Self::Generation(InferenceError::Timeout(_) | InferenceError::RateLimited(_)) => {
                ErrorKind::Transient
            }
            Self::Generation(_) => ErrorKind::Permanent,
            Self::Storage(_) | Self::Notification(_) => ErrorKind::Infrastructure,
        }
    }

    /// Terminal state reached after compensation.
    pub fn terminal_state(&self) -> AttemptState {
        match self {
            Self::InvalidInput(_) => AttemptState::FailedInput,
            Self::Generation(_) => AttemptState::FailedGeneration,
            Self::Storage(_) => AttemptState::FailedStorage,
            Self::Notification(_) => AttemptState::FailedNotification,
        }
    }
}

/// Receiver-side failure, surfaced to the event source.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// The enqueue call failed. The platform is expected to redeliver the event.
    #[error("dispatch queue unavailable: {0}")]
    Transient(#[from] QueueError),
}
