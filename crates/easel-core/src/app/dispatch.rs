//! EventDispatchTable - event type → handler の対応表
//!
//! 起動時に構築して、実行中は immutable に使う（ロック不要）。
//! グローバルな登録簿は持たない。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::receiver::{EventReceiver, ReceiveOutcome};
use crate::domain::{MentionEvent, ReceiverError};

/// Slack の app_mention event type。
pub const APP_MENTION: &str = "app_mention";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("handler not found for event_type={0}")]
    HandlerNotFound(String),

    #[error("duplicate handler for event_type={0}")]
    DuplicateHandler(String),

    #[error("event has no type tag")]
    MissingType,

    #[error("event payload could not be decoded: {0}")]
    Decode(String),

    #[error(transparent)]
    Receiver(#[from] ReceiverError),
}

/// A handler bound to one event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &serde_json::Value) -> Result<ReceiveOutcome, DispatchError>;
}

/// Adapts [`EventReceiver`] to the table.
pub struct MentionHandler {
    receiver: Arc<EventReceiver>,
}

impl MentionHandler {
    pub fn new(receiver: Arc<EventReceiver>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl EventHandler for MentionHandler {
    async fn handle(&self, event: &serde_json::Value) -> Result<ReceiveOutcome, DispatchError> {
        let mention: MentionEvent = serde_json::from_value(event.clone())
            .map_err(|e| DispatchError::Decode(e.to_string()))?;
        Ok(self.receiver.handle_mention(&mention).await?)
    }
}

#[derive(Default)]
pub struct EventDispatchTable {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventDispatchTable {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Table with the mention handler registered.
    pub fn with_mentions(receiver: Arc<EventReceiver>) -> Self {
        let mut table = Self::new();
        table.handlers.insert(
            APP_MENTION.to_string(),
            Arc::new(MentionHandler::new(receiver)),
        );
        table
    }

    pub fn register(
        &mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DispatchError> {
        let event_type = event_type.into();
        if self.handlers.contains_key(&event_type) {
            return Err(DispatchError::DuplicateHandler(event_type));
        }
        self.handlers.insert(event_type, handler);
        Ok(())
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    pub fn event_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Route an inner event by its `type` field.
    pub async fn dispatch(
        &self,
        event: &serde_json::Value,
    ) -> Result<ReceiveOutcome, DispatchError> {
        let event_type = event
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(DispatchError::MissingType)?;
        let handler = self
            .get(event_type)
            .ok_or_else(|| DispatchError::HandlerNotFound(event_type.to_string()))?;
        handler.handle(event).await
    }
}
