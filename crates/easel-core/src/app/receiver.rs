//! EventReceiver - mention event を受けて即座に enqueue する
//!
//! ここが decoupling の境界。enqueue が返った時点で成功を返し、
//! 生成が成功するかどうかには関与しない。

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{GenerationRequest, InvalidInput, MentionEvent, ReceiverError};
use crate::ports::DispatchQueue;

/// Result of handling one mention event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Exactly one request was enqueued.
    Enqueued { message_id: String },
    /// The event was malformed and nothing was enqueued.
    Dropped { reason: InvalidInput },
}

pub struct EventReceiver {
    queue: Arc<dyn DispatchQueue>,
}

impl EventReceiver {
    pub fn new(queue: Arc<dyn DispatchQueue>) -> Self {
        Self { queue }
    }

    /// Validate, strip the mention token, enqueue.
    ///
    /// Malformed events are dropped with a warning. A failing enqueue is
    /// returned as [`ReceiverError::Transient`] without retrying; the event
    /// source redelivers the original event.
    pub async fn handle_mention(
        &self,
        event: &MentionEvent,
    ) -> Result<ReceiveOutcome, ReceiverError> {
        let request = match GenerationRequest::new(event.channel.as_str(), event.prompt()) {
            Ok(request) => request,
            Err(reason) => {
                warn!(
                    channel_id = %event.channel,
                    user = ?event.user,
                    %reason,
                    "dropping malformed mention event"
                );
                return Ok(ReceiveOutcome::Dropped { reason });
            }
        };

        let message_id = self.queue.send(request.encode()).await?;
        info!(
            channel_id = request.conversation_id(),
            %message_id,
            "generation request enqueued"
        );
        Ok(ReceiveOutcome::Enqueued { message_id })
    }
}
