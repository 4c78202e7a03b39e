//! Typed outcome channel.
//!
//! Callers subscribe once and match on `ResolutionEvent` instead of wiring a
//! handler per outcome.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{ConversationId, MessageId, PostId, RequestKind, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionEvent {
    Submitted {
        conversation_id: ConversationId,
        message_id: MessageId,
        kind: RequestKind,
    },
    UploadFailed {
        conversation_id: ConversationId,
        reason: String,
    },
    ConflictDetected {
        conversation_id: ConversationId,
        existing_message_id: Option<MessageId>,
    },
    Confirmed {
        post_id: PostId,
        conversation_id: ConversationId,
        message_id: MessageId,
        rejected_rivals: usize,
    },
    Rejected {
        conversation_id: ConversationId,
        message_id: MessageId,
        requester_id: UserId,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ResolutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResolutionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ResolutionEvent) {
        tracing::debug!(?event, "resolution event");
        // Nobody listening is normal for headless callers.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
