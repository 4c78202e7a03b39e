//! Live view of one conversation.
//!
//! Holds the subscription for as long as the viewer has the conversation open.
//! When the conversation document is deleted (normally by a confirmation
//! elsewhere) every open view moves to `Closed` and refuses further sends.

use crate::error::{AppError, Result};
use crate::hub::{ChangeEvent, Delivery, Subscription};
use crate::models::{sort_log, ActingUser, Conversation, Message, MessageId};
use crate::registry::ConversationRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The conversation no longer exists; go back to the conversation list.
    ConversationDeleted,
    ClosedByViewer,
    /// The store stopped publishing.
    FeedEnded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    Conversation(Conversation),
    MessageAdded(Message),
    MessageModified(Message),
    MessageRemoved(MessageId),
    /// State was re-read after the subscription lagged.
    Resynced,
    Closed(CloseReason),
}

pub struct LiveConversation {
    registry: ConversationRegistry,
    viewer: ActingUser,
    conversation: Conversation,
    messages: Vec<Message>,
    subscription: Option<Subscription>,
    closed: Option<CloseReason>,
}

impl LiveConversation {
    pub(crate) fn new(
        registry: ConversationRegistry,
        viewer: ActingUser,
        conversation: Conversation,
        messages: Vec<Message>,
        subscription: Subscription,
    ) -> Self {
        Self {
            registry,
            viewer,
            conversation,
            messages,
            subscription: Some(subscription),
            closed: None,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_open(&self) -> bool {
        self.closed.is_none()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed
    }

    /// Waits for the next change. Returns `None` once the view is closed and the
    /// `Closed` update has already been handed out.
    pub async fn next_update(&mut self) -> Option<LiveUpdate> {
        loop {
            let subscription = self.subscription.as_mut()?;
            let delivery = match subscription.recv().await {
                Some(delivery) => delivery,
                None => return Some(self.shut(CloseReason::FeedEnded)),
            };
            match delivery {
                Delivery::Event(event) => {
                    if let Some(update) = self.absorb(event) {
                        return Some(update);
                    }
                }
                Delivery::Lagged(missed) => {
                    tracing::debug!(conversation_id = %self.conversation.id, missed, "live view lagged, resyncing");
                    return Some(self.resync().await);
                }
            }
        }
    }

    pub async fn send_text(&mut self, text: &str) -> Result<Message> {
        if !self.is_open() {
            return Err(AppError::not_found("Conversation", self.conversation.id));
        }
        self.registry
            .send_text(self.conversation.id, &self.viewer, text)
            .await
    }

    /// Tears down the subscription. Later `next_update` calls return `None`.
    pub fn close(&mut self) {
        self.subscription = None;
        self.closed.get_or_insert(CloseReason::ClosedByViewer);
    }

    fn shut(&mut self, reason: CloseReason) -> LiveUpdate {
        self.subscription = None;
        self.closed = Some(reason);
        LiveUpdate::Closed(reason)
    }

    fn absorb(&mut self, event: ChangeEvent) -> Option<LiveUpdate> {
        match event {
            ChangeEvent::ConversationChanged(conversation) if conversation.id == self.conversation.id => {
                self.conversation = conversation.clone();
                Some(LiveUpdate::Conversation(conversation))
            }
            ChangeEvent::ConversationDeleted(conversation) if conversation.id == self.conversation.id => {
                Some(self.shut(CloseReason::ConversationDeleted))
            }
            ChangeEvent::MessageAdded(message) => {
                if self.messages.iter().any(|m| m.id == message.id) {
                    return None;
                }
                self.messages.push(message.clone());
                sort_log(&mut self.messages);
                Some(LiveUpdate::MessageAdded(message))
            }
            ChangeEvent::MessageModified(message) => {
                if let Some(slot) = self.messages.iter_mut().find(|m| m.id == message.id) {
                    *slot = message.clone();
                }
                Some(LiveUpdate::MessageModified(message))
            }
            ChangeEvent::MessageRemoved { message_id, .. } => {
                self.messages.retain(|m| m.id != message_id);
                Some(LiveUpdate::MessageRemoved(message_id))
            }
            _ => None,
        }
    }

    async fn resync(&mut self) -> LiveUpdate {
        let id = self.conversation.id;
        match self.registry.get(id, &self.viewer).await {
            Ok(conversation) => {
                self.conversation = conversation;
                match self.registry.messages(id, &self.viewer).await {
                    Ok(messages) => self.messages = messages,
                    Err(e) => tracing::warn!(conversation_id = %id, error = %e, "resync could not reload messages"),
                }
                LiveUpdate::Resynced
            }
            Err(AppError::NotFound(..)) => self.shut(CloseReason::ConversationDeleted),
            Err(e) => {
                tracing::warn!(conversation_id = %id, error = %e, "resync failed");
                LiveUpdate::Resynced
            }
        }
    }
}
