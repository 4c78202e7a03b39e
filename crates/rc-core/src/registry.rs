//! # Conversation registry
//!
//! Owns conversation identity (one per post/counterpart pair), participant and
//! unread bookkeeping, and the bounded message log.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::batch::{Precondition, WriteBatch, WriteOp};
use crate::error::{AppError, Result};
use crate::hub::Topic;
use crate::live::LiveConversation;
use crate::models::{
    sort_log, ActingUser, Conversation, ConversationId, ConversationUpdate, LastMessage, Message,
    MessageBody, MessageId, PostId, PostStatus,
};
use crate::queue::WriteQueue;
use crate::traits::DocumentStore;

#[derive(Clone)]
pub struct ConversationRegistry {
    store: Arc<dyn DocumentStore>,
    queue: Arc<WriteQueue>,
    message_cap: usize,
}

impl ConversationRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, queue: Arc<WriteQueue>, message_cap: usize) -> Self {
        Self {
            store,
            queue,
            message_cap: message_cap.max(1),
        }
    }

    /// Returns the caller's conversation about `post_id`, creating it on first contact.
    pub async fn get_or_create(&self, post_id: PostId, user: &ActingUser) -> Result<Conversation> {
        let post = self
            .store
            .get_post(post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post", post_id))?;

        if post.creator_id == user.id {
            return Err(AppError::validation("cannot start a conversation with yourself"));
        }
        if post.status == PostStatus::Completed {
            return Err(AppError::conflict("item has already been resolved"));
        }

        let id = ConversationId::for_pair(post_id, &user.id);
        let profile = user.participant_profile();
        if let Some(existing) = self.store.get_conversation(id).await? {
            self.refresh_profile(&existing, user).await;
            return Ok(existing);
        }

        let now = self.store.server_time();
        let conversation = Conversation {
            id,
            post_id,
            post_kind: post.kind,
            post_title: post.title.clone(),
            poster_id: post.creator_id.clone(),
            counterpart_id: user.id.clone(),
            participants: BTreeMap::from([
                (post.creator_id.clone(), post.creator_profile.clone()),
                (user.id.clone(), profile),
            ]),
            active_request: None,
            unread_counts: BTreeMap::from([(post.creator_id.clone(), 0), (user.id.clone(), 0)]),
            last_message: None,
            created_at: now,
            updated_at: now,
        };

        let batch = WriteBatch::new()
            .require(Precondition::ConversationAbsent(id))
            .require(Precondition::PostStatusIn {
                post_id,
                allowed: vec![PostStatus::Pending, PostStatus::Unclaimed, PostStatus::Resolved],
            })
            .op(WriteOp::CreateConversation(conversation.clone()));

        match self.store.commit(batch).await {
            Ok(()) => {
                info!(conversation_id = %id, post_id = %post_id, counterpart = %user.id, "conversation created");
                Ok(conversation)
            }
            Err(AppError::Conflict(_)) => {
                // Lost the creation race or the post was resolved meanwhile.
                match self.store.get_conversation(id).await? {
                    Some(existing) => Ok(existing),
                    None => Err(AppError::conflict("item has already been resolved")),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Loads a conversation the viewer may see. Admins may read any conversation.
    pub async fn get(&self, id: ConversationId, viewer: &ActingUser) -> Result<Conversation> {
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation", id))?;
        if !conversation.is_participant(&viewer.id) && !viewer.is_admin() {
            return Err(AppError::unauthorized("not a participant in this conversation"));
        }
        Ok(conversation)
    }

    /// Most recently active first.
    pub async fn list_for_user(&self, user: &ActingUser) -> Result<Vec<Conversation>> {
        let mut conversations = self.store.conversations_for_user(&user.id).await?;
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    pub async fn messages(&self, id: ConversationId, viewer: &ActingUser) -> Result<Vec<Message>> {
        self.get(id, viewer).await?;
        let mut messages = self.store.list_messages(id).await?;
        sort_log(&mut messages);
        Ok(messages)
    }

    pub async fn send_text(&self, id: ConversationId, sender: &ActingUser, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::validation("message text is required"));
        }
        self.append_message(id, sender, MessageBody::Text { text: text.to_string() })
            .await
    }

    /// Appends a chat message. Claim and handover requests go through the request service.
    pub async fn append_message(
        &self,
        id: ConversationId,
        sender: &ActingUser,
        body: MessageBody,
    ) -> Result<Message> {
        if matches!(body, MessageBody::HandoverRequest(_) | MessageBody::ClaimRequest(_)) {
            return Err(AppError::validation(
                "requests must be submitted through the request workflow",
            ));
        }
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation", id))?;
        if !conversation.is_participant(&sender.id) {
            return Err(AppError::unauthorized("not a participant in this conversation"));
        }

        let message = Message {
            id: MessageId::new(),
            conversation_id: id,
            sender_id: sender.id.clone(),
            sent_at: self.store.server_time(),
            body,
        };
        self.store
            .commit(self.message_batch(&conversation, &message, Vec::new()))
            .await?;
        Ok(message)
    }

    /// The writes that append `message`: the message itself, the conversation's
    /// last-message/unread bookkeeping plus any extra `updates`, then a trim of the
    /// log back to the cap. The trim runs inside the commit, so racing appends
    /// cannot push the log past the cap.
    pub(crate) fn message_batch(
        &self,
        conversation: &Conversation,
        message: &Message,
        updates: Vec<ConversationUpdate>,
    ) -> WriteBatch {
        let notify = conversation
            .other_participant(&message.sender_id)
            .cloned()
            .into_iter()
            .collect();
        let mut bookkeeping = vec![ConversationUpdate::RecordMessage {
            last: LastMessage::of(message),
            notify,
        }];
        bookkeeping.extend(updates);

        debug!(conversation_id = %conversation.id, message_id = %message.id, "appending message");
        WriteBatch::new()
            .require(Precondition::ConversationExists(conversation.id))
            .op(WriteOp::PutMessage(message.clone()))
            .op(WriteOp::UpdateConversation {
                id: conversation.id,
                updates: bookkeeping,
            })
            .op(WriteOp::TrimLog {
                conversation_id: conversation.id,
                cap: self.message_cap,
            })
    }

    /// Resets the caller's unread counter. Best effort, via the write queue.
    pub async fn mark_read(&self, id: ConversationId, user: &ActingUser) -> Result<()> {
        let conversation = self.get(id, user).await?;
        if conversation.unread_for(&user.id) == 0 {
            return Ok(());
        }
        self.queue
            .enqueue(WriteBatch::new().op(WriteOp::UpdateConversation {
                id,
                updates: vec![ConversationUpdate::ResetUnread(user.id.clone())],
            }))
            .await
    }

    /// Subscribes to the conversation and returns a live view of it.
    pub async fn open(&self, id: ConversationId, viewer: &ActingUser) -> Result<LiveConversation> {
        // Subscribe before reading so nothing between the read and the first recv is lost.
        let subscription = self.store.subscribe(Topic::Conversation(id));
        let conversation = self.get(id, viewer).await?;
        let messages = self.messages(id, viewer).await?;
        Ok(LiveConversation::new(
            self.clone(),
            viewer.clone(),
            conversation,
            messages,
            subscription,
        ))
    }

    async fn refresh_profile(&self, conversation: &Conversation, user: &ActingUser) {
        let profile = user.participant_profile();
        if conversation.participants.get(&user.id) == Some(&profile) {
            return;
        }
        let batch = WriteBatch::new().op(WriteOp::UpdateConversation {
            id: conversation.id,
            updates: vec![ConversationUpdate::SetParticipant {
                user: user.id.clone(),
                profile,
            }],
        });
        if let Err(e) = self.queue.enqueue(batch).await {
            debug!(error = %e, "profile refresh not queued");
        }
    }
}
