//! # rc-store-memory
//!
//! In-process `DocumentStore`. Every commit runs under one write lock, so a
//! batch's preconditions and ops are observed atomically by every reader.
//! Used by tests and by the binary when no database plugin is enabled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rc_core::batch::{DocumentWrite, WorkingSet, WriteBatch};
use rc_core::error::Result;
use rc_core::hub::{ChangeHub, Subscription, Topic};
use rc_core::models::{
    sort_log, Conversation, ConversationId, Message, MessageId, Post, PostId, UserId,
};
use rc_core::traits::DocumentStore;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Documents {
    posts: HashMap<PostId, Post>,
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, HashMap<MessageId, Message>>,
}

impl Documents {
    fn stage(&self, batch: &WriteBatch) -> WorkingSet {
        let keys = batch.keys();
        let mut ws = WorkingSet::new();
        for id in keys.posts {
            ws.insert_post(id, self.posts.get(&id).cloned());
        }
        for id in keys.conversations {
            ws.insert_conversation(id, self.conversations.get(&id).cloned());
        }
        for conversation_id in keys.logs {
            let log = self
                .messages
                .get(&conversation_id)
                .map(|log| log.values().cloned().collect())
                .unwrap_or_default();
            ws.insert_log(conversation_id, log);
        }
        for (conversation_id, message_id) in keys.messages {
            let message = self
                .messages
                .get(&conversation_id)
                .and_then(|log| log.get(&message_id))
                .cloned();
            ws.insert_message(conversation_id, message_id, message);
        }
        ws
    }

    fn persist(&mut self, write: DocumentWrite) {
        match write {
            DocumentWrite::UpsertPost(post) => {
                self.posts.insert(post.id, post);
            }
            DocumentWrite::UpsertConversation(conversation) => {
                self.conversations.insert(conversation.id, conversation);
            }
            DocumentWrite::DeleteConversation(id) => {
                self.conversations.remove(&id);
                self.messages.remove(&id);
            }
            DocumentWrite::UpsertMessage(message) => {
                self.messages
                    .entry(message.conversation_id)
                    .or_default()
                    .insert(message.id, message);
            }
            DocumentWrite::DeleteMessage {
                conversation_id,
                message_id,
            } => {
                if let Some(log) = self.messages.get_mut(&conversation_id) {
                    log.remove(&message_id);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<Documents>,
    hub: ChangeHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hub(hub: ChangeHub) -> Self {
        Self {
            docs: RwLock::default(),
            hub,
        }
    }

    /// Number of stored messages across all conversations.
    pub async fn message_count(&self) -> usize {
        self.docs.read().await.messages.values().map(HashMap::len).sum()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn server_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        Ok(self.docs.read().await.posts.get(&id).cloned())
    }

    async fn list_posts(&self) -> Result<Vec<Post>> {
        Ok(self.docs.read().await.posts.values().cloned().collect())
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.docs.read().await.conversations.get(&id).cloned())
    }

    async fn conversations_for_post(&self, post_id: PostId) -> Result<Vec<Conversation>> {
        Ok(self
            .docs
            .read()
            .await
            .conversations
            .values()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn conversations_for_user(&self, user_id: &UserId) -> Result<Vec<Conversation>> {
        Ok(self
            .docs
            .read()
            .await
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect())
    }

    async fn get_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Option<Message>> {
        Ok(self
            .docs
            .read()
            .await
            .messages
            .get(&conversation_id)
            .and_then(|log| log.get(&message_id))
            .cloned())
    }

    async fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .docs
            .read()
            .await
            .messages
            .get(&conversation_id)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default();
        sort_log(&mut messages);
        Ok(messages)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut docs = self.docs.write().await;
        let staged = docs.stage(&batch);
        let applied = batch.apply(staged, self.server_time())?;
        let count = applied.writes.len();
        for write in applied.writes {
            docs.persist(write);
        }
        // Publish under the lock so subscribers see commits in order.
        self.hub.publish_all(&applied.events);
        tracing::trace!(writes = count, "batch committed");
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        self.hub.subscribe(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_core::batch::{Precondition, WriteOp};
    use rc_core::hub::{ChangeEvent, Delivery};
    use rc_core::models::*;
    use rc_core::AppError;
    use std::collections::BTreeMap;

    fn post() -> Post {
        let now = Utc::now();
        Post {
            id: PostId::new(),
            kind: PostKind::Lost,
            title: "Wallet".into(),
            description: None,
            status: PostStatus::Pending,
            found_action: None,
            turnover: None,
            creator_id: "owner".into(),
            creator_profile: ParticipantProfile {
                display_name: "Owner".into(),
                avatar_url: None,
            },
            created_at: now,
            updated_at: now,
            moved_to_unclaimed: false,
            resolution: None,
        }
    }

    fn conversation(post: &Post) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: ConversationId::for_pair(post.id, &"finder".into()),
            post_id: post.id,
            post_kind: post.kind,
            post_title: post.title.clone(),
            poster_id: post.creator_id.clone(),
            counterpart_id: "finder".into(),
            participants: BTreeMap::new(),
            active_request: None,
            unread_counts: BTreeMap::new(),
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn text(conversation_id: ConversationId, body: &str) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id,
            sender_id: "finder".into(),
            sent_at: Utc::now(),
            body: MessageBody::Text { text: body.into() },
        }
    }

    async fn seeded() -> (MemoryStore, Post, Conversation) {
        let store = MemoryStore::new();
        let post = post();
        let conversation = conversation(&post);
        store
            .commit(
                WriteBatch::new()
                    .op(WriteOp::CreatePost(post.clone()))
                    .op(WriteOp::CreateConversation(conversation.clone())),
            )
            .await
            .unwrap();
        (store, post, conversation)
    }

    #[tokio::test]
    async fn failed_precondition_writes_nothing() {
        let (store, post, conversation) = seeded().await;
        let message = text(conversation.id, "hello");

        let err = store
            .commit(
                WriteBatch::new()
                    .require(Precondition::PostStatusIn {
                        post_id: post.id,
                        allowed: vec![PostStatus::Completed],
                    })
                    .op(WriteOp::PutMessage(message.clone())),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert!(store.get_message(conversation.id, message.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_conversation_removes_its_log() {
        let (store, _, conversation) = seeded().await;
        for i in 0..3 {
            store
                .commit(WriteBatch::new().op(WriteOp::PutMessage(text(conversation.id, &format!("m{i}")))))
                .await
                .unwrap();
        }
        assert_eq!(store.message_count().await, 3);

        let mut sub = store.subscribe(Topic::Conversation(conversation.id));
        store
            .commit(WriteBatch::new().op(WriteOp::DeleteConversation(conversation.id)))
            .await
            .unwrap();

        assert!(store.get_conversation(conversation.id).await.unwrap().is_none());
        assert_eq!(store.message_count().await, 0);
        assert!(matches!(
            sub.try_recv(),
            Some(Delivery::Event(ChangeEvent::ConversationDeleted(c))) if c.id == conversation.id
        ));

        // Second delete is a no-op.
        store
            .commit(WriteBatch::new().op(WriteOp::DeleteConversation(conversation.id)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn messages_list_oldest_first() {
        let (store, _, conversation) = seeded().await;
        let first = text(conversation.id, "first");
        let mut second = text(conversation.id, "second");
        second.sent_at = first.sent_at + chrono::Duration::seconds(1);

        store
            .commit(
                WriteBatch::new()
                    .op(WriteOp::PutMessage(second.clone()))
                    .op(WriteOp::PutMessage(first.clone())),
            )
            .await
            .unwrap();

        let ids: Vec<MessageId> = store
            .list_messages(conversation.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn inbox_subscribers_see_conversation_changes() {
        let (store, _, conversation) = seeded().await;
        let mut inbox = store.subscribe(Topic::Inbox("owner".into()));

        store
            .commit(WriteBatch::new().op(WriteOp::UpdateConversation {
                id: conversation.id,
                updates: vec![ConversationUpdate::ResetUnread("owner".into())],
            }))
            .await
            .unwrap();

        assert!(matches!(
            inbox.try_recv(),
            Some(Delivery::Event(ChangeEvent::ConversationChanged(_)))
        ));
    }
}
