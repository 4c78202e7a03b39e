//! Topic-keyed change feed.
//!
//! Store adapters publish the `ChangeEvent`s produced by each committed batch;
//! live viewers subscribe to the topics they render. Topics are created lazily on
//! first subscribe and reclaimed when their last subscription is dropped.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

use crate::models::{Conversation, ConversationId, Message, MessageId, Post, PostId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Post(PostId),
    Conversation(ConversationId),
    /// Every conversation a user takes part in (the conversation list view).
    Inbox(UserId),
}

/// An add/modify/remove delta for one document.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    PostChanged(Post),
    ConversationChanged(Conversation),
    /// Carries the last snapshot so inbox listeners know whose list to update.
    ConversationDeleted(Conversation),
    MessageAdded(Message),
    MessageModified(Message),
    MessageRemoved {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
}

impl ChangeEvent {
    pub fn topics(&self) -> Vec<Topic> {
        match self {
            ChangeEvent::PostChanged(post) => vec![Topic::Post(post.id)],
            ChangeEvent::ConversationChanged(c) | ChangeEvent::ConversationDeleted(c) => vec![
                Topic::Conversation(c.id),
                Topic::Inbox(c.poster_id.clone()),
                Topic::Inbox(c.counterpart_id.clone()),
            ],
            ChangeEvent::MessageAdded(m) | ChangeEvent::MessageModified(m) => {
                vec![Topic::Conversation(m.conversation_id)]
            }
            ChangeEvent::MessageRemoved {
                conversation_id, ..
            } => vec![Topic::Conversation(*conversation_id)],
        }
    }
}

/// What a subscriber sees.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(ChangeEvent),
    /// The receiver fell behind and this many events were dropped; re-read state.
    Lagged(u64),
}

type Channels = DashMap<Topic, broadcast::Sender<ChangeEvent>>;

/// Receiving half of a topic. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<ChangeEvent>,
    channels: Weak<Channels>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(channels) = self.channels.upgrade() {
            // `rx` is still alive here, so the last subscriber sees a count of 1.
            channels.remove_if(&self.topic, |_, tx| tx.receiver_count() <= 1);
        }
    }
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next delivery, or `None` once the publishing store has gone away.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(Delivery::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking poll used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Delivery::Lagged(n)),
            Err(_) => None,
        }
    }
}

/// In-process pub/sub shared by the store adapters.
#[derive(Debug)]
pub struct ChangeHub {
    channels: Arc<Channels>,
    capacity: usize,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Fan an event out to every topic it touches. No-op for topics nobody watches.
    pub fn publish(&self, event: &ChangeEvent) {
        for topic in event.topics() {
            if let Some(tx) = self.channels.get(&topic) {
                let _ = tx.send(event.clone());
            }
        }
    }

    pub fn publish_all<'a>(&self, events: impl IntoIterator<Item = &'a ChangeEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let rx = self
            .channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            topic,
            rx,
            channels: Arc::downgrade(&self.channels),
        }
    }

    pub fn topic_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::MessageBody;

    fn message(conversation_id: ConversationId) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id,
            sender_id: "a".into(),
            sent_at: Utc::now(),
            body: MessageBody::Text { text: "hello".into() },
        }
    }

    #[tokio::test]
    async fn subscriber_receives_events_for_its_topic() {
        let hub = ChangeHub::new();
        let conv = ConversationId::new();
        let mut sub = hub.subscribe(Topic::Conversation(conv));

        let event = ChangeEvent::MessageAdded(message(conv));
        hub.publish(&event);

        assert_eq!(sub.recv().await, Some(Delivery::Event(event)));
    }

    #[tokio::test]
    async fn other_topics_are_not_delivered() {
        let hub = ChangeHub::new();
        let mut sub = hub.subscribe(Topic::Conversation(ConversationId::new()));
        hub.publish(&ChangeEvent::MessageAdded(message(ConversationId::new())));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn last_dropped_subscription_reclaims_the_topic() {
        let hub = ChangeHub::new();
        let first = hub.subscribe(Topic::Inbox("u".into()));
        let second = hub.subscribe(Topic::Inbox("u".into()));
        assert_eq!(hub.topic_count(), 1);

        drop(first);
        assert_eq!(hub.topic_count(), 1);
        drop(second);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn resubscribing_after_reclaim_still_delivers() {
        let hub = ChangeHub::new();
        let conv = ConversationId::new();
        drop(hub.subscribe(Topic::Conversation(conv)));

        let mut sub = hub.subscribe(Topic::Conversation(conv));
        let event = ChangeEvent::MessageAdded(message(conv));
        hub.publish(&event);
        assert_eq!(sub.recv().await, Some(Delivery::Event(event)));
    }

    #[tokio::test]
    async fn lagging_receiver_is_told_how_far_behind_it_is() {
        let hub = ChangeHub::with_capacity(2);
        let conv = ConversationId::new();
        let mut sub = hub.subscribe(Topic::Conversation(conv));
        for _ in 0..4 {
            hub.publish(&ChangeEvent::MessageAdded(message(conv)));
        }
        assert_eq!(sub.recv().await, Some(Delivery::Lagged(2)));
    }
}
