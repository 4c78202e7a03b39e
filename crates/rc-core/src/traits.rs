//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::batch::WriteBatch;
use crate::error::Result;
use crate::hub::{Subscription, Topic};
use crate::media::ImageUpload;
use crate::models::{
    ActingUser, Conversation, ConversationId, Message, MessageId, Post, PostId, UserId,
    UserProfile,
};
use crate::notify::Notification;

/// Document persistence contract for posts, conversations and their message logs.
///
/// Reads return `Ok(None)` for missing documents. `commit` is the only write path:
/// it applies a whole `WriteBatch` atomically or fails with the first violated
/// precondition (`Conflict` / `NotFound`) and writes nothing.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Server-assigned timestamp used for every write the engine makes.
    fn server_time(&self) -> DateTime<Utc>;

    // Post Operations
    async fn get_post(&self, id: PostId) -> Result<Option<Post>>;
    async fn list_posts(&self) -> Result<Vec<Post>>;

    // Conversation Operations
    async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>>;
    async fn conversations_for_post(&self, post_id: PostId) -> Result<Vec<Conversation>>;
    async fn conversations_for_user(&self, user_id: &UserId) -> Result<Vec<Conversation>>;

    // Message Operations
    async fn get_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Option<Message>>;
    /// Oldest first.
    async fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>>;

    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Live add/modify/remove deltas for a topic. Dropping the handle unsubscribes.
    fn subscribe(&self, topic: Topic) -> Subscription;
}

/// Media storage contract for verification photos.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Saves the image under `folder` and returns its public URL.
    async fn save_upload(&self, upload: ImageUpload, folder: &str) -> anyhow::Result<String>;
}

/// Push/in-app notification delivery. Best effort: callers log failures and move on.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_to_users(
        &self,
        user_ids: &[UserId],
        notification: &Notification,
    ) -> anyhow::Result<()>;
}

/// Identity contract: who is calling, and may they act as staff.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Starts a session for an identity the upstream login vouched for with
    /// `assertion`. Returns the bearer token, or `None` if the assertion is refused.
    async fn sign_in(
        &self,
        user_id: &UserId,
        profile: UserProfile,
        assertion: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Resolves a session token to the acting user.
    async fn authenticate(&self, token: &str) -> anyhow::Result<Option<ActingUser>>;

    /// Verifies staff credentials and upgrades the session to the admin role.
    async fn elevate(&self, token: &str, password: &str) -> anyhow::Result<bool>;
}
