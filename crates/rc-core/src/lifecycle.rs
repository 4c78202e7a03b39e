//! # Post lifecycle
//!
//! Creating reports, the public listing, and the inactivity sweep that moves
//! stale reports to `Unclaimed` until an admin re-activates them.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::{Precondition, WriteBatch, WriteOp};
use crate::error::{AppError, Result};
use crate::models::{ActingUser, Post, PostId, PostKind, PostStatus, PostUpdate};
use crate::traits::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewPost {
    pub kind: PostKind,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn DocumentStore>,
    unclaimed_after: Duration,
}

impl PostService {
    pub fn new(store: Arc<dyn DocumentStore>, unclaimed_after_days: i64) -> Self {
        Self {
            store,
            unclaimed_after: Duration::days(unclaimed_after_days.max(1)),
        }
    }

    pub async fn create_post(&self, creator: &ActingUser, new: NewPost) -> Result<Post> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("a title is required"));
        }
        let now = self.store.server_time();
        let post = Post {
            id: PostId::new(),
            kind: new.kind,
            title: title.to_string(),
            description: new
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            status: PostStatus::Pending,
            found_action: None,
            turnover: None,
            creator_id: creator.id.clone(),
            creator_profile: creator.participant_profile(),
            created_at: now,
            updated_at: now,
            moved_to_unclaimed: false,
            resolution: None,
        };
        self.store
            .commit(WriteBatch::new().op(WriteOp::CreatePost(post.clone())))
            .await?;
        info!(post_id = %post.id, kind = ?post.kind, creator = %creator.id, "post created");
        Ok(post)
    }

    /// Store clock, used for expiry cutoffs.
    pub fn now(&self) -> DateTime<Utc> {
        self.store.server_time()
    }

    pub async fn get(&self, id: PostId) -> Result<Post> {
        self.store
            .get_post(id)
            .await?
            .ok_or_else(|| AppError::not_found("Post", id))
    }

    /// Newest first, hiding completed posts and turnovers a custodian has not confirmed.
    pub async fn public_listing(&self) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .store
            .list_posts()
            .await?
            .into_iter()
            .filter(Post::is_publicly_listed)
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    /// Moves pending posts untouched since `now - unclaimed_after` to `Unclaimed`.
    /// Returns the ids that moved.
    pub async fn expire_inactive(&self, now: DateTime<Utc>) -> Result<Vec<PostId>> {
        let cutoff = now - self.unclaimed_after;
        let stale: Vec<PostId> = self
            .store
            .list_posts()
            .await?
            .into_iter()
            .filter(|p| p.accepts_requests() && p.updated_at < cutoff)
            .map(|p| p.id)
            .collect();

        let mut moved = Vec::with_capacity(stale.len());
        for id in stale {
            let batch = WriteBatch::new()
                .require(Precondition::PostAcceptingRequests(id))
                .op(WriteOp::UpdatePost {
                    id,
                    updates: vec![
                        PostUpdate::SetStatus(PostStatus::Unclaimed),
                        PostUpdate::SetMovedToUnclaimed(true),
                    ],
                });
            match self.store.commit(batch).await {
                Ok(()) => moved.push(id),
                Err(AppError::Conflict(_)) | Err(AppError::NotFound(..)) => {
                    debug!(post_id = %id, "post changed before it could be expired")
                }
                Err(e) => return Err(e),
            }
        }
        if !moved.is_empty() {
            info!(count = moved.len(), "inactive posts moved to unclaimed");
        }
        Ok(moved)
    }

    /// Admin re-opens an unclaimed post.
    pub async fn activate(&self, admin: &ActingUser, id: PostId) -> Result<Post> {
        if !admin.is_admin() {
            return Err(AppError::unauthorized("only admins can re-activate posts"));
        }
        let batch = WriteBatch::new()
            .require(Precondition::PostStatusIn {
                post_id: id,
                allowed: vec![PostStatus::Unclaimed],
            })
            .op(WriteOp::UpdatePost {
                id,
                updates: vec![
                    PostUpdate::SetStatus(PostStatus::Pending),
                    PostUpdate::SetMovedToUnclaimed(false),
                ],
            });
        self.store.commit(batch).await?;
        info!(post_id = %id, admin = %admin.id, "post re-activated");
        self.get(id).await
    }

    /// The creator closes a post that was settled outside the chat flow.
    /// Blocked while a confirmation holds the post.
    pub async fn mark_resolved(&self, user: &ActingUser, id: PostId) -> Result<Post> {
        let post = self.get(id).await?;
        if post.creator_id != user.id && !user.is_admin() {
            return Err(AppError::unauthorized("only the creator can resolve this post"));
        }
        let batch = WriteBatch::new()
            .require(Precondition::PostAcceptingRequests(id))
            .op(WriteOp::UpdatePost {
                id,
                updates: vec![PostUpdate::SetStatus(PostStatus::Resolved)],
            });
        self.store.commit(batch).await?;
        info!(post_id = %id, "post resolved by creator");
        self.get(id).await
    }
}

/// Background task running `expire_inactive` on an interval.
pub struct ExpirationSweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpirationSweeper {
    /// Must be called inside a tokio runtime. The first sweep runs immediately.
    pub fn spawn(posts: PostService, every: std::time::Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = posts.expire_inactive(posts.now()).await {
                            warn!(error = %e, "expiration sweep failed");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("expiration sweeper stopped");
        });
        Self { stop, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "expiration sweeper panicked");
        }
    }
}
