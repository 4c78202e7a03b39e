//! # Confirmation coordinator
//!
//! Guarantees that at most one request per post is ever confirmed.
//!
//! 0. Reserve the post's resolution lock for the winning request.
//! 1. Enumerate the post's other conversations.
//! 2. Reject every request in them that is still pending or accepted.
//! 3. Send one consolidated notification per affected requester.
//! 4. Confirm the winner and complete the post.
//! 5. Delete every conversation of the post.
//!
//! Steps 0-4 are durable before step 5 starts. Step 5 is cleanup: failures are
//! logged and counted, never retried, never surfaced.

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::batch::{Precondition, WriteBatch, WriteOp};
use crate::error::{AppError, Result};
use crate::events::{EventBus, ResolutionEvent};
use crate::models::{
    ActingUser, Conversation, ConversationId, ConversationUpdate, Message, MessageId, Post,
    PostId, PostStatus, PostUpdate, RequestKind, RequestStatus, ResolutionLock, UserId,
};
use crate::notify::{dispatch, Notification, NotificationKind};
use crate::request::AUTO_REJECTION_REASON;
use crate::traits::{DocumentStore, NotificationDispatcher};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRequest {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub requester_id: UserId,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationReport {
    pub post_id: PostId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub rejected: Vec<RejectedRequest>,
    pub notified_users: usize,
    pub conversations_deleted: usize,
    pub cleanup_failures: usize,
}

#[derive(Clone)]
pub struct ConfirmationCoordinator {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    events: EventBus,
}

impl ConfirmationCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            notifier,
            events,
        }
    }

    /// Runs the whole confirmation for `winner`, which must be accepted and
    /// awaiting confirmation in `conversation`.
    pub async fn resolve(
        &self,
        post: &Post,
        conversation: &Conversation,
        winner: &Message,
        confirmer: &ActingUser,
    ) -> Result<ConfirmationReport> {
        let (kind, request) = winner
            .request()
            .ok_or_else(|| AppError::validation("message is not a request"))?;

        self.reserve(post.id, conversation.id, winner.id, kind, confirmer)
            .await?;

        let rejected = self.sweep_rivals(post.id, conversation.id, confirmer).await?;
        let notified_users = self.notify_rejected(post, &rejected).await;

        let now = self.store.server_time();
        let mut state = request.state.clone();
        state.confirm(&confirmer.id, now)?;
        let finalize = WriteBatch::new()
            .require(Precondition::ResolutionHeld {
                post_id: post.id,
                conversation_id: conversation.id,
                message_id: winner.id,
            })
            .require(Precondition::RequestStatusIn {
                conversation_id: conversation.id,
                message_id: winner.id,
                allowed: vec![RequestStatus::AcceptedPendingConfirmation],
            })
            .op(WriteOp::SetRequestState {
                conversation_id: conversation.id,
                message_id: winner.id,
                state,
            })
            .op(WriteOp::UpdateConversation {
                id: conversation.id,
                updates: vec![ConversationUpdate::ClearActiveRequest(winner.id)],
            })
            .op(WriteOp::UpdatePost {
                id: post.id,
                updates: vec![PostUpdate::SetStatus(PostStatus::Completed)],
            });
        self.store.commit(finalize).await?;
        info!(
            post_id = %post.id,
            conversation_id = %conversation.id,
            message_id = %winner.id,
            confirmer = %confirmer.id,
            rivals = rejected.len(),
            "request confirmed, post completed"
        );

        let participants: Vec<UserId> = [&conversation.poster_id, &conversation.counterpart_id]
            .into_iter()
            .filter(|id| **id != confirmer.id)
            .cloned()
            .collect();
        dispatch(
            self.notifier.as_ref(),
            &participants,
            Notification::new(
                NotificationKind::RequestConfirmed,
                "Item resolved",
                format!("\"{}\" has been marked as completed.", post.title),
            )
            .with_data(serde_json::json!({ "post_id": post.id, "message_id": winner.id })),
        )
        .await;

        let (conversations_deleted, cleanup_failures) = self.retire_conversations(post.id).await;

        Ok(ConfirmationReport {
            post_id: post.id,
            conversation_id: conversation.id,
            message_id: winner.id,
            rejected,
            notified_users,
            conversations_deleted,
            cleanup_failures,
        })
    }

    /// Step 0. Re-entrant for the lock holder so a failed confirmation can be retried.
    async fn reserve(
        &self,
        post_id: PostId,
        conversation_id: ConversationId,
        message_id: MessageId,
        kind: RequestKind,
        confirmer: &ActingUser,
    ) -> Result<()> {
        let lock = ResolutionLock {
            conversation_id,
            message_id,
            confirmer_id: confirmer.id.clone(),
            locked_at: self.store.server_time(),
        };
        let mut batch = WriteBatch::new()
            .require(Precondition::ResolutionAvailable {
                post_id,
                conversation_id,
                message_id,
            })
            .require(Precondition::RequestStatusIn {
                conversation_id,
                message_id,
                allowed: vec![RequestStatus::AcceptedPendingConfirmation],
            })
            .op(WriteOp::UpdatePost {
                id: post_id,
                updates: vec![PostUpdate::SetResolution(Some(lock))],
            });
        if kind == RequestKind::Claim {
            batch.push_precondition(Precondition::ClaimEligible(post_id));
        }
        self.store.commit(batch).await.inspect_err(|e| {
            info!(post_id = %post_id, message_id = %message_id, error = %e, "confirmation lost the resolution race");
        })
    }

    /// Steps 1-2.
    async fn sweep_rivals(
        &self,
        post_id: PostId,
        winner_conversation: ConversationId,
        confirmer: &ActingUser,
    ) -> Result<Vec<RejectedRequest>> {
        let mut rejected = Vec::new();
        for rival in self.store.conversations_for_post(post_id).await? {
            if rival.id == winner_conversation {
                continue;
            }
            for message in self.store.list_messages(rival.id).await? {
                if !message.is_active_request() {
                    continue;
                }
                if let Some(done) = self.reject_rival(&rival, &message, confirmer).await? {
                    rejected.push(done);
                }
            }
        }
        Ok(rejected)
    }

    async fn reject_rival(
        &self,
        rival: &Conversation,
        message: &Message,
        confirmer: &ActingUser,
    ) -> Result<Option<RejectedRequest>> {
        let Some((kind, request)) = message.request() else {
            return Ok(None);
        };
        let mut state = request.state.clone();
        state.reject(
            &confirmer.id,
            self.store.server_time(),
            Some(AUTO_REJECTION_REASON.to_string()),
        )?;

        let batch = WriteBatch::new()
            .require(Precondition::RequestStatusIn {
                conversation_id: rival.id,
                message_id: message.id,
                allowed: vec![
                    RequestStatus::Pending,
                    RequestStatus::AcceptedPendingConfirmation,
                ],
            })
            .op(WriteOp::SetRequestState {
                conversation_id: rival.id,
                message_id: message.id,
                state,
            })
            .op(WriteOp::UpdateConversation {
                id: rival.id,
                updates: vec![ConversationUpdate::ClearActiveRequest(message.id)],
            });

        match self.store.commit(batch).await {
            Ok(()) => {
                debug!(conversation_id = %rival.id, message_id = %message.id, "rival request rejected");
                self.events.emit(ResolutionEvent::Rejected {
                    conversation_id: rival.id,
                    message_id: message.id,
                    requester_id: request.requester_id.clone(),
                    reason: Some(AUTO_REJECTION_REASON.to_string()),
                });
                Ok(Some(RejectedRequest {
                    conversation_id: rival.id,
                    message_id: message.id,
                    requester_id: request.requester_id.clone(),
                    kind,
                }))
            }
            // Already terminal or already gone: nothing left to unwind.
            Err(AppError::Conflict(_)) | Err(AppError::NotFound(..)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Step 3. Returns how many users were notified.
    async fn notify_rejected(&self, post: &Post, rejected: &[RejectedRequest]) -> usize {
        let mut by_user: BTreeMap<&UserId, Vec<&RejectedRequest>> = BTreeMap::new();
        for r in rejected {
            by_user.entry(&r.requester_id).or_default().push(r);
        }

        let sends = by_user.iter().map(|(user, requests)| {
            let body = if requests.len() == 1 {
                format!(
                    "Your {} request for \"{}\" was closed: {}.",
                    requests[0].kind.label(),
                    post.title,
                    AUTO_REJECTION_REASON
                )
            } else {
                format!(
                    "{} of your requests for \"{}\" were closed: {}.",
                    requests.len(),
                    post.title,
                    AUTO_REJECTION_REASON
                )
            };
            let message_ids: Vec<MessageId> = requests.iter().map(|r| r.message_id).collect();
            let notification = Notification::new(
                NotificationKind::RequestsAutoRejected,
                "Request closed",
                body,
            )
            .with_data(serde_json::json!({ "post_id": post.id, "message_ids": message_ids }));
            let recipients = [(*user).clone()];
            async move { dispatch(self.notifier.as_ref(), &recipients, notification).await }
        });
        join_all(sends).await;
        by_user.len()
    }

    /// Step 5. Returns (deleted, failed).
    async fn retire_conversations(&self, post_id: PostId) -> (usize, usize) {
        let conversations = match self.store.conversations_for_post(post_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "could not list conversations for cleanup");
                return (0, 1);
            }
        };

        let mut deleted = 0;
        let mut failed = 0;
        for conversation in conversations {
            let batch = WriteBatch::new().op(WriteOp::DeleteConversation(conversation.id));
            match self.store.commit(batch).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        post_id = %post_id,
                        conversation_id = %conversation.id,
                        error = %e,
                        "conversation cleanup failed"
                    );
                }
            }
        }
        debug!(post_id = %post_id, deleted, failed, "conversations retired");
        (deleted, failed)
    }
}
