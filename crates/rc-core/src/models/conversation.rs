//! One chat per (post, counterpart) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{ConversationId, MessageId, PostId, UserId};
use super::message::{Message, RequestKind};
use super::post::PostKind;
use super::user::ParticipantProfile;

/// Pointer from a conversation to its open request message.
/// Replaces the separate `hasClaimRequest` / `hasHandoverRequest` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRequest {
    pub kind: RequestKind,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub preview: String,
    pub sent_at: DateTime<Utc>,
}

impl LastMessage {
    pub fn of(message: &Message) -> Self {
        Self {
            message_id: message.id,
            sender_id: message.sender_id.clone(),
            preview: message.preview(),
            sent_at: message.sent_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub post_id: PostId,
    pub post_kind: PostKind,
    pub post_title: String,
    pub poster_id: UserId,
    /// The other side of the chat; an admin when staff step in for a user.
    pub counterpart_id: UserId,
    pub participants: BTreeMap<UserId, ParticipantProfile>,
    pub active_request: Option<ActiveRequest>,
    pub unread_counts: BTreeMap<UserId, u32>,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_claim_request(&self) -> bool {
        matches!(self.active_request, Some(ActiveRequest { kind: RequestKind::Claim, .. }))
    }

    pub fn has_handover_request(&self) -> bool {
        matches!(
            self.active_request,
            Some(ActiveRequest { kind: RequestKind::Handover, .. })
        )
    }

    pub fn is_participant(&self, user_id: &UserId) -> bool {
        &self.poster_id == user_id || &self.counterpart_id == user_id
    }

    /// The other member of the pair, if `user_id` is one of them.
    pub fn other_participant(&self, user_id: &UserId) -> Option<&UserId> {
        if &self.poster_id == user_id {
            Some(&self.counterpart_id)
        } else if &self.counterpart_id == user_id {
            Some(&self.poster_id)
        } else {
            None
        }
    }

    pub fn unread_for(&self, user_id: &UserId) -> u32 {
        self.unread_counts.get(user_id).copied().unwrap_or(0)
    }

    pub fn apply(&mut self, update: &ConversationUpdate, at: DateTime<Utc>) {
        match update {
            ConversationUpdate::SetActiveRequest(active) => self.active_request = *active,
            ConversationUpdate::ClearActiveRequest(message_id) => {
                if self.active_request.map(|a| a.message_id) == Some(*message_id) {
                    self.active_request = None;
                }
            }
            ConversationUpdate::RecordMessage { last, notify } => {
                for user in notify {
                    *self.unread_counts.entry(user.clone()).or_insert(0) += 1;
                }
                self.last_message = Some(last.clone());
            }
            ConversationUpdate::ResetUnread(user) => {
                self.unread_counts.insert(user.clone(), 0);
            }
            ConversationUpdate::SetParticipant { user, profile } => {
                self.participants.insert(user.clone(), profile.clone());
            }
        }
        self.updated_at = at;
    }
}

/// Field-level mutation applied by the store under its document lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationUpdate {
    SetActiveRequest(Option<ActiveRequest>),
    /// Clears the pointer only if it still references this message.
    ClearActiveRequest(MessageId),
    RecordMessage { last: LastMessage, notify: Vec<UserId> },
    ResetUnread(UserId),
    SetParticipant { user: UserId, profile: ParticipantProfile },
}
