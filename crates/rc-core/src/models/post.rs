//! The item report and its custody/turnover sub-record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, MessageId, PostId, UserId};
use super::user::{ParticipantProfile, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Lost,
    Found,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    /// Moved here by the expiration sweep after a period of inactivity.
    Unclaimed,
    /// Closed by its creator outside the chat flow.
    Resolved,
    /// A handover or claim was confirmed. Terminal.
    Completed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Unclaimed => "unclaimed",
            Self::Resolved => "resolved",
            Self::Completed => "completed",
        }
    }
}

/// Custody decision for a found item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoundAction {
    Keep,
    TurnoverOsa,
    TurnoverCampusSecurity,
}

impl FoundAction {
    pub fn is_turnover(&self) -> bool {
        !matches!(self, FoundAction::Keep)
    }

    /// Whether `role` may confirm receipt of an item turned over this way.
    pub fn custodian_accepts(&self, role: Role) -> bool {
        match self {
            FoundAction::Keep => false,
            FoundAction::TurnoverOsa => role == Role::Admin,
            FoundAction::TurnoverCampusSecurity => {
                matches!(role, Role::Admin | Role::CampusSecurity)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnoverStatus {
    Declared,
    Confirmed,
    NotReceived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnoverDetails {
    pub turnover_action: FoundAction,
    pub turnover_status: TurnoverStatus,
    pub declared_by: UserId,
    pub declared_at: DateTime<Utc>,
    pub confirmed_by: Option<UserId>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Reservation taken by the first confirm for this post.
///
/// Only the holder may finish the resolution; everyone else loses with a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionLock {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub confirmer_id: UserId,
    pub locked_at: DateTime<Utc>,
}

impl ResolutionLock {
    pub fn held_by(&self, conversation_id: ConversationId, message_id: MessageId) -> bool {
        self.conversation_id == conversation_id && self.message_id == message_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub kind: PostKind,
    pub title: String,
    pub description: Option<String>,
    pub status: PostStatus,
    pub found_action: Option<FoundAction>,
    pub turnover: Option<TurnoverDetails>,
    pub creator_id: UserId,
    /// Normalized once at creation so conversations can copy it without re-deriving.
    pub creator_profile: ParticipantProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub moved_to_unclaimed: bool,
    pub resolution: Option<ResolutionLock>,
}

impl Post {
    pub fn turnover_status(&self) -> Option<TurnoverStatus> {
        self.turnover.as_ref().map(|t| t.turnover_status)
    }

    /// Shown in public listings.
    ///
    /// OSA-bound items stay hidden until the office confirms it holds them, and an
    /// item the custodian never received is hidden until re-declared.
    pub fn is_publicly_listed(&self) -> bool {
        if self.status == PostStatus::Completed {
            return false;
        }
        match &self.turnover {
            None => true,
            Some(t) => match t.turnover_status {
                TurnoverStatus::Confirmed => true,
                TurnoverStatus::NotReceived => false,
                TurnoverStatus::Declared => t.turnover_action != FoundAction::TurnoverOsa,
            },
        }
    }

    /// Custody is settled enough for someone to claim the item.
    pub fn is_claim_eligible(&self) -> bool {
        match self.turnover_status() {
            None => true,
            Some(status) => status == TurnoverStatus::Confirmed,
        }
    }

    /// New requests may only be opened on pending posts nobody is resolving.
    pub fn accepts_requests(&self) -> bool {
        self.status == PostStatus::Pending && self.resolution.is_none()
    }

    pub fn apply(&mut self, update: &PostUpdate, at: DateTime<Utc>) {
        match update {
            PostUpdate::SetStatus(status) => self.status = *status,
            PostUpdate::SetFoundAction(action) => self.found_action = *action,
            PostUpdate::SetTurnover(details) => self.turnover = details.clone(),
            PostUpdate::SetMovedToUnclaimed(moved) => self.moved_to_unclaimed = *moved,
            PostUpdate::SetResolution(lock) => self.resolution = lock.clone(),
        }
        self.updated_at = at;
    }
}

/// Field-level mutation applied by the store under its document lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostUpdate {
    SetStatus(PostStatus),
    SetFoundAction(Option<FoundAction>),
    SetTurnover(Option<TurnoverDetails>),
    SetMovedToUnclaimed(bool),
    SetResolution(Option<ResolutionLock>),
}
