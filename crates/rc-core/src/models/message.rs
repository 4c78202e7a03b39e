//! Messages stored under a conversation, including the claim/handover request variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, MessageId, UserId};
use super::post::PostKind;

/// Longest `LastMessage::preview` we cache on the conversation.
pub const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    #[serde(rename = "handover_request")]
    Handover,
    #[serde(rename = "claim_request")]
    Claim,
}

impl RequestKind {
    /// Handovers return lost items, claims recover found ones.
    pub fn post_kind(&self) -> PostKind {
        match self {
            RequestKind::Handover => PostKind::Lost,
            RequestKind::Claim => PostKind::Found,
        }
    }

    pub fn for_post(kind: PostKind) -> Self {
        match kind {
            PostKind::Lost => RequestKind::Handover,
            PostKind::Found => RequestKind::Claim,
        }
    }

    /// Media folder the verification photos are uploaded into.
    pub fn upload_folder(&self) -> &'static str {
        match self {
            RequestKind::Handover => "handover-requests",
            RequestKind::Claim => "claim-requests",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::Handover => "handover",
            RequestKind::Claim => "claim",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    AcceptedPendingConfirmation,
    Rejected,
    Confirmed,
}

impl RequestStatus {
    /// Pending or accepted; the request still occupies its conversation's slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RequestStatus::Pending | RequestStatus::AcceptedPendingConfirmation
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestState {
    pub status: RequestStatus,
    pub responded_by: Option<UserId>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Photo the responder took when accepting.
    pub verification_photo_url: Option<String>,
    /// Set when an admin accepted without a verification photo.
    #[serde(default)]
    pub verification_bypassed: bool,
    pub confirmed_by: Option<UserId>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl Default for RequestState {
    fn default() -> Self {
        Self {
            status: RequestStatus::Pending,
            responded_by: None,
            responded_at: None,
            verification_photo_url: None,
            verification_bypassed: false,
            confirmed_by: None,
            confirmed_at: None,
            rejection_reason: None,
        }
    }
}

/// Verification data submitted with a claim or handover.
/// Only `state` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub requester_id: UserId,
    pub reason: String,
    pub id_photo_url: String,
    pub evidence_photos: Vec<String>,
    pub state: RequestState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    Image { url: String },
    System { text: String },
    HandoverRequest(RequestMessage),
    ClaimRequest(RequestMessage),
}

impl MessageBody {
    pub fn request(kind: RequestKind, request: RequestMessage) -> Self {
        match kind {
            RequestKind::Handover => MessageBody::HandoverRequest(request),
            RequestKind::Claim => MessageBody::ClaimRequest(request),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sent_at: DateTime<Utc>,
    pub body: MessageBody,
}

impl Message {
    pub fn request(&self) -> Option<(RequestKind, &RequestMessage)> {
        match &self.body {
            MessageBody::HandoverRequest(r) => Some((RequestKind::Handover, r)),
            MessageBody::ClaimRequest(r) => Some((RequestKind::Claim, r)),
            _ => None,
        }
    }

    pub fn request_mut(&mut self) -> Option<&mut RequestMessage> {
        match &mut self.body {
            MessageBody::HandoverRequest(r) | MessageBody::ClaimRequest(r) => Some(r),
            _ => None,
        }
    }

    /// A request still pending or awaiting confirmation.
    pub fn is_active_request(&self) -> bool {
        self.request()
            .map(|(_, r)| r.state.status.is_active())
            .unwrap_or(false)
    }

    pub fn preview(&self) -> String {
        let text = match &self.body {
            MessageBody::Text { text } | MessageBody::System { text } => text.clone(),
            MessageBody::Image { .. } => "Sent a photo".to_string(),
            MessageBody::HandoverRequest(_) => "Sent a handover request".to_string(),
            MessageBody::ClaimRequest(_) => "Sent a claim request".to_string(),
        };
        text.chars().take(PREVIEW_CHARS).collect()
    }

    /// Log order: server timestamp, then the time-ordered id.
    pub fn log_order(&self) -> (DateTime<Utc>, MessageId) {
        (self.sent_at, self.id)
    }
}

/// Sorts a message log oldest first.
pub fn sort_log(messages: &mut [Message]) {
    messages.sort_by_key(Message::log_order);
}

/// Picks the oldest messages of a sorted `log` to drop so it holds at most `cap`.
///
/// `keep` (the conversation's open request) is never evicted; the request's
/// guard pointer must keep resolving while the request is live.
pub fn select_evictions(log: &[Message], keep: Option<MessageId>, cap: usize) -> Vec<MessageId> {
    let excess = log.len().saturating_sub(cap);
    log.iter()
        .filter(|m| Some(m.id) != keep)
        .take(excess)
        .map(|m| m.id)
        .collect()
}
