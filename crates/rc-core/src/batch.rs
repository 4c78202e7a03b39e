//! # Atomic multi-document writes
//!
//! A `WriteBatch` is a list of preconditions plus a list of field-level operations.
//! Store adapters load the documents the batch names (`keys`) into a `WorkingSet`,
//! call `apply`, and persist the resulting `DocumentWrite`s in one transaction.
//! Either every precondition holds and every op applies, or nothing is written.
//!
//! Keeping the apply logic here means the in-memory store and the SQLite store
//! cannot drift apart on semantics.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::error::{AppError, Result};
use crate::hub::ChangeEvent;
use crate::models::{
    select_evictions, sort_log, Conversation, ConversationId, ConversationUpdate, Message,
    MessageId, Post, PostId, PostStatus, PostUpdate, RequestState, RequestStatus, TurnoverStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Post is pending and nobody holds its resolution lock.
    PostAcceptingRequests(PostId),
    /// Post is still open and its lock is free or already held by this request.
    ResolutionAvailable {
        post_id: PostId,
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    /// This request holds the post's resolution lock.
    ResolutionHeld {
        post_id: PostId,
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    PostStatusIn {
        post_id: PostId,
        allowed: Vec<PostStatus>,
    },
    /// `None` in `allowed` matches a post with no turnover record.
    TurnoverStatusIn {
        post_id: PostId,
        allowed: Vec<Option<TurnoverStatus>>,
    },
    /// No turnover was declared, or the custodian confirmed receipt.
    ClaimEligible(PostId),
    ConversationExists(ConversationId),
    ConversationAbsent(ConversationId),
    NoActiveRequest(ConversationId),
    /// The conversation still points at this (stale) request.
    ActiveRequestIs {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    RequestStatusIn {
        conversation_id: ConversationId,
        message_id: MessageId,
        allowed: Vec<RequestStatus>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    CreatePost(Post),
    UpdatePost {
        id: PostId,
        updates: Vec<PostUpdate>,
    },
    CreateConversation(Conversation),
    UpdateConversation {
        id: ConversationId,
        updates: Vec<ConversationUpdate>,
    },
    /// Removes the conversation and its whole message log.
    DeleteConversation(ConversationId),
    PutMessage(Message),
    SetRequestState {
        conversation_id: ConversationId,
        message_id: MessageId,
        state: RequestState,
    },
    DeleteMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    /// Evicts the oldest messages until the log holds at most `cap`.
    /// The conversation's open request is never evicted.
    TrimLog {
        conversation_id: ConversationId,
        cap: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub preconditions: Vec<Precondition>,
    pub ops: Vec<WriteOp>,
}

/// Documents a batch needs loaded before it can be applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentKeys {
    pub posts: HashSet<PostId>,
    pub conversations: HashSet<ConversationId>,
    pub messages: HashSet<(ConversationId, MessageId)>,
    /// Conversations whose whole message log must be staged.
    pub logs: HashSet<ConversationId>,
}

/// A persisted effect of an applied batch, in application order.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentWrite {
    UpsertPost(Post),
    UpsertConversation(Conversation),
    DeleteConversation(ConversationId),
    UpsertMessage(Message),
    DeleteMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedBatch {
    pub writes: Vec<DocumentWrite>,
    pub events: Vec<ChangeEvent>,
}

/// Staged copies of the documents a batch touches. `None` means absent.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    posts: HashMap<PostId, Option<Post>>,
    conversations: HashMap<ConversationId, Option<Conversation>>,
    messages: HashMap<(ConversationId, MessageId), Option<Message>>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_post(&mut self, id: PostId, post: Option<Post>) {
        self.posts.insert(id, post);
    }

    pub fn insert_conversation(&mut self, id: ConversationId, conversation: Option<Conversation>) {
        self.conversations.insert(id, conversation);
    }

    pub fn insert_message(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        message: Option<Message>,
    ) {
        self.messages.insert((conversation_id, message_id), message);
    }

    /// Stages every stored message of a conversation.
    pub fn insert_log(&mut self, conversation_id: ConversationId, log: Vec<Message>) {
        for message in log {
            self.messages
                .insert((conversation_id, message.id), Some(message));
        }
    }

    fn post(&self, id: &PostId) -> Option<&Post> {
        self.posts.get(id).and_then(Option::as_ref)
    }

    fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id).and_then(Option::as_ref)
    }

    fn message(&self, conversation_id: ConversationId, message_id: MessageId) -> Option<&Message> {
        self.messages
            .get(&(conversation_id, message_id))
            .and_then(Option::as_ref)
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn op(mut self, op: WriteOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn push_precondition(&mut self, precondition: Precondition) {
        self.preconditions.push(precondition);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn is_unconditional(&self) -> bool {
        self.preconditions.is_empty()
    }

    /// Appends `other`'s preconditions and ops. Used to coalesce queued writes.
    pub fn merge(&mut self, other: WriteBatch) {
        self.preconditions.extend(other.preconditions);
        self.ops.extend(other.ops);
    }

    pub fn keys(&self) -> DocumentKeys {
        let mut keys = DocumentKeys::default();
        for p in &self.preconditions {
            match p {
                Precondition::PostAcceptingRequests(post_id)
                | Precondition::ClaimEligible(post_id)
                | Precondition::PostStatusIn { post_id, .. }
                | Precondition::TurnoverStatusIn { post_id, .. } => {
                    keys.posts.insert(*post_id);
                }
                Precondition::ResolutionAvailable { post_id, .. }
                | Precondition::ResolutionHeld { post_id, .. } => {
                    keys.posts.insert(*post_id);
                }
                Precondition::ConversationExists(id)
                | Precondition::ConversationAbsent(id)
                | Precondition::NoActiveRequest(id)
                | Precondition::ActiveRequestIs {
                    conversation_id: id,
                    ..
                } => {
                    keys.conversations.insert(*id);
                }
                Precondition::RequestStatusIn {
                    conversation_id,
                    message_id,
                    ..
                } => {
                    keys.messages.insert((*conversation_id, *message_id));
                }
            }
        }
        for op in &self.ops {
            match op {
                WriteOp::CreatePost(post) => {
                    keys.posts.insert(post.id);
                }
                WriteOp::UpdatePost { id, .. } => {
                    keys.posts.insert(*id);
                }
                WriteOp::CreateConversation(conversation) => {
                    keys.conversations.insert(conversation.id);
                }
                WriteOp::UpdateConversation { id, .. } | WriteOp::DeleteConversation(id) => {
                    keys.conversations.insert(*id);
                }
                WriteOp::PutMessage(message) => {
                    keys.conversations.insert(message.conversation_id);
                    keys.messages.insert((message.conversation_id, message.id));
                }
                WriteOp::SetRequestState {
                    conversation_id,
                    message_id,
                    ..
                }
                | WriteOp::DeleteMessage {
                    conversation_id,
                    message_id,
                } => {
                    keys.messages.insert((*conversation_id, *message_id));
                }
                WriteOp::TrimLog {
                    conversation_id, ..
                } => {
                    keys.conversations.insert(*conversation_id);
                    keys.logs.insert(*conversation_id);
                }
            }
        }
        keys
    }

    /// Checks every precondition, then applies every op to `ws`.
    ///
    /// `ws` must contain an entry (possibly `None`) for every key in `self.keys()`.
    pub fn apply(&self, mut ws: WorkingSet, at: DateTime<Utc>) -> Result<AppliedBatch> {
        for precondition in &self.preconditions {
            check(&ws, precondition)?;
        }

        let mut out = AppliedBatch::default();
        for op in &self.ops {
            apply_op(&mut ws, op, at, &mut out)?;
        }
        Ok(out)
    }
}

fn require_post<'a>(ws: &'a WorkingSet, id: &PostId) -> Result<&'a Post> {
    ws.post(id).ok_or_else(|| AppError::not_found("Post", id))
}

fn check(ws: &WorkingSet, precondition: &Precondition) -> Result<()> {
    let post = |id: &PostId| require_post(ws, id);
    match precondition {
        Precondition::PostAcceptingRequests(id) => {
            let post = post(id)?;
            if !post.accepts_requests() {
                return Err(AppError::conflict("item is no longer accepting requests"));
            }
        }
        Precondition::ResolutionAvailable {
            post_id,
            conversation_id,
            message_id,
        } => {
            let post = post(post_id)?;
            if matches!(post.status, PostStatus::Completed | PostStatus::Resolved) {
                return Err(AppError::conflict("item has already been resolved"));
            }
            if let Some(lock) = &post.resolution {
                if !lock.held_by(*conversation_id, *message_id) {
                    return Err(AppError::conflict(
                        "another request is being confirmed for this item",
                    ));
                }
            }
        }
        Precondition::ResolutionHeld {
            post_id,
            conversation_id,
            message_id,
        } => {
            let post = post(post_id)?;
            let held = post
                .resolution
                .as_ref()
                .map(|lock| lock.held_by(*conversation_id, *message_id))
                .unwrap_or(false);
            if !held || post.status == PostStatus::Completed {
                return Err(AppError::conflict("resolution lock is not held by this request"));
            }
        }
        Precondition::PostStatusIn { post_id, allowed } => {
            let post = post(post_id)?;
            if !allowed.contains(&post.status) {
                return Err(AppError::conflict(format!(
                    "item status is {:?}",
                    post.status
                )));
            }
        }
        Precondition::TurnoverStatusIn { post_id, allowed } => {
            let post = post(post_id)?;
            if !allowed.contains(&post.turnover_status()) {
                return Err(AppError::conflict("turnover status changed"));
            }
        }
        Precondition::ClaimEligible(id) => {
            if !post(id)?.is_claim_eligible() {
                return Err(AppError::conflict("custody of the item is not settled"));
            }
        }
        Precondition::ConversationExists(id) => {
            if ws.conversation(id).is_none() {
                return Err(AppError::not_found("Conversation", id));
            }
        }
        Precondition::ConversationAbsent(id) => {
            if ws.conversation(id).is_some() {
                return Err(AppError::conflict("conversation already exists"));
            }
        }
        Precondition::NoActiveRequest(id) => {
            let conversation = ws
                .conversation(id)
                .ok_or_else(|| AppError::not_found("Conversation", id))?;
            if conversation.active_request.is_some() {
                return Err(AppError::conflict("pending request exists"));
            }
        }
        Precondition::ActiveRequestIs {
            conversation_id,
            message_id,
        } => {
            let conversation = ws
                .conversation(conversation_id)
                .ok_or_else(|| AppError::not_found("Conversation", conversation_id))?;
            if conversation.active_request.map(|a| a.message_id) != Some(*message_id) {
                return Err(AppError::conflict("pending request exists"));
            }
        }
        Precondition::RequestStatusIn {
            conversation_id,
            message_id,
            allowed,
        } => {
            let message = ws
                .message(*conversation_id, *message_id)
                .ok_or_else(|| AppError::not_found("Message", message_id))?;
            let status = message
                .request()
                .map(|(_, r)| r.state.status)
                .ok_or_else(|| AppError::validation("message is not a request"))?;
            if !allowed.contains(&status) {
                return Err(AppError::conflict(format!("request is {}", status.as_str())));
            }
        }
    }
    Ok(())
}

fn apply_op(ws: &mut WorkingSet, op: &WriteOp, at: DateTime<Utc>, out: &mut AppliedBatch) -> Result<()> {
    match op {
        WriteOp::CreatePost(post) => {
            ws.posts.insert(post.id, Some(post.clone()));
            out.writes.push(DocumentWrite::UpsertPost(post.clone()));
            out.events.push(ChangeEvent::PostChanged(post.clone()));
        }
        WriteOp::UpdatePost { id, updates } => {
            let post = ws
                .posts
                .get_mut(id)
                .and_then(Option::as_mut)
                .ok_or_else(|| AppError::not_found("Post", id))?;
            for update in updates {
                post.apply(update, at);
            }
            out.writes.push(DocumentWrite::UpsertPost(post.clone()));
            out.events.push(ChangeEvent::PostChanged(post.clone()));
        }
        WriteOp::CreateConversation(conversation) => {
            ws.conversations
                .insert(conversation.id, Some(conversation.clone()));
            out.writes
                .push(DocumentWrite::UpsertConversation(conversation.clone()));
            out.events
                .push(ChangeEvent::ConversationChanged(conversation.clone()));
        }
        WriteOp::UpdateConversation { id, updates } => {
            let conversation = ws
                .conversations
                .get_mut(id)
                .and_then(Option::as_mut)
                .ok_or_else(|| AppError::not_found("Conversation", id))?;
            for update in updates {
                conversation.apply(update, at);
            }
            out.writes
                .push(DocumentWrite::UpsertConversation(conversation.clone()));
            out.events
                .push(ChangeEvent::ConversationChanged(conversation.clone()));
        }
        WriteOp::DeleteConversation(id) => {
            let Some(snapshot) = ws.conversations.get_mut(id).and_then(Option::take) else {
                // Already gone; deletes are idempotent.
                return Ok(());
            };
            for ((conversation_id, _), message) in ws.messages.iter_mut() {
                if conversation_id == id {
                    *message = None;
                }
            }
            out.writes.push(DocumentWrite::DeleteConversation(*id));
            out.events.push(ChangeEvent::ConversationDeleted(snapshot));
        }
        WriteOp::PutMessage(message) => {
            if ws.conversation(&message.conversation_id).is_none() {
                return Err(AppError::not_found("Conversation", message.conversation_id));
            }
            let previous = ws
                .messages
                .insert((message.conversation_id, message.id), Some(message.clone()));
            out.writes.push(DocumentWrite::UpsertMessage(message.clone()));
            out.events.push(match previous {
                Some(Some(_)) => ChangeEvent::MessageModified(message.clone()),
                _ => ChangeEvent::MessageAdded(message.clone()),
            });
        }
        WriteOp::SetRequestState {
            conversation_id,
            message_id,
            state,
        } => {
            let message = ws
                .messages
                .get_mut(&(*conversation_id, *message_id))
                .and_then(Option::as_mut)
                .ok_or_else(|| AppError::not_found("Message", message_id))?;
            let request = message
                .request_mut()
                .ok_or_else(|| AppError::validation("message is not a request"))?;
            request.state = state.clone();
            out.writes.push(DocumentWrite::UpsertMessage(message.clone()));
            out.events.push(ChangeEvent::MessageModified(message.clone()));
        }
        WriteOp::DeleteMessage {
            conversation_id,
            message_id,
        } => {
            if let Some(slot) = ws.messages.get_mut(&(*conversation_id, *message_id)) {
                if slot.take().is_some() {
                    out.writes.push(DocumentWrite::DeleteMessage {
                        conversation_id: *conversation_id,
                        message_id: *message_id,
                    });
                    out.events.push(ChangeEvent::MessageRemoved {
                        conversation_id: *conversation_id,
                        message_id: *message_id,
                    });
                }
            }
        }
        WriteOp::TrimLog {
            conversation_id,
            cap,
        } => {
            let keep = ws
                .conversation(conversation_id)
                .ok_or_else(|| AppError::not_found("Conversation", conversation_id))?
                .active_request
                .map(|a| a.message_id);
            let mut log: Vec<Message> = ws
                .messages
                .iter()
                .filter(|((c, _), _)| c == conversation_id)
                .filter_map(|(_, m)| m.clone())
                .collect();
            sort_log(&mut log);
            for message_id in select_evictions(&log, keep, *cap) {
                let evict = WriteOp::DeleteMessage {
                    conversation_id: *conversation_id,
                    message_id,
                };
                apply_op(ws, &evict, at, out)?;
            }
        }
    }
    Ok(())
}
