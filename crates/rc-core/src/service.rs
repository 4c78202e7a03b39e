//! # Request service
//!
//! Claim and handover requests: submission with verification photos, the
//! responder's accept/reject, and the requester's confirm/decline.

use std::sync::Arc;
use tracing::{info, warn};

use crate::batch::{Precondition, WriteBatch, WriteOp};
use crate::coordinator::{ConfirmationCoordinator, ConfirmationReport};
use crate::error::{AppError, Result};
use crate::events::{EventBus, ResolutionEvent};
use crate::media::{ImageUpload, ProgressFn, Uploader};
use crate::models::{
    ActiveRequest, ActingUser, Conversation, ConversationId, ConversationUpdate, Message,
    MessageBody, MessageId, PostId, PostKind, RequestKind, RequestMessage, RequestState,
    RequestStatus, UserId,
};
use crate::notify::{dispatch, Notification, NotificationKind};
use crate::registry::ConversationRegistry;
use crate::request::Verification;
use crate::traits::{DocumentStore, NotificationDispatcher};

const VERIFICATION_FOLDER: &str = "verification";

/// What a requester fills in before submitting.
#[derive(Debug, Clone)]
pub struct RequestDraft {
    pub kind: RequestKind,
    pub reason: String,
    pub id_photo: Option<ImageUpload>,
    pub evidence: Vec<ImageUpload>,
}

impl RequestDraft {
    pub fn new(kind: RequestKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            id_photo: None,
            evidence: Vec::new(),
        }
    }

    pub fn with_id_photo(mut self, photo: ImageUpload) -> Self {
        self.id_photo = Some(photo);
        self
    }

    pub fn with_evidence(mut self, photo: ImageUpload) -> Self {
        self.evidence.push(photo);
        self
    }
}

/// The responder's answer to a pending request.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Needs a verification photo unless the responder is an admin and bypass is enabled.
    Accept {
        verification_photo: Option<ImageUpload>,
    },
    Reject {
        reason: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct RequestRules {
    pub max_evidence_photos: usize,
    pub allow_admin_photo_bypass: bool,
}

#[derive(Clone)]
pub struct RequestService {
    store: Arc<dyn DocumentStore>,
    registry: ConversationRegistry,
    uploader: Uploader,
    coordinator: ConfirmationCoordinator,
    notifier: Arc<dyn NotificationDispatcher>,
    events: EventBus,
    rules: RequestRules,
}

impl RequestService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: ConversationRegistry,
        uploader: Uploader,
        coordinator: ConfirmationCoordinator,
        notifier: Arc<dyn NotificationDispatcher>,
        events: EventBus,
        rules: RequestRules,
    ) -> Self {
        Self {
            store,
            registry,
            uploader,
            coordinator,
            notifier,
            events,
            rules,
        }
    }

    pub async fn submit(
        &self,
        conversation_id: ConversationId,
        requester: &ActingUser,
        draft: RequestDraft,
    ) -> Result<Message> {
        self.submit_with_progress(conversation_id, requester, draft, None)
            .await
    }

    /// Validates, guards against a second open request, uploads every photo as
    /// one bounded batch, then writes the request and the conversation's pointer
    /// to it atomically. Nothing is written if any step fails.
    pub async fn submit_with_progress(
        &self,
        conversation_id: ConversationId,
        requester: &ActingUser,
        draft: RequestDraft,
        on_progress: Option<ProgressFn>,
    ) -> Result<Message> {
        let RequestDraft {
            kind,
            reason,
            id_photo,
            evidence,
        } = draft;

        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(AppError::validation("a reason is required"));
        }
        let id_photo =
            id_photo.ok_or_else(|| AppError::validation("an ID photo is required"))?;
        if evidence.len() > self.rules.max_evidence_photos {
            return Err(AppError::validation(format!(
                "at most {} evidence photos are allowed",
                self.rules.max_evidence_photos
            )));
        }

        let conversation = self.load_conversation(conversation_id).await?;
        if kind.post_kind() != conversation.post_kind {
            return Err(AppError::validation(format!(
                "{} requests are not available on {} posts",
                kind.label(),
                post_kind_label(conversation.post_kind)
            )));
        }
        if conversation.counterpart_id != requester.id {
            return Err(AppError::unauthorized(
                "only the person who contacted the poster can submit this request",
            ));
        }

        let post = self
            .store
            .get_post(conversation.post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post", conversation.post_id))?;
        if !post.accepts_requests() {
            return Err(AppError::conflict("item is no longer accepting requests"));
        }
        if kind == RequestKind::Claim && !post.is_claim_eligible() {
            return Err(AppError::validation(
                "item cannot be claimed until its custodian confirms receipt",
            ));
        }

        let stale = self.ensure_no_open_request(&conversation).await?;

        let mut files = Vec::with_capacity(evidence.len() + 1);
        files.push(id_photo);
        files.extend(evidence);
        let mut urls = match self
            .uploader
            .upload_images(files, kind.upload_folder(), on_progress)
            .await
        {
            Ok(urls) => urls.into_iter(),
            Err(e) => {
                if let AppError::Upload(reason) = &e {
                    self.events.emit(ResolutionEvent::UploadFailed {
                        conversation_id,
                        reason: reason.clone(),
                    });
                }
                return Err(e);
            }
        };
        let id_photo_url = urls
            .next()
            .ok_or_else(|| AppError::internal("upload returned no ID photo url"))?;

        let message = Message {
            id: MessageId::new(),
            conversation_id,
            sender_id: requester.id.clone(),
            sent_at: self.store.server_time(),
            body: MessageBody::request(
                kind,
                RequestMessage {
                    requester_id: requester.id.clone(),
                    reason,
                    id_photo_url,
                    evidence_photos: urls.collect(),
                    state: RequestState::default(),
                },
            ),
        };

        let pointer = ConversationUpdate::SetActiveRequest(Some(ActiveRequest {
            kind,
            message_id: message.id,
        }));
        let mut batch = self
            .registry
            .message_batch(&conversation, &message, vec![pointer]);
        batch.push_precondition(match stale {
            // Replaces the stale pointer in the same write.
            Some(message_id) => Precondition::ActiveRequestIs {
                conversation_id,
                message_id,
            },
            None => Precondition::NoActiveRequest(conversation_id),
        });
        batch.push_precondition(Precondition::PostAcceptingRequests(post.id));
        if kind == RequestKind::Claim {
            batch.push_precondition(Precondition::ClaimEligible(post.id));
        }

        if let Err(e) = self.store.commit(batch).await {
            if matches!(e, AppError::Conflict(_)) {
                self.events.emit(ResolutionEvent::ConflictDetected {
                    conversation_id,
                    existing_message_id: None,
                });
            }
            return Err(e);
        }

        info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            kind = kind.label(),
            requester = %requester.id,
            "request submitted"
        );
        dispatch(
            self.notifier.as_ref(),
            std::slice::from_ref(&conversation.poster_id),
            Notification::new(
                NotificationKind::RequestReceived,
                format!("New {} request", kind.label()),
                format!("Someone sent a {} request for \"{}\".", kind.label(), post.title),
            )
            .with_data(serde_json::json!({
                "conversation_id": conversation_id,
                "message_id": message.id,
            })),
        )
        .await;
        self.events.emit(ResolutionEvent::Submitted {
            conversation_id,
            message_id: message.id,
            kind,
        });
        Ok(message)
    }

    /// Accept or reject a pending request. Only the other participant or an admin may answer.
    pub async fn respond(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        responder: &ActingUser,
        decision: Decision,
    ) -> Result<Message> {
        let conversation = self.load_conversation(conversation_id).await?;
        let message = self.load_request(conversation_id, message_id).await?;
        let (kind, request) = message
            .request()
            .ok_or_else(|| AppError::validation("message is not a request"))?;

        let is_responder = conversation.is_participant(&responder.id)
            && responder.id != request.requester_id;
        if !is_responder && !responder.is_admin() {
            return Err(AppError::unauthorized("only the poster can answer this request"));
        }
        if request.state.status != RequestStatus::Pending {
            return Err(AppError::conflict(format!(
                "request is {}, not pending",
                request.state.status.as_str()
            )));
        }

        let now = self.store.server_time();
        let mut state = request.state.clone();
        let requester_id = request.requester_id.clone();

        match decision {
            Decision::Reject { reason } => {
                let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
                state.reject(&responder.id, now, reason.clone())?;
                let batch = self
                    .transition(conversation_id, message_id, RequestStatus::Pending, state)
                    .op(WriteOp::UpdateConversation {
                        id: conversation_id,
                        updates: vec![ConversationUpdate::ClearActiveRequest(message_id)],
                    });
                self.store.commit(batch).await?;

                info!(conversation_id = %conversation_id, message_id = %message_id, "request rejected");
                self.events.emit(ResolutionEvent::Rejected {
                    conversation_id,
                    message_id,
                    requester_id: requester_id.clone(),
                    reason: reason.clone(),
                });
                self.notify_requester(
                    &requester_id,
                    NotificationKind::RequestRejected,
                    format!("Your {} request was declined", kind.label()),
                    reason.unwrap_or_else(|| conversation.post_title.clone()),
                    conversation_id,
                    message_id,
                )
                .await;
            }
            Decision::Accept { verification_photo } => {
                if kind == RequestKind::Claim {
                    self.ensure_claim_eligible(conversation.post_id).await?;
                }
                let verification = match verification_photo {
                    Some(photo) => {
                        let url = self
                            .uploader
                            .upload_image(photo, VERIFICATION_FOLDER)
                            .await
                            .inspect_err(|e| {
                                if let AppError::Upload(reason) = e {
                                    self.events.emit(ResolutionEvent::UploadFailed {
                                        conversation_id,
                                        reason: reason.clone(),
                                    });
                                }
                            })?;
                        Verification::Photo(url)
                    }
                    None if responder.is_admin() && self.rules.allow_admin_photo_bypass => {
                        warn!(
                            conversation_id = %conversation_id,
                            message_id = %message_id,
                            admin = %responder.id,
                            "request accepted without verification photo"
                        );
                        Verification::Bypassed
                    }
                    None => {
                        return Err(AppError::validation(
                            "a verification photo is required to accept a request",
                        ))
                    }
                };
                state.accept(&responder.id, now, verification)?;
                let mut batch = self
                    .transition(conversation_id, message_id, RequestStatus::Pending, state)
                    .require(Precondition::PostAcceptingRequests(conversation.post_id));
                if kind == RequestKind::Claim {
                    batch.push_precondition(Precondition::ClaimEligible(conversation.post_id));
                }
                self.store.commit(batch).await?;

                info!(conversation_id = %conversation_id, message_id = %message_id, "request accepted");
                self.notify_requester(
                    &requester_id,
                    NotificationKind::RequestAccepted,
                    format!("Your {} request was accepted", kind.label()),
                    format!("Confirm to finish resolving \"{}\".", conversation.post_title),
                    conversation_id,
                    message_id,
                )
                .await;
            }
        }

        self.load_request(conversation_id, message_id).await
    }

    /// Finalizes an accepted request. At most one request per post ever succeeds here.
    pub async fn confirm(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        confirmer: &ActingUser,
    ) -> Result<ConfirmationReport> {
        let conversation = self.load_conversation(conversation_id).await?;
        let message = self.load_request(conversation_id, message_id).await?;
        let (kind, request) = message
            .request()
            .ok_or_else(|| AppError::validation("message is not a request"))?;
        self.ensure_confirmer(confirmer, &request.requester_id)?;
        if request.state.status != RequestStatus::AcceptedPendingConfirmation {
            return Err(AppError::conflict(format!(
                "request is {}, not awaiting confirmation",
                request.state.status.as_str()
            )));
        }

        let post = self
            .store
            .get_post(conversation.post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post", conversation.post_id))?;
        if kind == RequestKind::Claim && !post.is_claim_eligible() {
            return Err(AppError::validation(
                "item cannot be claimed until its custodian confirms receipt",
            ));
        }

        let report = self
            .coordinator
            .resolve(&post, &conversation, &message, confirmer)
            .await?;
        self.events.emit(ResolutionEvent::Confirmed {
            post_id: report.post_id,
            conversation_id,
            message_id,
            rejected_rivals: report.rejected.len(),
        });
        Ok(report)
    }

    /// The requester backs out of an accepted request.
    pub async fn decline(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        confirmer: &ActingUser,
        reason: Option<String>,
    ) -> Result<Message> {
        let conversation = self.load_conversation(conversation_id).await?;
        let message = self.load_request(conversation_id, message_id).await?;
        let (kind, request) = message
            .request()
            .ok_or_else(|| AppError::validation("message is not a request"))?;
        self.ensure_confirmer(confirmer, &request.requester_id)?;

        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let mut state = request.state.clone();
        state.reject(&confirmer.id, self.store.server_time(), reason.clone())?;
        let batch = self
            .transition(
                conversation_id,
                message_id,
                RequestStatus::AcceptedPendingConfirmation,
                state,
            )
            .op(WriteOp::UpdateConversation {
                id: conversation_id,
                updates: vec![ConversationUpdate::ClearActiveRequest(message_id)],
            });
        self.store.commit(batch).await?;

        info!(conversation_id = %conversation_id, message_id = %message_id, "accepted request declined");
        self.events.emit(ResolutionEvent::Rejected {
            conversation_id,
            message_id,
            requester_id: request.requester_id.clone(),
            reason,
        });
        if let Some(other) = conversation.other_participant(&request.requester_id) {
            dispatch(
                self.notifier.as_ref(),
                std::slice::from_ref(other),
                Notification::new(
                    NotificationKind::RequestRejected,
                    format!("{} request withdrawn", kind.label()),
                    format!("The request for \"{}\" was declined.", conversation.post_title),
                )
                .with_data(serde_json::json!({
                    "conversation_id": conversation_id,
                    "message_id": message_id,
                })),
            )
            .await;
        }

        self.load_request(conversation_id, message_id).await
    }

    /// Refuses a new request while the conversation's current one is still open.
    ///
    /// A pointer whose message is gone or already terminal is stale. Its id is
    /// returned so the submission can replace it atomically.
    async fn ensure_no_open_request(&self, conversation: &Conversation) -> Result<Option<MessageId>> {
        let Some(active) = conversation.active_request else {
            return Ok(None);
        };
        let current = self
            .store
            .get_message(conversation.id, active.message_id)
            .await?;
        if current.as_ref().is_some_and(Message::is_active_request) {
            self.events.emit(ResolutionEvent::ConflictDetected {
                conversation_id: conversation.id,
                existing_message_id: Some(active.message_id),
            });
            return Err(AppError::conflict("pending request exists"));
        }

        warn!(
            conversation_id = %conversation.id,
            message_id = %active.message_id,
            "replacing stale request pointer"
        );
        Ok(Some(active.message_id))
    }

    async fn ensure_claim_eligible(&self, post_id: PostId) -> Result<()> {
        let post = self
            .store
            .get_post(post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post", post_id))?;
        if post.is_claim_eligible() {
            Ok(())
        } else {
            Err(AppError::validation(
                "item cannot be claimed until its custodian confirms receipt",
            ))
        }
    }

    fn ensure_confirmer(&self, confirmer: &ActingUser, requester_id: &UserId) -> Result<()> {
        if confirmer.id == *requester_id || confirmer.is_admin() {
            Ok(())
        } else {
            Err(AppError::unauthorized("only the requester can confirm this request"))
        }
    }

    fn transition(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        from: RequestStatus,
        state: RequestState,
    ) -> WriteBatch {
        WriteBatch::new()
            .require(Precondition::RequestStatusIn {
                conversation_id,
                message_id,
                allowed: vec![from],
            })
            .op(WriteOp::SetRequestState {
                conversation_id,
                message_id,
                state,
            })
    }

    async fn load_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation", id))
    }

    async fn load_request(&self, conversation_id: ConversationId, message_id: MessageId) -> Result<Message> {
        self.store
            .get_message(conversation_id, message_id)
            .await?
            .filter(|m| m.request().is_some())
            .ok_or_else(|| AppError::not_found("Request", message_id))
    }

    async fn notify_requester(
        &self,
        requester_id: &UserId,
        kind: NotificationKind,
        title: String,
        body: String,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) {
        dispatch(
            self.notifier.as_ref(),
            std::slice::from_ref(requester_id),
            Notification::new(kind, title, body).with_data(serde_json::json!({
                "conversation_id": conversation_id,
                "message_id": message_id,
            })),
        )
        .await;
    }
}

fn post_kind_label(kind: PostKind) -> &'static str {
    match kind {
        PostKind::Lost => "lost",
        PostKind::Found => "found",
    }
}
