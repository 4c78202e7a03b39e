//! Submission and response guards: one open request per conversation,
//! validation before side effects, and who may answer.

mod common;

use common::*;
use rc_core::{
    ActiveRequest, AppError, ConversationUpdate, Decision, DocumentStore, EngineConfig, FoundAction,
    MessageId, MockMediaStore, NotificationKind, PostKind, RequestDraft, RequestKind, RequestStatus,
    ResolutionEvent, WriteBatch, WriteOp,
};

#[tokio::test]
async fn test_second_request_conflicts_while_the_first_is_open() {
    let h = harness();
    let mut events = h.engine.subscribe_events();
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let (conv, first) = submit_claim(&h.engine, &post, &bob).await;

    let err = h
        .engine
        .requests()
        .submit(conv.id, &bob, claim())
        .await
        .unwrap_err();
    assert_eq!(err, AppError::conflict("pending request exists"));
    assert_eq!(h.store.list_messages(conv.id).await.unwrap().len(), 1);

    let mut conflict = None;
    while let Ok(event) = events.try_recv() {
        if let ResolutionEvent::ConflictDetected {
            existing_message_id,
            ..
        } = event
        {
            conflict = Some(existing_message_id);
        }
    }
    assert_eq!(conflict, Some(Some(first.id)));
}

#[tokio::test]
async fn test_stale_request_pointer_is_cleared_on_next_submit() {
    let h = harness();
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let conv = h.engine.conversations().get_or_create(post.id, &bob).await.unwrap();

    // Points at a message that was never written.
    h.store
        .commit(WriteBatch::new().op(WriteOp::UpdateConversation {
            id: conv.id,
            updates: vec![ConversationUpdate::SetActiveRequest(Some(ActiveRequest {
                kind: RequestKind::Claim,
                message_id: MessageId::new(),
            }))],
        }))
        .await
        .unwrap();

    let message = h.engine.requests().submit(conv.id, &bob, claim()).await.unwrap();
    let stored = h.store.get_conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(stored.active_request.map(|a| a.message_id), Some(message.id));
    assert_eq!(h.store.list_messages(conv.id).await.unwrap().len(), 1);

    // The replacement pointer is live, so the next submission conflicts.
    assert!(matches!(
        h.engine.requests().submit(conv.id, &bob, claim()).await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_invalid_drafts_never_reach_the_media_store() {
    let mut media = MockMediaStore::new();
    media.expect_save_upload().never();
    let h = harness_with(media, EngineConfig::default());
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let conv = h.engine.conversations().get_or_create(post.id, &bob).await.unwrap();
    let requests = h.engine.requests();

    let blank = RequestDraft::new(RequestKind::Claim, "   ").with_id_photo(png("id.png"));
    assert!(matches!(
        requests.submit(conv.id, &bob, blank).await,
        Err(AppError::ValidationError(_))
    ));

    let no_id = RequestDraft::new(RequestKind::Claim, "mine");
    assert!(matches!(
        requests.submit(conv.id, &bob, no_id).await,
        Err(AppError::ValidationError(_))
    ));

    let mut crowded = claim();
    for i in 0..6 {
        crowded = crowded.with_evidence(png(&format!("e{i}.png")));
    }
    assert!(matches!(
        requests.submit(conv.id, &bob, crowded).await,
        Err(AppError::ValidationError(_))
    ));

    let wrong_kind = RequestDraft::new(RequestKind::Handover, "I found it").with_id_photo(png("id.png"));
    assert!(matches!(
        requests.submit(conv.id, &bob, wrong_kind).await,
        Err(AppError::ValidationError(_))
    ));

    assert!(matches!(
        requests.submit(conv.id, &owner, claim()).await,
        Err(AppError::Unauthorized(_))
    ));
    assert_eq!(h.store.message_count().await, 0);
}

#[tokio::test]
async fn test_handover_requests_go_on_lost_posts() {
    let h = harness();
    let owner = user("loser");
    let finder = user("finder");
    let lost = post(&h.engine, &owner, PostKind::Lost, "Silver ring").await;
    let conv = h.engine.conversations().get_or_create(lost.id, &finder).await.unwrap();

    let draft = RequestDraft::new(RequestKind::Handover, "Found it by the library")
        .with_id_photo(png("id.png"))
        .with_evidence(png("ring.png"));
    let message = h.engine.requests().submit(conv.id, &finder, draft).await.unwrap();

    let (kind, request) = message.request().unwrap();
    assert_eq!(kind, RequestKind::Handover);
    assert_eq!(request.evidence_photos.len(), 1);
    assert!(request.id_photo_url.contains("/static/uploads/"));
    assert_eq!(request.state.status, RequestStatus::Pending);
}

#[tokio::test]
async fn test_failed_upload_writes_nothing() {
    let mut media = MockMediaStore::new();
    media
        .expect_save_upload()
        .returning(|_, _| Err(anyhow::anyhow!("bucket offline")));
    let h = harness_with(media, EngineConfig::default());
    let mut events = h.engine.subscribe_events();
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let conv = h.engine.conversations().get_or_create(post.id, &bob).await.unwrap();

    let err = h.engine.requests().submit(conv.id, &bob, claim()).await.unwrap_err();
    assert!(matches!(err, AppError::Upload(_)));
    assert!(err.is_retryable());

    let stored = h.store.get_conversation(conv.id).await.unwrap().unwrap();
    assert!(stored.active_request.is_none());
    assert_eq!(h.store.message_count().await, 0);
    assert!(matches!(
        events.try_recv(),
        Ok(ResolutionEvent::UploadFailed { .. })
    ));
}

#[tokio::test]
async fn test_only_the_poster_or_an_admin_answers() {
    let h = harness();
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let (conv, message) = submit_claim(&h.engine, &post, &bob).await;
    let requests = h.engine.requests();

    assert!(matches!(
        requests.respond(conv.id, message.id, &bob, accept()).await,
        Err(AppError::Unauthorized(_))
    ));
    assert!(matches!(
        requests.respond(conv.id, message.id, &user("mallory"), accept()).await,
        Err(AppError::Unauthorized(_))
    ));

    let no_photo = Decision::Accept {
        verification_photo: None,
    };
    assert!(matches!(
        requests.respond(conv.id, message.id, &owner, no_photo.clone()).await,
        Err(AppError::ValidationError(_))
    ));

    let accepted = requests
        .respond(conv.id, message.id, &admin("osa-desk"), no_photo)
        .await
        .unwrap();
    let (_, request) = accepted.request().unwrap();
    assert_eq!(request.state.status, RequestStatus::AcceptedPendingConfirmation);
    assert!(request.state.verification_bypassed);
    assert!(request.state.verification_photo_url.is_none());
}

#[tokio::test]
async fn test_rejection_clears_the_pointer_and_notifies() {
    let h = harness();
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let (conv, message) = submit_claim(&h.engine, &post, &bob).await;

    let rejected = h
        .engine
        .requests()
        .respond(
            conv.id,
            message.id,
            &owner,
            Decision::Reject {
                reason: Some("  colour does not match ".into()),
            },
        )
        .await
        .unwrap();
    let (_, request) = rejected.request().unwrap();
    assert_eq!(request.state.status, RequestStatus::Rejected);
    assert_eq!(request.state.rejection_reason.as_deref(), Some("colour does not match"));

    let stored = h.store.get_conversation(conv.id).await.unwrap().unwrap();
    assert!(stored.active_request.is_none());
    assert_eq!(
        h.notifier.count_for("bob", NotificationKind::RequestRejected),
        1
    );

    // Answering twice is a conflict, not a second transition.
    assert!(matches!(
        h.engine.requests().respond(conv.id, message.id, &owner, accept()).await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_claims_wait_for_turnover_receipt() {
    let h = harness();
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    h.engine
        .turnover()
        .declare(post.id, &owner, FoundAction::TurnoverCampusSecurity)
        .await
        .unwrap();
    let conv = h.engine.conversations().get_or_create(post.id, &bob).await.unwrap();

    assert!(matches!(
        h.engine.requests().submit(conv.id, &bob, claim()).await,
        Err(AppError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_partial_evidence_upload_writes_nothing() {
    let mut media = MockMediaStore::new();
    media.expect_save_upload().returning(|upload, folder| {
        if upload.file_name == "e2.png" {
            Err(anyhow::anyhow!("quota exceeded"))
        } else {
            Ok(format!("https://cdn.test/static/uploads/{folder}/{}", upload.file_name))
        }
    });
    let h = harness_with(media, EngineConfig::default());
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let conv = h.engine.conversations().get_or_create(post.id, &bob).await.unwrap();

    let draft = claim().with_evidence(png("e1.png")).with_evidence(png("e2.png"));
    let err = h.engine.requests().submit(conv.id, &bob, draft).await.unwrap_err();
    assert!(matches!(err, AppError::Upload(_)));

    let stored = h.store.get_conversation(conv.id).await.unwrap().unwrap();
    assert!(stored.active_request.is_none());
    assert_eq!(h.store.message_count().await, 0);

    // Nothing half-written blocks a clean retry.
    let retry = claim().with_evidence(png("e1.png"));
    h.engine.requests().submit(conv.id, &bob, retry).await.unwrap();
}
