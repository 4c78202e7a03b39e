//! Post lifecycle: turnover custody, visibility, inactivity expiry and re-activation.

mod common;

use chrono::Duration;
use common::*;
use rc_core::{
    ActingUser, AppError, EngineConfig, FoundAction, NotificationKind, PostKind, PostStatus, Role,
    TurnoverChooser, TurnoverOutcome, TurnoverStatus,
};

fn campus_security() -> ActingUser {
    ActingUser::new("desk", Role::CampusSecurity)
}

async fn listed(h: &Harness) -> Vec<rc_core::PostId> {
    h.engine
        .posts()
        .public_listing()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect()
}

#[tokio::test]
async fn test_osa_turnover_is_hidden_until_collected() {
    let h = harness();
    let owner = user("finder");
    let post = found_post(&h.engine, &owner).await;

    let declared = h
        .engine
        .turnover()
        .declare(post.id, &owner, FoundAction::TurnoverOsa)
        .await
        .unwrap();
    assert_eq!(declared.turnover_status(), Some(TurnoverStatus::Declared));
    assert!(!listed(&h).await.contains(&post.id));
    assert!(matches!(
        h.engine
            .turnover()
            .confirm_receipt(post.id, &campus_security(), TurnoverOutcome::Collected)
            .await,
        Err(AppError::Unauthorized(_))
    ));

    let collected = h
        .engine
        .turnover()
        .confirm_receipt(post.id, &admin("osa"), TurnoverOutcome::Collected)
        .await
        .unwrap();
    assert_eq!(collected.turnover_status(), Some(TurnoverStatus::Confirmed));
    assert!(listed(&h).await.contains(&post.id));
    assert_eq!(h.notifier.count_for("finder", NotificationKind::TurnoverConfirmed), 1);

    // Custody settled: claims are open again.
    let bob = user("bob");
    let (_, message) = submit_claim(&h.engine, &collected, &bob).await;
    assert!(message.is_active_request());
}

#[tokio::test]
async fn test_campus_security_turnover_stays_listed() {
    let h = harness();
    let owner = user("finder");
    let post = found_post(&h.engine, &owner).await;

    h.engine
        .turnover()
        .declare(post.id, &owner, FoundAction::TurnoverCampusSecurity)
        .await
        .unwrap();
    assert!(listed(&h).await.contains(&post.id));

    // Only a custodian office may answer.
    assert!(matches!(
        h.engine
            .turnover()
            .confirm_receipt(post.id, &user("bob"), TurnoverOutcome::Collected)
            .await,
        Err(AppError::Unauthorized(_))
    ));
    h.engine
        .turnover()
        .confirm_receipt(post.id, &campus_security(), TurnoverOutcome::Collected)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_missing_turnover_can_be_declared_again() {
    let h = harness();
    let owner = user("finder");
    let post = found_post(&h.engine, &owner).await;
    let turnover = h.engine.turnover();

    turnover
        .declare(post.id, &owner, FoundAction::TurnoverCampusSecurity)
        .await
        .unwrap();
    // A second declaration while the first is outstanding is refused.
    assert!(matches!(
        turnover.declare(post.id, &owner, FoundAction::TurnoverOsa).await,
        Err(AppError::Conflict(_))
    ));

    let missing = turnover
        .confirm_receipt(post.id, &campus_security(), TurnoverOutcome::NotReceived)
        .await
        .unwrap();
    assert_eq!(missing.turnover_status(), Some(TurnoverStatus::NotReceived));
    assert!(!listed(&h).await.contains(&post.id));
    assert_eq!(h.notifier.count_for("finder", NotificationKind::TurnoverNotReceived), 1);

    let kept = turnover
        .declare(post.id, &owner, FoundAction::Keep)
        .await
        .unwrap();
    assert_eq!(kept.found_action, Some(FoundAction::Keep));
    assert!(kept.turnover.is_none());
    assert!(listed(&h).await.contains(&post.id));
}

#[tokio::test]
async fn test_custody_is_decided_by_the_finder_on_found_posts() {
    let h = harness();
    let owner = user("finder");
    let found = found_post(&h.engine, &owner).await;
    let lost = post(&h.engine, &owner, PostKind::Lost, "Blue scarf").await;

    assert!(matches!(
        h.engine
            .turnover()
            .declare(found.id, &user("bob"), FoundAction::Keep)
            .await,
        Err(AppError::Unauthorized(_))
    ));
    assert!(matches!(
        h.engine.turnover().declare(lost.id, &owner, FoundAction::Keep).await,
        Err(AppError::ValidationError(_))
    ));

    let undecided = TurnoverChooser::default().select(FoundAction::TurnoverOsa);
    assert!(matches!(
        h.engine.turnover().decide(found.id, &owner, undecided).await,
        Err(AppError::ValidationError(_))
    ));
    let post = h
        .engine
        .turnover()
        .decide(found.id, &owner, undecided.answer(true))
        .await
        .unwrap();
    assert_eq!(post.found_action, Some(FoundAction::TurnoverOsa));
}

#[tokio::test]
async fn test_inactive_posts_expire_until_an_admin_reactivates_them() {
    let h = harness();
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let conv = h.engine.conversations().get_or_create(post.id, &bob).await.unwrap();
    let posts = h.engine.posts();

    // Nothing is old enough yet.
    assert!(posts.expire_inactive(posts.now()).await.unwrap().is_empty());

    let later = posts.now() + Duration::days(h.engine.config().unclaimed_after_days + 1);
    assert_eq!(posts.expire_inactive(later).await.unwrap(), vec![post.id]);
    let expired = posts.get(post.id).await.unwrap();
    assert_eq!(expired.status, PostStatus::Unclaimed);
    assert!(expired.moved_to_unclaimed);

    assert!(matches!(
        h.engine.requests().submit(conv.id, &bob, claim()).await,
        Err(AppError::Conflict(_))
    ));

    assert!(matches!(
        posts.activate(&owner, post.id).await,
        Err(AppError::Unauthorized(_))
    ));
    let active = posts.activate(&admin("osa"), post.id).await.unwrap();
    assert_eq!(active.status, PostStatus::Pending);
    assert!(!active.moved_to_unclaimed);
    // Already pending: a second activation has nothing to do.
    assert!(matches!(
        posts.activate(&admin("osa"), post.id).await,
        Err(AppError::Conflict(_))
    ));

    submit_claim(&h.engine, &active, &user("carol")).await;
}

#[tokio::test]
async fn test_creator_may_close_a_post_outside_the_chat() {
    let h = harness();
    let owner = user("finder");
    let post = found_post(&h.engine, &owner).await;

    assert!(matches!(
        h.engine.posts().mark_resolved(&user("bob"), post.id).await,
        Err(AppError::Unauthorized(_))
    ));
    let resolved = h.engine.posts().mark_resolved(&owner, post.id).await.unwrap();
    assert_eq!(resolved.status, PostStatus::Resolved);
    assert!(listed(&h).await.contains(&post.id));
}

#[tokio::test]
async fn test_sweeper_stops_on_request() {
    let config = EngineConfig {
        sweep_interval_secs: 1,
        ..EngineConfig::default()
    };
    let h = harness_with(accepting_media(), config);
    let sweeper = h.engine.spawn_sweeper();
    tokio::time::timeout(std::time::Duration::from_secs(5), sweeper.stop())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_custody_declared_after_a_claim_blocks_acceptance() {
    let h = harness();
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let (conv, message) = submit_claim(&h.engine, &post, &bob).await;

    h.engine
        .turnover()
        .declare(post.id, &owner, FoundAction::TurnoverOsa)
        .await
        .unwrap();

    assert!(matches!(
        h.engine.requests().respond(conv.id, message.id, &owner, accept()).await,
        Err(AppError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_claim_cannot_complete_while_the_item_is_in_transit() {
    let h = harness();
    let owner = user("finder");
    let bob = user("bob");
    let post = found_post(&h.engine, &owner).await;
    let (conv, message) = accepted_claim(&h.engine, &post, &owner, &bob).await;

    h.engine
        .turnover()
        .declare(post.id, &owner, FoundAction::TurnoverOsa)
        .await
        .unwrap();

    assert!(matches!(
        h.engine.requests().confirm(conv.id, message.id, &bob).await,
        Err(AppError::ValidationError(_))
    ));
    let held = h.engine.posts().get(post.id).await.unwrap();
    assert_ne!(held.status, PostStatus::Completed);
    assert!(held.resolution.is_none());

    // Once the office has the item the accepted claim goes through.
    h.engine
        .turnover()
        .confirm_receipt(post.id, &admin("osa"), TurnoverOutcome::Collected)
        .await
        .unwrap();
    h.engine.requests().confirm(conv.id, message.id, &bob).await.unwrap();
    assert_eq!(
        h.engine.posts().get(post.id).await.unwrap().status,
        PostStatus::Completed
    );
}
