//! # Turnover workflow
//!
//! A finder either keeps the item or hands it to a custodian office. Handed-over
//! items stay out of reach of claimants until the custodian confirms receipt.

use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::batch::{Precondition, WriteBatch, WriteOp};
use crate::error::{AppError, Result};
use crate::models::{
    ActingUser, FoundAction, Post, PostId, PostKind, PostUpdate, TurnoverDetails, TurnoverStatus,
};
use crate::notify::{dispatch, Notification, NotificationKind};
use crate::traits::{DocumentStore, NotificationDispatcher};

/// Picker state for the custody decision.
///
/// ```text
/// Picking --select(keep)------------------------> Decided(keep)
/// Picking --select(turnover)--> ConfirmHandover --answer(yes)--> Decided(turnover)
///                                     |
///                                     +--answer(no)--> Picking
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnoverChooser {
    #[default]
    Picking,
    /// Asking "has the item already been handed over?".
    ConfirmHandover(FoundAction),
    Decided(FoundAction),
}

impl TurnoverChooser {
    pub fn select(self, action: FoundAction) -> Self {
        match self {
            TurnoverChooser::Picking if action.is_turnover() => TurnoverChooser::ConfirmHandover(action),
            TurnoverChooser::Picking => TurnoverChooser::Decided(action),
            other => other,
        }
    }

    pub fn answer(self, handed_over: bool) -> Self {
        match self {
            TurnoverChooser::ConfirmHandover(action) if handed_over => TurnoverChooser::Decided(action),
            TurnoverChooser::ConfirmHandover(_) => TurnoverChooser::Picking,
            other => other,
        }
    }

    pub fn decision(&self) -> Option<FoundAction> {
        match self {
            TurnoverChooser::Decided(action) => Some(*action),
            _ => None,
        }
    }

    pub fn reset(self) -> Self {
        TurnoverChooser::Picking
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnoverOutcome {
    Collected,
    NotReceived,
}

#[derive(Clone)]
pub struct TurnoverService {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl TurnoverService {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        Self { store, notifier }
    }

    /// Applies a finished chooser. Errors if the picker has not reached a decision.
    pub async fn decide(&self, post_id: PostId, owner: &ActingUser, chooser: TurnoverChooser) -> Result<Post> {
        let action = chooser
            .decision()
            .ok_or_else(|| AppError::validation("no custody decision has been made"))?;
        self.declare(post_id, owner, action).await
    }

    /// Records the finder's custody decision. A post whose turnover was never
    /// received may be declared again.
    pub async fn declare(&self, post_id: PostId, owner: &ActingUser, action: FoundAction) -> Result<Post> {
        let post = self.load(post_id).await?;
        if post.creator_id != owner.id {
            return Err(AppError::unauthorized("only the finder can decide custody"));
        }
        if post.kind != PostKind::Found {
            return Err(AppError::validation("custody decisions only apply to found items"));
        }

        let turnover = action.is_turnover().then(|| TurnoverDetails {
            turnover_action: action,
            turnover_status: TurnoverStatus::Declared,
            declared_by: owner.id.clone(),
            declared_at: self.store.server_time(),
            confirmed_by: None,
            confirmed_at: None,
        });
        let batch = WriteBatch::new()
            .require(Precondition::PostAcceptingRequests(post_id))
            .require(Precondition::TurnoverStatusIn {
                post_id,
                allowed: vec![None, Some(TurnoverStatus::NotReceived)],
            })
            .op(WriteOp::UpdatePost {
                id: post_id,
                updates: vec![
                    PostUpdate::SetFoundAction(Some(action)),
                    PostUpdate::SetTurnover(turnover),
                ],
            });
        self.store.commit(batch).await?;
        info!(post_id = %post_id, action = ?action, "custody declared");
        self.load(post_id).await
    }

    /// The custodian office reports whether the item actually arrived.
    pub async fn confirm_receipt(
        &self,
        post_id: PostId,
        custodian: &ActingUser,
        outcome: TurnoverOutcome,
    ) -> Result<Post> {
        let post = self.load(post_id).await?;
        let Some(turnover) = post.turnover.clone() else {
            return Err(AppError::validation("item has no turnover to confirm"));
        };
        if !turnover.turnover_action.custodian_accepts(custodian.role) {
            return Err(AppError::unauthorized("not the custodian for this turnover"));
        }

        let now = self.store.server_time();
        let status = match outcome {
            TurnoverOutcome::Collected => TurnoverStatus::Confirmed,
            TurnoverOutcome::NotReceived => TurnoverStatus::NotReceived,
        };
        let updated = TurnoverDetails {
            turnover_status: status,
            confirmed_by: Some(custodian.id.clone()),
            confirmed_at: Some(now),
            ..turnover
        };
        let batch = WriteBatch::new()
            .require(Precondition::TurnoverStatusIn {
                post_id,
                allowed: vec![Some(TurnoverStatus::Declared)],
            })
            .op(WriteOp::UpdatePost {
                id: post_id,
                updates: vec![PostUpdate::SetTurnover(Some(updated))],
            });
        self.store.commit(batch).await?;
        info!(post_id = %post_id, custodian = %custodian.id, status = ?status, "turnover resolved");

        let notification = match outcome {
            TurnoverOutcome::Collected => Notification::new(
                NotificationKind::TurnoverConfirmed,
                "Turnover confirmed",
                format!("\"{}\" was received by the custodian office.", post.title),
            ),
            TurnoverOutcome::NotReceived => Notification::new(
                NotificationKind::TurnoverNotReceived,
                "Turnover not received",
                format!(
                    "The custodian office has no record of \"{}\". Please declare custody again.",
                    post.title
                ),
            ),
        }
        .with_data(serde_json::json!({ "post_id": post_id }));
        dispatch(
            self.notifier.as_ref(),
            std::slice::from_ref(&post.creator_id),
            notification,
        )
        .await;

        self.load(post_id).await
    }

    async fn load(&self, id: PostId) -> Result<Post> {
        self.store
            .get_post(id)
            .await?
            .ok_or_else(|| AppError::not_found("Post", id))
    }
}
