//! Notification payloads and a dispatcher that only logs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::UserId;
use crate::traits::NotificationDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequestReceived,
    RequestAccepted,
    RequestRejected,
    RequestConfirmed,
    /// One per user, summarising every request a rival confirmation swept aside.
    RequestsAutoRejected,
    TurnoverConfirmed,
    TurnoverNotReceived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Writes notifications to the tracing log. Used when no push provider is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn send_to_users(
        &self,
        user_ids: &[UserId],
        notification: &Notification,
    ) -> anyhow::Result<()> {
        tracing::info!(
            recipients = user_ids.len(),
            kind = ?notification.kind,
            title = %notification.title,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Sends and logs failures. Notifications never fail the flow that triggered them.
pub(crate) async fn dispatch(
    dispatcher: &dyn NotificationDispatcher,
    user_ids: &[UserId],
    notification: Notification,
) {
    if user_ids.is_empty() {
        return;
    }
    if let Err(e) = dispatcher.send_to_users(user_ids, &notification).await {
        tracing::warn!(
            error = %e,
            kind = ?notification.kind,
            recipients = user_ids.len(),
            "notification delivery failed"
        );
    }
}
