//! # Request state machine
//!
//! ```text
//! pending ──accept──▶ accepted_pending_confirmation ──confirm──▶ confirmed
//!    │                          │
//!    └──reject──▶ rejected ◀────┘ (declined, or swept by a rival confirmation)
//! ```
//!
//! Pure transitions over `RequestState`. Persisting them (and the preconditions
//! that make them safe across clients) is the service's job.

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{RequestState, RequestStatus, UserId};

/// Reason recorded on every request swept aside by a rival confirmation.
pub const AUTO_REJECTION_REASON: &str = "another request has been confirmed for this item";

impl RequestStatus {
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, AcceptedPendingConfirmation)
                | (Pending, Rejected)
                | (AcceptedPendingConfirmation, Confirmed)
                | (AcceptedPendingConfirmation, Rejected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::AcceptedPendingConfirmation => "accepted_pending_confirmation",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Confirmed => "confirmed",
        }
    }
}

/// How a verified acceptance was backed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Photo(String),
    /// Admin fast path; recorded on the request so it can be audited.
    Bypassed,
}

impl RequestState {
    fn guard(&self, next: RequestStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(AppError::conflict(format!(
                "request is {}, cannot move to {}",
                self.status.as_str(),
                next.as_str()
            )))
        }
    }

    pub fn accept(&mut self, by: &UserId, at: DateTime<Utc>, verification: Verification) -> Result<()> {
        self.guard(RequestStatus::AcceptedPendingConfirmation)?;
        self.status = RequestStatus::AcceptedPendingConfirmation;
        self.responded_by = Some(by.clone());
        self.responded_at = Some(at);
        match verification {
            Verification::Photo(url) => self.verification_photo_url = Some(url),
            Verification::Bypassed => self.verification_bypassed = true,
        }
        Ok(())
    }

    pub fn reject(&mut self, by: &UserId, at: DateTime<Utc>, reason: Option<String>) -> Result<()> {
        self.guard(RequestStatus::Rejected)?;
        self.status = RequestStatus::Rejected;
        self.responded_by = Some(by.clone());
        self.responded_at = Some(at);
        self.rejection_reason = reason;
        Ok(())
    }

    pub fn confirm(&mut self, by: &UserId, at: DateTime<Utc>) -> Result<()> {
        self.guard(RequestStatus::Confirmed)?;
        self.status = RequestStatus::Confirmed;
        self.confirmed_by = Some(by.clone());
        self.confirmed_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn who() -> UserId {
        UserId::from("responder")
    }

    #[test]
    fn happy_path_reaches_confirmed() {
        let mut state = RequestState::default();
        state
            .accept(&who(), Utc::now(), Verification::Photo("https://m/v.jpg".into()))
            .unwrap();
        assert_eq!(state.status, RequestStatus::AcceptedPendingConfirmation);
        assert_eq!(state.verification_photo_url.as_deref(), Some("https://m/v.jpg"));

        state.confirm(&UserId::from("requester"), Utc::now()).unwrap();
        assert_eq!(state.status, RequestStatus::Confirmed);
        assert_eq!(state.confirmed_by, Some(UserId::from("requester")));
    }

    #[test]
    fn confirm_requires_acceptance() {
        let mut state = RequestState::default();
        let err = state.confirm(&who(), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(state.status, RequestStatus::Pending);
    }

    #[test]
    fn terminal_states_do_not_move() {
        let mut rejected = RequestState::default();
        rejected.reject(&who(), Utc::now(), None).unwrap();
        assert!(rejected.accept(&who(), Utc::now(), Verification::Bypassed).is_err());
        assert!(rejected.reject(&who(), Utc::now(), None).is_err());

        let mut confirmed = RequestState::default();
        confirmed.accept(&who(), Utc::now(), Verification::Bypassed).unwrap();
        confirmed.confirm(&who(), Utc::now()).unwrap();
        assert!(confirmed
            .reject(&who(), Utc::now(), Some(AUTO_REJECTION_REASON.into()))
            .is_err());
    }

    #[test]
    fn accepted_can_still_be_rejected() {
        let mut state = RequestState::default();
        state.accept(&who(), Utc::now(), Verification::Bypassed).unwrap();
        assert!(state.verification_bypassed);
        state
            .reject(&UserId::from("confirmer"), Utc::now(), Some(AUTO_REJECTION_REASON.into()))
            .unwrap();
        assert_eq!(state.status, RequestStatus::Rejected);
        assert_eq!(state.rejection_reason.as_deref(), Some(AUTO_REJECTION_REASON));
    }

    #[test]
    fn transition_table() {
        use RequestStatus::*;
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Confirmed));
        assert!(!Rejected.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Rejected));
    }
}
