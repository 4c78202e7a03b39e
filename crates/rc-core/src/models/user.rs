//! Acting users and the participant profile cached on conversations.

use serde::{Deserialize, Serialize};

use super::ids::UserId;

/// Fallback shown when a participant has no usable name field at all.
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    /// OSA staff and moderators.
    Admin,
    /// Campus security desk; confirms turnovers addressed to it.
    CampusSecurity,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Raw profile fields as the auth provider hands them over. Any of them may be blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub profile_picture: Option<String>,
}

/// The user on whose behalf an engine call is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActingUser {
    pub id: UserId,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub profile: UserProfile,
}

impl ActingUser {
    pub fn new(id: impl Into<UserId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            profile: UserProfile::default(),
        }
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn participant_profile(&self) -> ParticipantProfile {
        ParticipantProfile::from_user(&self.profile)
    }
}

/// Canonical display data stored in `Conversation::participants`.
///
/// Computed once when participant data is written; readers never fall back
/// through the raw profile fields themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl ParticipantProfile {
    pub fn from_user(profile: &UserProfile) -> Self {
        let full_name = [profile.first_name.as_deref(), profile.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let display_name = non_blank(profile.display_name.as_deref())
            .map(str::to_string)
            .or_else(|| (!full_name.is_empty()).then_some(full_name))
            .or_else(|| {
                non_blank(profile.email.as_deref())
                    .and_then(|email| email.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string());

        let avatar_url = non_blank(profile.photo_url.as_deref())
            .or_else(|| non_blank(profile.profile_picture.as_deref()))
            .map(str::to_string);

        Self {
            display_name,
            avatar_url,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_explicit_field() {
        let profile = UserProfile {
            display_name: Some("Jo".into()),
            first_name: Some("Joanna".into()),
            last_name: Some("Reyes".into()),
            ..Default::default()
        };
        assert_eq!(ParticipantProfile::from_user(&profile).display_name, "Jo");
    }

    #[test]
    fn display_name_falls_back_to_names_then_email() {
        let names = UserProfile {
            display_name: Some("   ".into()),
            first_name: Some("Joanna".into()),
            last_name: Some("Reyes".into()),
            ..Default::default()
        };
        assert_eq!(ParticipantProfile::from_user(&names).display_name, "Joanna Reyes");

        let email = UserProfile {
            email: Some("jreyes@campus.edu".into()),
            ..Default::default()
        };
        assert_eq!(ParticipantProfile::from_user(&email).display_name, "jreyes");

        let empty = UserProfile::default();
        assert_eq!(
            ParticipantProfile::from_user(&empty).display_name,
            UNKNOWN_DISPLAY_NAME
        );
    }

    #[test]
    fn avatar_uses_first_non_blank_photo() {
        let profile = UserProfile {
            photo_url: Some("".into()),
            profile_picture: Some("https://cdn/p.png".into()),
            ..Default::default()
        };
        assert_eq!(
            ParticipantProfile::from_user(&profile).avatar_url.as_deref(),
            Some("https://cdn/p.png")
        );
    }
}
