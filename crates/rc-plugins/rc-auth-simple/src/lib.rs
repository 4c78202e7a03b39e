//! # rc-auth-simple
//!
//! Argon2-based implementation of `AuthProvider`.
//! Issues opaque, expiring session tokens to identities the upstream login
//! signed with the shared login key, and lets staff elevate a session with a
//! shared password (admin / campus security).

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rc_core::models::{ActingUser, Role, UserId, UserProfile};
use rc_core::traits::AuthProvider;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Argon2 PHC strings for the staff roles. `None` disables that role.
#[derive(Debug, Clone, Default)]
pub struct StaffCredentials {
    pub admin_password_hash: Option<String>,
    pub campus_security_password_hash: Option<String>,
}

struct Session {
    user: ActingUser,
    issued_at: Instant,
}

pub struct SimpleAuthProvider {
    /// Secret salt mixed into every session token.
    session_salt: String,
    /// Key the upstream login signs identities with. `None` disables sign-in.
    login_key: Option<String>,
    session_ttl: Duration,
    staff: StaffCredentials,
    sessions: DashMap<String, Session>,
}

impl SimpleAuthProvider {
    /// Accepts a salt string (e.g., from an environment variable)
    pub fn new(salt: &str, staff: StaffCredentials) -> Self {
        Self {
            session_salt: salt.to_string(),
            login_key: None,
            session_ttl: DEFAULT_SESSION_TTL,
            staff,
            sessions: DashMap::new(),
        }
    }

    pub fn with_login_key(mut self, key: impl Into<String>) -> Self {
        self.login_key = Some(key.into());
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Checks the upstream login's signature over `user_id`.
    pub fn verify_assertion(&self, user_id: &UserId, assertion: &str) -> bool {
        let Some(key) = &self.login_key else {
            return false;
        };
        let Ok(signature) = hex::decode(assertion.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
            return false;
        };
        mac.update(user_id.as_str().as_bytes());
        mac.verify_slice(&signature).is_ok()
    }

    /// Starts a session for `user_id` and returns its bearer token.
    pub fn issue_session(&self, user_id: &UserId, profile: UserProfile) -> anyhow::Result<String> {
        let mut nonce = [0u8; 16];
        getrandom::getrandom(&mut nonce)
            .map_err(|e| anyhow::anyhow!("no entropy for session token: {e}"))?;

        let mut hasher = Sha256::new();
        hasher.update(self.session_salt.as_bytes());
        hasher.update(user_id.as_str().as_bytes());
        hasher.update(nonce);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize());

        self.prune_expired();
        let user = ActingUser::new(user_id.clone(), Role::User).with_profile(profile);
        self.sessions.insert(
            token.clone(),
            Session {
                user,
                issued_at: Instant::now(),
            },
        );
        tracing::info!(user = %user_id, "session issued");
        Ok(token)
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drops every session older than the TTL.
    pub fn prune_expired(&self) {
        let ttl = self.session_ttl;
        self.sessions.retain(|_, session| session.issued_at.elapsed() < ttl);
    }

    fn is_live(&self, session: &Session) -> bool {
        session.issued_at.elapsed() < self.session_ttl
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Signs `user_id` with the login key, as the upstream login does.
pub fn sign_identity(login_key: &str, user_id: &UserId) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(login_key.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid login key: {e}"))?;
    mac.update(user_id.as_str().as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Hashes a staff password into an Argon2 PHC string for configuration.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let mut salt = [0u8; 16];
    getrandom::getrandom(&mut salt).map_err(|e| anyhow::anyhow!("no entropy for salt: {e}"))?;
    let salt = SaltString::encode_b64(&salt).map_err(|e| anyhow::anyhow!("{e}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(hash.to_string())
}

/// Verifies if a provided password matches a stored Argon2 hash.
fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

#[async_trait]
impl AuthProvider for SimpleAuthProvider {
    async fn sign_in(
        &self,
        user_id: &UserId,
        profile: UserProfile,
        assertion: &str,
    ) -> anyhow::Result<Option<String>> {
        if !self.verify_assertion(user_id, assertion) {
            tracing::warn!(user = %user_id, "sign-in refused: bad identity assertion");
            return Ok(None);
        }
        self.issue_session(user_id, profile).map(Some)
    }

    async fn authenticate(&self, token: &str) -> anyhow::Result<Option<ActingUser>> {
        let Some(session) = self.sessions.get(token) else {
            return Ok(None);
        };
        if self.is_live(&session) {
            return Ok(Some(session.user.clone()));
        }
        drop(session);
        self.sessions.remove(token);
        tracing::debug!("expired session dropped");
        Ok(None)
    }

    async fn elevate(&self, token: &str, password: &str) -> anyhow::Result<bool> {
        let Some(mut entry) = self.sessions.get_mut(token) else {
            return Ok(false);
        };
        if !self.is_live(&entry) {
            return Ok(false);
        }
        let session = &mut entry.user;
        let accepts = |hash: &Option<String>| hash.as_deref().is_some_and(|h| verify_password(password, h));

        let role = if accepts(&self.staff.admin_password_hash) {
            Role::Admin
        } else if accepts(&self.staff.campus_security_password_hash) {
            Role::CampusSecurity
        } else {
            tracing::warn!(user = %session.id, "staff elevation refused");
            return Ok(false);
        };
        session.role = role;
        tracing::info!(user = %session.id, role = ?role, "session elevated");
        Ok(true)
    }
}
