//! # rc-config
//!
//! Layered settings for the Reclaim binary: built-in defaults, then an
//! optional TOML file, then `RECLAIM__SECTION__KEY` environment variables.
//! A `.env` file is read first so local development can set those variables.

use rc_core::EngineConfig;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::Path;

pub const DEFAULT_FILE: &str = "reclaim.toml";
pub const ENV_PREFIX: &str = "RECLAIM";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// Used when the `db-sqlite` feature is on; otherwise documents live in memory.
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct MediaSettings {
    pub root: String,
    pub url_prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthSettings {
    #[serde(deserialize_with = "secret")]
    pub session_salt: SecretString,
    #[serde(default, deserialize_with = "optional_secret")]
    pub admin_password_hash: Option<SecretString>,
    #[serde(default, deserialize_with = "optional_secret")]
    pub campus_security_password_hash: Option<SecretString>,
    /// HMAC key shared with the upstream login. Unset disables sign-in.
    #[serde(default, deserialize_with = "optional_secret")]
    pub login_key: Option<SecretString>,
    pub session_ttl_hours: u64,
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub media: MediaSettings,
    pub auth: AuthSettings,
    pub log: LogSettings,
    #[serde(default)]
    pub engine: EngineConfig,
}

fn secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

fn optional_secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

impl Settings {
    /// Reads `.env`, then `reclaim.toml` (if present), then `RECLAIM__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::load_from(Some(Path::new(DEFAULT_FILE)), ENV_PREFIX)
    }

    pub fn load_from(file: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite:reclaim.db")?
            .set_default("media.root", "./data/uploads")?
            .set_default("media.url_prefix", "/static/uploads")?
            .set_default("auth.session_salt", "change-me")?
            .set_default("auth.session_ttl_hours", 12)?
            .set_default("log.level", "info")?
            .set_default("log.json", false)?;

        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.message_cap == 0 {
            return Err(ConfigError::Invalid("engine.message_cap must be positive".into()));
        }
        if self.auth.session_ttl_hours == 0 {
            return Err(ConfigError::Invalid("auth.session_ttl_hours must be positive".into()));
        }
        if engine.max_concurrent_uploads == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_concurrent_uploads must be positive".into(),
            ));
        }
        if !self.media.url_prefix.contains(engine.trusted_media_url_fragment.trim_end_matches('/')) {
            tracing::warn!(
                url_prefix = %self.media.url_prefix,
                fragment = %engine.trusted_media_url_fragment,
                "media url prefix does not match the trusted fragment; uploads will be refused"
            );
        }
        Ok(())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[test]
    fn defaults_load_without_any_file() {
        let settings = Settings::load_from(None, "RECLAIM_TEST_DEFAULTS").unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.engine, EngineConfig::default());
        assert_eq!(settings.auth.session_salt.expose_secret(), "change-me");
        assert!(settings.auth.admin_password_hash.is_none());
        assert!(settings.auth.login_key.is_none());
        assert_eq!(settings.auth.session_ttl_hours, 12);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[engine]
message_cap = 20
allow_admin_photo_bypass = false
"#
        )
        .unwrap();

        let settings = Settings::load_from(Some(file.path()), "RECLAIM_TEST_FILE").unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.engine.message_cap, 20);
        assert!(!settings.engine.allow_admin_photo_bypass);
        // Untouched engine keys keep their defaults.
        assert_eq!(settings.engine.max_evidence_photos, 5);
    }

    #[test]
    fn environment_overrides_file() {
        std::env::set_var("RECLAIM_TEST_ENV__SERVER__PORT", "7070");
        std::env::set_var("RECLAIM_TEST_ENV__AUTH__ADMIN_PASSWORD_HASH", "$argon2id$stub");
        let settings = Settings::load_from(None, "RECLAIM_TEST_ENV").unwrap();
        assert_eq!(settings.server.port, 7070);
        assert_eq!(
            settings
                .auth
                .admin_password_hash
                .as_ref()
                .map(|s| s.expose_secret().to_string()),
            Some("$argon2id$stub".to_string())
        );
    }

    #[test]
    fn zero_message_cap_is_rejected() {
        std::env::set_var("RECLAIM_TEST_CAP__ENGINE__MESSAGE_CAP", "0");
        let err = Settings::load_from(None, "RECLAIM_TEST_CAP").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
