//! # Reclaim Binary
//!
//! The entry point that assembles the application based on compile-time features.

use actix_web::{web, App, HttpServer};
use rc_api::handlers::AppState;
use rc_api::middleware::{cors_policy, standard_middleware};
use rc_config::Settings;
use rc_core::{AuthProvider, DocumentStore, Engine, EnginePorts, LoggingDispatcher, MediaStore};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// Plugins are picked at compile time
#[cfg(feature = "db-sqlite")]
use rc_db_sqlite::SqliteDocumentStore;
#[cfg(all(feature = "in-memory", not(feature = "db-sqlite")))]
use rc_store_memory::MemoryStore;

#[cfg(feature = "storage-local")]
use rc_storage_local::LocalMediaStore;

#[cfg(feature = "auth-simple")]
use rc_auth_simple::{SimpleAuthProvider, StaffCredentials};

#[cfg(not(any(feature = "db-sqlite", feature = "in-memory")))]
compile_error!("no document store enabled; build with `db-sqlite` or `in-memory`");
#[cfg(not(feature = "storage-local"))]
compile_error!("no media store plugin enabled; build with the `storage-local` feature");
#[cfg(not(feature = "auth-simple"))]
compile_error!("no auth plugin enabled; build with the `auth-simple` feature");

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_tracing(&settings);

    // 1. Initialize Document Store Implementation
    #[cfg(feature = "db-sqlite")]
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(&settings.database.url).await?);
    #[cfg(all(feature = "in-memory", not(feature = "db-sqlite")))]
    let store: Arc<dyn DocumentStore> = {
        tracing::warn!("db-sqlite disabled; using the in-memory store");
        Arc::new(MemoryStore::new())
    };

    // 2. Initialize Storage Implementation
    #[cfg(feature = "storage-local")]
    let media: Arc<dyn MediaStore> = Arc::new(LocalMediaStore::new(
        settings.media.root.clone().into(),
        settings.media.url_prefix.clone(),
    ));

    // 3. Initialize Auth Implementation
    #[cfg(feature = "auth-simple")]
    let auth: Arc<dyn AuthProvider> = {
        let auth_settings = &settings.auth;
        if auth_settings.session_salt.expose_secret() == "change-me" {
            tracing::warn!("auth.session_salt is the default; set RECLAIM__AUTH__SESSION_SALT");
        }
        let expose = |s: &Option<secrecy::SecretString>| s.as_ref().map(|s| s.expose_secret().to_string());
        let mut provider = SimpleAuthProvider::new(
            auth_settings.session_salt.expose_secret(),
            StaffCredentials {
                admin_password_hash: expose(&auth_settings.admin_password_hash),
                campus_security_password_hash: expose(&auth_settings.campus_security_password_hash),
            },
        )
        .with_session_ttl(Duration::from_secs(auth_settings.session_ttl_hours * 60 * 60));
        match expose(&auth_settings.login_key) {
            Some(key) => provider = provider.with_login_key(key),
            None => tracing::warn!("auth.login_key is not set; sign-in is disabled"),
        }
        Arc::new(provider)
    };

    // 4. Assemble the engine (starts the write queue) and the inactivity sweep
    let engine = Arc::new(Engine::new(
        EnginePorts {
            store,
            media,
            notifier: Arc::new(LoggingDispatcher),
        },
        settings.engine.clone(),
    ));
    let sweeper = engine.spawn_sweeper();

    let state = web::Data::new(AppState {
        engine: engine.clone(),
        auth,
    });

    let (host, port) = settings.bind_address();
    let media_root = settings.media.root.clone();
    let media_prefix = settings.media.url_prefix.clone();
    tracing::info!(%host, port, "Reclaim starting");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(standard_middleware())
            .wrap(cors_policy())
            .configure(rc_api::configure_routes)
            .service(actix_files::Files::new(&media_prefix, &media_root))
    })
    .bind((host, port))?
    .run()
    .await?;

    tracing::info!("server stopped; draining background work");
    sweeper.stop().await;
    engine.shutdown().await?;
    Ok(())
}
