//! # rc-api
//!
//! The HTTP routing layer for Reclaim.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod multipart;

use actix_web::web;

pub use error::ApiError;
pub use handlers::AppState;

/// Configures the routes for the resolution API.
///
/// # Developer Note
/// We use a scoped configuration to allow the main binary to mount
/// the API under different paths if needed (e.g., /api/v1/).
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health))
        .service(
            web::scope("/sessions")
                .route("", web::post().to(handlers::sign_in))
                .route("/elevate", web::post().to(handlers::elevate)),
        )
        .service(
            web::scope("/posts")
                .route("", web::get().to(handlers::list_posts))
                .route("", web::post().to(handlers::create_post))
                .route("/{post_id}", web::get().to(handlers::get_post))
                .route("/{post_id}/activate", web::post().to(handlers::activate_post))
                .route("/{post_id}/resolve", web::post().to(handlers::resolve_post))
                .route("/{post_id}/turnover", web::post().to(handlers::declare_turnover))
                .route(
                    "/{post_id}/turnover/confirm",
                    web::post().to(handlers::confirm_turnover),
                )
                // Chat with the post's creator
                .route(
                    "/{post_id}/conversations",
                    web::post().to(handlers::open_conversation),
                ),
        )
        .service(
            web::scope("/conversations")
                .route("", web::get().to(handlers::list_conversations))
                .route("/{conversation_id}/messages", web::get().to(handlers::list_messages))
                .route("/{conversation_id}/messages", web::post().to(handlers::send_message))
                .route("/{conversation_id}/read", web::post().to(handlers::mark_read))
                // Claim / handover lifecycle
                .route("/{conversation_id}/requests", web::post().to(handlers::submit_request))
                .route(
                    "/{conversation_id}/requests/{message_id}/respond",
                    web::post().to(handlers::respond_request),
                )
                .route(
                    "/{conversation_id}/requests/{message_id}/confirm",
                    web::post().to(handlers::confirm_request),
                )
                .route(
                    "/{conversation_id}/requests/{message_id}/decline",
                    web::post().to(handlers::decline_request),
                ),
        );
}
