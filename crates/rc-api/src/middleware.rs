//! rc-api Middleware
//!
//! Request logging, CORS, and bearer-token authentication.

use actix_cors::Cors;
use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::middleware::Logger;
use actix_web::{web, FromRequest, HttpRequest};
use futures_util::future::LocalBoxFuture;
use rc_core::ActingUser;

use crate::error::ApiError;
use crate::handlers::AppState;

// Returns a standard set of middleware for the Reclaim API.
pub fn standard_middleware() -> Logger {
    // remote-ip "request-line" status-code response-size "referrer" "user-agent"
    Logger::default()
}

// Configures CORS (Cross-Origin Resource Sharing)
// Mobile and web clients call the API from other origins.
pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(3600)
}

/// Extracts the bearer token from `Authorization`.
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// The authenticated caller. Handlers take this as an argument to require a session.
pub struct CurrentUser(pub ActingUser);

impl FromRequest for CurrentUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let token = bearer_token(req);
        Box::pin(async move {
            let (Some(state), Some(token)) = (state, token) else {
                return Err(ApiError::Unauthenticated);
            };
            match state.auth.authenticate(&token).await {
                Ok(Some(user)) => Ok(CurrentUser(user)),
                Ok(None) => Err(ApiError::Unauthenticated),
                Err(e) => {
                    tracing::warn!(error = %e, "auth provider failed");
                    Err(ApiError::Unauthenticated)
                }
            }
        })
    }
}
