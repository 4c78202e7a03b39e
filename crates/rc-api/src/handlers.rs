//! # rc-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the engine services.
//! Handlers authenticate, decode, call exactly one service operation, and encode.

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use rc_core::{
    AppError, AuthProvider, ConversationId, Decision, Engine, FoundAction, MessageId, NewPost,
    PostId, RequestDraft, RequestKind, TurnoverOutcome, UserId, UserProfile,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::{bearer_token, CurrentUser};
use crate::multipart::read_form;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub engine: Arc<Engine>,
    pub auth: Arc<dyn AuthProvider>,
}

type ApiResult = Result<HttpResponse, ApiError>;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// ── Sessions ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SignInBody {
    pub user_id: String,
    /// The upstream login's signature over `user_id`.
    pub assertion: String,
    #[serde(default)]
    pub profile: UserProfile,
}

/// Exchanges an identity the upstream login signed for a bearer token.
pub async fn sign_in(data: web::Data<AppState>, body: web::Json<SignInBody>) -> ApiResult {
    let SignInBody {
        user_id,
        assertion,
        profile,
    } = body.into_inner();
    if user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }
    let token = data
        .auth
        .sign_in(&UserId::new(user_id.trim()), profile, &assertion)
        .await
        .map_err(AppError::internal)?
        .ok_or(ApiError::Unauthenticated)?;
    Ok(HttpResponse::Created().json(json!({ "token": token })))
}

#[derive(Debug, Deserialize)]
pub struct ElevateBody {
    pub password: String,
}

pub async fn elevate(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ElevateBody>,
) -> ApiResult {
    let token = bearer_token(&req).ok_or(ApiError::Unauthenticated)?;
    let elevated = data
        .auth
        .elevate(&token, &body.password)
        .await
        .map_err(AppError::internal)?;
    if !elevated {
        return Err(AppError::unauthorized("staff password rejected").into());
    }
    Ok(HttpResponse::NoContent().finish())
}

// ── Posts ───────────────────────────────────────────────────────────────────

pub async fn list_posts(data: web::Data<AppState>) -> ApiResult {
    let posts = data.engine.posts().public_listing().await?;
    Ok(HttpResponse::Ok().json(posts))
}

pub async fn get_post(data: web::Data<AppState>, path: web::Path<PostId>) -> ApiResult {
    let post = data.engine.posts().get(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post))
}

pub async fn create_post(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    body: web::Json<NewPost>,
) -> ApiResult {
    let post = data.engine.posts().create_post(&user, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(post))
}

pub async fn activate_post(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<PostId>,
) -> ApiResult {
    let post = data.engine.posts().activate(&user, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post))
}

pub async fn resolve_post(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<PostId>,
) -> ApiResult {
    let post = data.engine.posts().mark_resolved(&user, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(post))
}

#[derive(Debug, Deserialize)]
pub struct TurnoverBody {
    pub action: FoundAction,
}

pub async fn declare_turnover(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<PostId>,
    body: web::Json<TurnoverBody>,
) -> ApiResult {
    let post = data
        .engine
        .turnover()
        .declare(path.into_inner(), &user, body.action)
        .await?;
    Ok(HttpResponse::Ok().json(post))
}

#[derive(Debug, Deserialize)]
pub struct ReceiptBody {
    pub outcome: TurnoverOutcome,
}

pub async fn confirm_turnover(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<PostId>,
    body: web::Json<ReceiptBody>,
) -> ApiResult {
    let post = data
        .engine
        .turnover()
        .confirm_receipt(path.into_inner(), &user, body.outcome)
        .await?;
    Ok(HttpResponse::Ok().json(post))
}

// ── Conversations ───────────────────────────────────────────────────────────

/// Opens (or reopens) the caller's chat with the post's creator.
pub async fn open_conversation(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<PostId>,
) -> ApiResult {
    let conversation = data
        .engine
        .conversations()
        .get_or_create(path.into_inner(), &user)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

pub async fn list_conversations(data: web::Data<AppState>, CurrentUser(user): CurrentUser) -> ApiResult {
    let conversations = data.engine.conversations().list_for_user(&user).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

pub async fn list_messages(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<ConversationId>,
) -> ApiResult {
    let messages = data
        .engine
        .conversations()
        .messages(path.into_inner(), &user)
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub text: String,
}

pub async fn send_message(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<ConversationId>,
    body: web::Json<TextBody>,
) -> ApiResult {
    let message = data
        .engine
        .conversations()
        .send_text(path.into_inner(), &user, &body.text)
        .await?;
    Ok(HttpResponse::Created().json(message))
}

pub async fn mark_read(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<ConversationId>,
) -> ApiResult {
    data.engine
        .conversations()
        .mark_read(path.into_inner(), &user)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

// ── Requests ────────────────────────────────────────────────────────────────

fn parse_kind(raw: &str) -> Result<RequestKind, ApiError> {
    match raw.trim() {
        "claim" | "claim_request" => Ok(RequestKind::Claim),
        "handover" | "handover_request" => Ok(RequestKind::Handover),
        other => Err(ApiError::bad_request(format!("unknown request kind: {other}"))),
    }
}

/// Multipart: `reason`, `id_photo`, `evidence[]`, and optionally `kind`.
/// Without `kind` the request type follows the post (found → claim, lost → handover).
pub async fn submit_request(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<ConversationId>,
    payload: Multipart,
) -> ApiResult {
    let conversation_id = path.into_inner();
    let mut form = read_form(payload, data.engine.config().max_upload_bytes).await?;

    let kind = match form.text("kind") {
        Some(raw) => parse_kind(raw)?,
        None => {
            let conversation = data.engine.conversations().get(conversation_id, &user).await?;
            RequestKind::for_post(conversation.post_kind)
        }
    };
    let mut draft = RequestDraft::new(kind, form.text("reason").unwrap_or_default());
    if let Some(photo) = form.take_file("id_photo") {
        draft = draft.with_id_photo(photo);
    }
    for photo in form.take_files("evidence") {
        draft = draft.with_evidence(photo);
    }

    let message = data
        .engine
        .requests()
        .submit(conversation_id, &user, draft)
        .await?;
    Ok(HttpResponse::Created().json(message))
}

/// Multipart: `decision` (`accept` | `reject`), plus `verification_photo` or `reason`.
pub async fn respond_request(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<(ConversationId, MessageId)>,
    payload: Multipart,
) -> ApiResult {
    let (conversation_id, message_id) = path.into_inner();
    let mut form = read_form(payload, data.engine.config().max_upload_bytes).await?;

    let answer = form.text("decision").map(|d| d.trim().to_ascii_lowercase());
    let decision = match answer.as_deref() {
        Some("accept") => Decision::Accept {
            verification_photo: form.take_file("verification_photo"),
        },
        Some("reject") => Decision::Reject {
            reason: form
                .text("reason")
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        },
        _ => return Err(ApiError::bad_request("decision must be accept or reject")),
    };

    let message = data
        .engine
        .requests()
        .respond(conversation_id, message_id, &user, decision)
        .await?;
    Ok(HttpResponse::Ok().json(message))
}

pub async fn confirm_request(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<(ConversationId, MessageId)>,
) -> ApiResult {
    let (conversation_id, message_id) = path.into_inner();
    let report = data
        .engine
        .requests()
        .confirm(conversation_id, message_id, &user)
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeclineBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn decline_request(
    data: web::Data<AppState>,
    CurrentUser(user): CurrentUser,
    path: web::Path<(ConversationId, MessageId)>,
    body: Option<web::Json<DeclineBody>>,
) -> ApiResult {
    let (conversation_id, message_id) = path.into_inner();
    let reason = body.and_then(|b| b.into_inner().reason);
    let message = data
        .engine
        .requests()
        .decline(conversation_id, message_id, &user, reason)
        .await?;
    Ok(HttpResponse::Ok().json(message))
}
