//! The claim lifecycle driven through the HTTP routes.

mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use common::*;
use rc_api::{configure_routes, AppState};
use rc_core::{ActingUser, EngineConfig, MockAuthProvider, Role};
use serde_json::Value;
use std::sync::Arc;

const BOUNDARY: &str = "reclaim-test-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    Image(&'a str, &'a str),
}

fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
                );
            }
            Part::Image(name, file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&[0x89, b'P', b'N', b'G']);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Tokens are the user ids; `osa` is an admin.
fn token_auth() -> MockAuthProvider {
    let mut auth = MockAuthProvider::new();
    auth.expect_authenticate().returning(|token| {
        let role = if token == "osa" { Role::Admin } else { Role::User };
        Ok(Some(ActingUser::new(token, role)))
    });
    auth
}

fn post_as(uri: &str, token: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .insert_header(("Authorization", format!("Bearer {token}")))
}

fn multipart_as(uri: &str, token: &str, parts: &[Part<'_>]) -> test::TestRequest {
    post_as(uri, token)
        .insert_header((
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(multipart(parts))
}

#[actix_web::test]
async fn test_claim_is_submitted_accepted_and_confirmed_over_http() {
    let h = harness_with(accepting_media(), EngineConfig::default());
    let state = web::Data::new(AppState {
        engine: Arc::new(h.engine),
        auth: Arc::new(token_auth()),
    });
    let app = test::init_service(App::new().app_data(state).configure(configure_routes)).await;

    let post: Value = test::call_and_read_body_json(
        &app,
        post_as("/posts", "finder")
            .set_json(serde_json::json!({ "kind": "found", "title": "Green water bottle" }))
            .to_request(),
    )
    .await;
    let post_id = post["id"].as_str().unwrap().to_string();

    let conversation: Value = test::call_and_read_body_json(
        &app,
        post_as(&format!("/posts/{post_id}/conversations"), "bob").to_request(),
    )
    .await;
    let conversation_id = conversation["id"].as_str().unwrap().to_string();

    // No kind field: a found post takes a claim.
    let resp = test::call_service(
        &app,
        multipart_as(
            &format!("/conversations/{conversation_id}/requests"),
            "bob",
            &[
                Part::Text("reason", "Sticker of a fox on the lid"),
                Part::Image("id_photo", "id.png"),
                Part::Image("evidence[]", "lid.png"),
            ],
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let request: Value = test::read_body_json(resp).await;
    assert_eq!(request["body"]["message_type"], "claim_request");
    let message_id = request["id"].as_str().unwrap().to_string();

    // A second claim while the first is open.
    let resp = test::call_service(
        &app,
        multipart_as(
            &format!("/conversations/{conversation_id}/requests"),
            "bob",
            &[Part::Text("reason", "again"), Part::Image("id_photo", "id.png")],
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = test::call_service(
        &app,
        multipart_as(
            &format!("/conversations/{conversation_id}/requests/{message_id}/respond"),
            "finder",
            &[
                Part::Text("decision", "accept"),
                Part::Image("verification_photo", "handover.png"),
            ],
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let report: Value = test::call_and_read_body_json(
        &app,
        post_as(
            &format!("/conversations/{conversation_id}/requests/{message_id}/confirm"),
            "bob",
        )
        .to_request(),
    )
    .await;
    assert_eq!(report["conversations_deleted"], 1);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri(&format!("/posts/{post_id}")).to_request(),
    )
    .await;
    let stored: Value = test::read_body_json(resp).await;
    assert_eq!(stored["status"], "completed");
}

#[actix_web::test]
async fn test_bad_decision_is_a_bad_request() {
    let h = harness();
    let state = web::Data::new(AppState {
        engine: Arc::new(h.engine),
        auth: Arc::new(token_auth()),
    });
    let app = test::init_service(App::new().app_data(state).configure(configure_routes)).await;

    let resp = test::call_service(
        &app,
        multipart_as(
            &format!(
                "/conversations/{}/requests/{}/respond",
                rc_core::ConversationId::new(),
                rc_core::MessageId::new()
            ),
            "finder",
            &[Part::Text("decision", "maybe")],
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation");
}
