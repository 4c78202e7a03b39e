//! Shared fixtures: an engine over the in-memory store, scripted media, and a
//! dispatcher that records what it was asked to send.
#![allow(dead_code)]

use async_trait::async_trait;
use rc_core::{
    ActingUser, Conversation, Decision, Engine, EngineConfig, EnginePorts, ImageUpload, Message,
    MockMediaStore, NewPost, Notification, NotificationDispatcher, NotificationKind, Post, PostKind,
    RequestDraft, RequestKind, Role, UserId,
};
use rc_store_memory::MemoryStore;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(Vec<UserId>, NotificationKind)>>,
}

impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<(Vec<UserId>, NotificationKind)> {
        self.sent.lock().unwrap().clone()
    }

    /// How many notifications of `kind` reached `user`.
    pub fn count_for(&self, user: &str, kind: NotificationKind) -> usize {
        self.sent()
            .iter()
            .filter(|(users, k)| *k == kind && users.iter().any(|u| u.as_str() == user))
            .count()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send_to_users(&self, user_ids: &[UserId], notification: &Notification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((user_ids.to_vec(), notification.kind));
        Ok(())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingDispatcher>,
}

/// Media store that accepts everything and answers with a trusted URL.
pub fn accepting_media() -> MockMediaStore {
    let mut media = MockMediaStore::new();
    media
        .expect_save_upload()
        .returning(|upload, folder| Ok(format!("https://cdn.test/static/uploads/{folder}/{}", upload.file_name)));
    media
}

pub fn harness() -> Harness {
    harness_with(accepting_media(), EngineConfig::default())
}

/// Must run inside a tokio runtime (the engine starts its write queue).
pub fn harness_with(media: MockMediaStore, config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingDispatcher::default());
    let engine = Engine::new(
        EnginePorts {
            store: store.clone(),
            media: Arc::new(media),
            notifier: notifier.clone(),
        },
        config,
    );
    Harness {
        engine,
        store,
        notifier,
    }
}

pub fn user(id: &str) -> ActingUser {
    ActingUser::new(id, Role::User)
}

pub fn admin(id: &str) -> ActingUser {
    ActingUser::new(id, Role::Admin)
}

pub fn png(name: &str) -> ImageUpload {
    ImageUpload::new(name, mime::IMAGE_PNG, vec![0x89, b'P', b'N', b'G'])
}

pub fn claim() -> RequestDraft {
    RequestDraft::new(RequestKind::Claim, "It has my initials on the strap").with_id_photo(png("id.png"))
}

pub fn accept() -> Decision {
    Decision::Accept {
        verification_photo: Some(png("handover.png")),
    }
}

pub async fn post(engine: &Engine, owner: &ActingUser, kind: PostKind, title: &str) -> Post {
    engine
        .posts()
        .create_post(
            owner,
            NewPost {
                kind,
                title: title.to_string(),
                description: None,
            },
        )
        .await
        .unwrap()
}

pub async fn found_post(engine: &Engine, owner: &ActingUser) -> Post {
    post(engine, owner, PostKind::Found, "Black backpack").await
}

/// Opens `claimant`'s conversation on `post` and submits a claim.
pub async fn submit_claim(engine: &Engine, post: &Post, claimant: &ActingUser) -> (Conversation, Message) {
    let conversation = engine
        .conversations()
        .get_or_create(post.id, claimant)
        .await
        .unwrap();
    let message = engine
        .requests()
        .submit(conversation.id, claimant, claim())
        .await
        .unwrap();
    (conversation, message)
}

/// A claim the poster has already accepted, waiting for the claimant to confirm.
pub async fn accepted_claim(
    engine: &Engine,
    post: &Post,
    owner: &ActingUser,
    claimant: &ActingUser,
) -> (Conversation, Message) {
    let (conversation, message) = submit_claim(engine, post, claimant).await;
    let message = engine
        .requests()
        .respond(conversation.id, message.id, owner, accept())
        .await
        .unwrap();
    (conversation, message)
}
