//! # Engine
//!
//! Wires the services over one set of ports. Constructed once by the binary
//! (or a test) and shared behind `Arc`/`web::Data`.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::coordinator::ConfirmationCoordinator;
use crate::error::Result;
use crate::events::{EventBus, ResolutionEvent};
use crate::lifecycle::{ExpirationSweeper, PostService};
use crate::media::{Uploader, UrlPolicy};
use crate::queue::WriteQueue;
use crate::registry::ConversationRegistry;
use crate::service::{RequestRules, RequestService};
use crate::traits::{DocumentStore, MediaStore, NotificationDispatcher};
use crate::turnover::TurnoverService;

/// The adapters the engine runs against.
#[derive(Clone)]
pub struct EnginePorts {
    pub store: Arc<dyn DocumentStore>,
    pub media: Arc<dyn MediaStore>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    queue: Arc<WriteQueue>,
    events: EventBus,
    posts: PostService,
    conversations: ConversationRegistry,
    requests: RequestService,
    turnover: TurnoverService,
}

impl Engine {
    /// Starts the write queue, so this must run inside a tokio runtime.
    pub fn new(ports: EnginePorts, config: EngineConfig) -> Self {
        let EnginePorts {
            store,
            media,
            notifier,
        } = ports;

        let queue = Arc::new(WriteQueue::start(store.clone(), config.write_queue_capacity));
        let events = EventBus::new(config.event_channel_capacity);

        let conversations = ConversationRegistry::new(store.clone(), queue.clone(), config.message_cap);
        let uploader = Uploader::new(
            media,
            UrlPolicy::new(config.trusted_media_url_fragment.clone()),
            config.max_concurrent_uploads,
            config.max_upload_bytes,
        );
        let coordinator = ConfirmationCoordinator::new(store.clone(), notifier.clone(), events.clone());
        let requests = RequestService::new(
            store.clone(),
            conversations.clone(),
            uploader,
            coordinator,
            notifier.clone(),
            events.clone(),
            RequestRules {
                max_evidence_photos: config.max_evidence_photos,
                allow_admin_photo_bypass: config.allow_admin_photo_bypass,
            },
        );
        let posts = PostService::new(store.clone(), config.unclaimed_after_days);
        let turnover = TurnoverService::new(store.clone(), notifier);

        Self {
            config,
            store,
            queue,
            events,
            posts,
            conversations,
            requests,
            turnover,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn posts(&self) -> &PostService {
        &self.posts
    }

    pub fn conversations(&self) -> &ConversationRegistry {
        &self.conversations
    }

    pub fn requests(&self) -> &RequestService {
        &self.requests
    }

    pub fn turnover(&self) -> &TurnoverService {
        &self.turnover
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ResolutionEvent> {
        self.events.subscribe()
    }

    /// Starts the inactivity sweep at the configured interval.
    pub fn spawn_sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::spawn(
            self.posts.clone(),
            std::time::Duration::from_secs(self.config.sweep_interval_secs.max(1)),
        )
    }

    /// Waits for queued best-effort writes to land.
    pub async fn flush(&self) -> Result<()> {
        self.queue.flush().await
    }

    /// Drains the write queue and stops its worker.
    pub async fn shutdown(&self) -> Result<()> {
        self.queue.shutdown().await
    }
}
