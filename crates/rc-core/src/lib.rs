//! rc-core
//!
//! Domain model, port traits and the resolution engine for Reclaim: claim and
//! handover requests on lost/found posts, confirmed at most once per post.

pub mod batch;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod hub;
pub mod lifecycle;
pub mod live;
pub mod media;
pub mod models;
pub mod notify;
pub mod queue;
pub mod registry;
pub mod request;
pub mod service;
pub mod traits;
pub mod turnover;

// Re-exporting for easier access in other crates
pub use batch::*;
pub use config::EngineConfig;
pub use coordinator::{ConfirmationCoordinator, ConfirmationReport, RejectedRequest};
pub use engine::{Engine, EnginePorts};
pub use error::*;
pub use events::{EventBus, ResolutionEvent};
pub use hub::{ChangeEvent, ChangeHub, Delivery, Subscription, Topic};
pub use lifecycle::{ExpirationSweeper, NewPost, PostService};
pub use live::{CloseReason, LiveConversation, LiveUpdate};
pub use media::{ImageUpload, ProgressFn, UploadProgress, Uploader, UrlPolicy};
pub use models::*;
pub use notify::{LoggingDispatcher, Notification, NotificationKind};
pub use queue::WriteQueue;
pub use registry::ConversationRegistry;
pub use request::{Verification, AUTO_REJECTION_REASON};
pub use service::{Decision, RequestDraft, RequestRules, RequestService};
pub use traits::*;
pub use turnover::{TurnoverChooser, TurnoverOutcome, TurnoverService};
