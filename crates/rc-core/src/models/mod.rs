//! # Domain Models
//!
//! These structs represent the documents the engine reads and writes:
//! posts, conversations and the messages (including claim/handover requests)
//! stored under each conversation.
//! We use UUID v7 for time-ordered, globally unique identification.

pub mod conversation;
pub mod ids;
pub mod message;
pub mod post;
pub mod user;

pub use conversation::*;
pub use ids::*;
pub use message::*;
pub use post::*;
pub use user::*;
