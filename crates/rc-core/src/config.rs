//! Engine tunables. Loaded by `rc-config`, defaulted here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Messages kept per conversation; older ones are evicted first.
    pub message_cap: usize,
    pub max_evidence_photos: usize,
    pub max_concurrent_uploads: usize,
    /// Largest accepted image, in bytes.
    pub max_upload_bytes: usize,
    /// Every media URL must contain this substring before we store it.
    pub trusted_media_url_fragment: String,
    /// Admins may accept a request without taking a verification photo.
    pub allow_admin_photo_bypass: bool,
    pub unclaimed_after_days: i64,
    pub sweep_interval_secs: u64,
    pub write_queue_capacity: usize,
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            message_cap: 50,
            max_evidence_photos: 5,
            max_concurrent_uploads: 3,
            max_upload_bytes: 10 * 1024 * 1024,
            trusted_media_url_fragment: "/static/uploads/".to_string(),
            allow_admin_photo_bypass: true,
            unclaimed_after_days: 30,
            sweep_interval_secs: 3600,
            write_queue_capacity: 256,
            event_channel_capacity: 256,
        }
    }
}
