//! # Verification photo uploads
//!
//! Wraps the `MediaStore` port with the rules the engine relies on: only images,
//! bounded concurrency for multi-file submissions, progress reporting, and a
//! domain check on every URL before it is written into a request.

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::traits::MediaStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: mime::Mime,
    pub data: Bytes,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, content_type: mime::Mime, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            data: data.into(),
        }
    }

    pub fn validate(&self, max_bytes: usize) -> Result<()> {
        if self.content_type.type_() != mime::IMAGE {
            return Err(AppError::validation(format!(
                "{} is not an image ({})",
                self.file_name, self.content_type
            )));
        }
        if self.data.is_empty() {
            return Err(AppError::validation(format!("{} is empty", self.file_name)));
        }
        if self.data.len() > max_bytes {
            return Err(AppError::validation(format!(
                "{} exceeds the {} byte limit",
                self.file_name, max_bytes
            )));
        }
        Ok(())
    }
}

/// Media URLs are opaque; we only trust ones served from our own storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPolicy {
    fragment: String,
}

impl UrlPolicy {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
        }
    }

    pub fn check(&self, url: &str) -> Result<()> {
        if url.contains(&self.fragment) {
            Ok(())
        } else {
            Err(AppError::Upload(format!("untrusted media url: {url}")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressFn = Arc<dyn Fn(UploadProgress) + Send + Sync>;

#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn MediaStore>,
    policy: UrlPolicy,
    max_concurrent: usize,
    max_bytes: usize,
}

impl Uploader {
    pub fn new(store: Arc<dyn MediaStore>, policy: UrlPolicy, max_concurrent: usize, max_bytes: usize) -> Self {
        Self {
            store,
            policy,
            max_concurrent: max_concurrent.max(1),
            max_bytes,
        }
    }

    pub async fn upload_image(&self, upload: ImageUpload, folder: &str) -> Result<String> {
        upload.validate(self.max_bytes)?;
        let name = upload.file_name.clone();
        let url = self
            .store
            .save_upload(upload, folder)
            .await
            .map_err(|e| AppError::Upload(format!("{name}: {e}")))?;
        self.policy.check(&url)?;
        Ok(url)
    }

    /// Uploads every file, at most `max_concurrent` at a time, keeping input order.
    ///
    /// Fails on the first error; uploads still in flight are dropped. Files that
    /// already landed are orphaned in the media store, never referenced.
    pub async fn upload_images(
        &self,
        uploads: Vec<ImageUpload>,
        folder: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<Vec<String>> {
        for upload in &uploads {
            upload.validate(self.max_bytes)?;
        }

        let total = uploads.len();
        let completed = AtomicUsize::new(0);
        let report = |_: &String| {
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(cb) = &on_progress {
                cb(UploadProgress { completed: done, total });
            }
        };

        let urls = futures::stream::iter(uploads)
            .map(|upload| self.upload_image(upload, folder))
            .buffered(self.max_concurrent)
            .inspect_ok(report)
            .try_collect::<Vec<_>>()
            .await;

        if let Err(e) = &urls {
            tracing::warn!(
                folder,
                total,
                completed = completed.load(Ordering::SeqCst),
                error = %e,
                "batch upload aborted"
            );
        }
        urls
    }
}
