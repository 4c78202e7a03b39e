//! # rc-storage-local
//! Local filesystem implementation of `MediaStore`.
//! Features: content-addressable storage, directory sharding, and format sniffing.

use async_trait::async_trait;
use image::ImageFormat;
use rc_core::media::ImageUpload;
use rc_core::traits::MediaStore;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

pub struct LocalMediaStore {
    /// Root directory for all uploads (e.g., "./data/uploads")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/static/uploads")
    url_prefix: String,
}

impl LocalMediaStore {
    pub fn new(root: PathBuf, url_prefix: impl Into<String>) -> Self {
        Self {
            root_path: root,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Generates a sharded relative path: "folder/ab/cd/abcd...hash.ext"
    fn sharded_path(folder: &str, hash: &str, ext: &str) -> PathBuf {
        let mut path = PathBuf::from(folder);
        path.push(&hash[0..2]);
        path.push(&hash[2..4]);
        path.push(format!("{hash}.{ext}"));
        path
    }
}

/// Folders come from the engine, but never let one escape the root.
fn checked_folder(folder: &str) -> anyhow::Result<&str> {
    let ok = !folder.is_empty()
        && Path::new(folder)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(folder)
    } else {
        anyhow::bail!("invalid upload folder: {folder:?}")
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    /// Saves an upload using its SHA-256 hash as the filename.
    /// Identical files land on the same path and are written once.
    async fn save_upload(&self, upload: ImageUpload, folder: &str) -> anyhow::Result<String> {
        let folder = checked_folder(folder)?;

        // 1. Sniff the real format; the declared content type is only a hint.
        let format = image::guess_format(&upload.data)?;
        let ext = format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("bin");
        if !matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Gif
        ) {
            anyhow::bail!("unsupported image format {format:?}");
        }

        // 2. Calculate Hash
        let hash = hex::encode(Sha256::digest(&upload.data));
        let relative = Self::sharded_path(folder, &hash, ext);
        let target = self.root_path.join(&relative);

        // 3. Save (if not exists)
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        if !fs::try_exists(&target).await? {
            fs::write(&target, &upload.data).await?;
            tracing::debug!(path = %target.display(), bytes = upload.data.len(), "upload stored");
        }

        let rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!("{}/{}", self.url_prefix, rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Smallest valid PNG header plus IHDR; enough for format sniffing.
    const PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];

    fn upload(data: &[u8]) -> ImageUpload {
        ImageUpload::new("id.png", mime::IMAGE_PNG, data.to_vec())
    }

    #[tokio::test]
    async fn test_save_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path().to_path_buf(), "/static/uploads/");

        let first = store.save_upload(upload(PNG), "claims").await.unwrap();
        let second = store.save_upload(upload(PNG), "claims").await.unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("/static/uploads/claims/"));
        assert!(first.ends_with(".png"));
        let on_disk = dir
            .path()
            .join(first.trim_start_matches("/static/uploads/"));
        assert!(on_disk.exists());
    }

    #[tokio::test]
    async fn test_rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path().to_path_buf(), "/static/uploads");
        assert!(store.save_upload(upload(b"%PDF-1.7"), "claims").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_escaping_folders() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path().to_path_buf(), "/static/uploads");
        assert!(store.save_upload(upload(PNG), "../etc").await.is_err());
        assert!(store.save_upload(upload(PNG), "/abs").await.is_err());
    }
}
