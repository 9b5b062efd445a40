// Photo storage for listings

use std::path::PathBuf;

use axum::async_trait;
use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Blob storage for listing photos.
///
/// Every URL returned by `upload` must be accepted by `delete_by_url`.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, data: Vec<u8>, content_type: &str) -> Result<String>;

    /// Removes the object behind a URL previously issued by this store.
    /// Deleting an object that is already gone succeeds.
    async fn delete_by_url(&self, url: &str) -> Result<()>;
}

pub struct DiskMediaStore {
    base_path: PathBuf,
    public_base: String,
}

impl DiskMediaStore {
    /// `public_base` is the URL prefix under which `base_path` is served.
    pub fn new(base_path: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create media directory: {e}")))?;
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base)
    }

    fn key_for(&self, url: &str) -> Result<String> {
        let key = url
            .strip_prefix(&self.public_base)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| is_valid_key(key))
            .ok_or_else(|| AppError::NotFound(format!("Not a stored media URL: {url}")))?;
        Ok(key.to_string())
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !key.contains("..")
}

pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[async_trait]
impl MediaStore for DiskMediaStore {
    async fn upload(&self, data: Vec<u8>, content_type: &str) -> Result<String> {
        let ext = extension_for(content_type).ok_or_else(|| {
            AppError::Validation(format!("Unsupported media type {content_type:?}"))
        })?;
        if data.is_empty() {
            return Err(AppError::Validation("Uploaded file is empty".to_string()));
        }

        let key = format!("{}.{ext}", Uuid::new_v4());
        fs::write(self.base_path.join(&key), &data)
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("Failed to write media: {e}")))?;

        Ok(self.url_for(&key))
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        let path = self.base_path.join(self.key_for(url)?);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::StoreUnavailable(format!(
                "Failed to delete media: {e}"
            ))),
        }
    }
}
