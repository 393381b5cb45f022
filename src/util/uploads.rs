use std::{
    io,
    path::{Path, PathBuf},
};

use crate::{errors::Result, models::mime_for_extension};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "jpg";

/// Directory holding request-scoped copies of uploaded photos.
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `data` under a fresh `<uuid>.<ext>` name. The returned guard owns the file.
    pub async fn persist(
        &self,
        filename: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<StoredUpload> {
        fs::create_dir_all(&self.root).await?;

        let extension = upload_extension(filename);
        let path = self
            .root
            .join(format!("{}.{}", Uuid::new_v4(), extension));
        let mime_type = content_type
            .filter(|value| is_mime(value))
            .map(str::to_string)
            .unwrap_or_else(|| mime_for_extension(&extension).to_string());

        // Guard first so a failed write still cleans up the partial file.
        let upload = StoredUpload { path, mime_type };
        fs::write(&upload.path, data).await?;

        debug!(target: "uploads", path = ?upload.path, bytes = data.len(), "stored upload");
        Ok(upload)
    }
}

/// A stored upload that is deleted when dropped.
#[derive(Debug)]
pub struct StoredUpload {
    path: PathBuf,
    mime_type: String,
}

impl StoredUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The MIME subtype without parameters, e.g. `png` for `image/png; q=1`.
    pub fn subtype(&self) -> Option<&str> {
        let (_, subtype) = self.mime_type.split_once('/')?;
        let subtype = subtype.split(';').next().unwrap_or_default().trim();
        (!subtype.is_empty()).then_some(subtype)
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path).await?)
    }
}

impl Drop for StoredUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(target: "uploads", path = ?self.path, "removed upload"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(target: "uploads", path = ?self.path, error = ?err, "failed to remove upload")
            }
        }
    }
}

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

fn upload_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

fn is_mime(value: &str) -> bool {
    matches!(value.split_once('/'), Some((kind, subtype)) if !kind.trim().is_empty() && !subtype.trim().is_empty())
}
