use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::AppError;
use crate::types::{ALLOWED_IMAGE_EXT, UPLOADS_ROUTE};

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Dish images on local disk, served back under [`UPLOADS_ROUTE`].
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

/// Splits a client file name into a safe stem and a lower-cased allowed extension.
fn split_name(file_name: &str) -> Result<(String, String), AppError> {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    let ext = Path::new(base)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .filter(|ext| ALLOWED_IMAGE_EXT.contains(&ext.as_str()))
        .ok_or_else(|| {
            let allowed = ALLOWED_IMAGE_EXT.join(", ");
            AppError::validation(format!("unsupported image '{file_name}', allowed: {allowed}"))
        })?;

    let stem: String = Path::new(base)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "image".to_owned() } else { stem };

    Ok((stem, ext))
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        UploadStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `data` and returns the public URL of the stored file.
    pub async fn save(&self, file_name: &str, data: &[u8]) -> Result<String, AppError> {
        let (stem, ext) = split_name(file_name)?;
        if data.is_empty() {
            return Err(AppError::validation("empty image"));
        }
        if data.len() > MAX_IMAGE_BYTES {
            return Err(AppError::validation(format!("image larger than {} bytes", MAX_IMAGE_BYTES)));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let stored = format!("{}_{}.{}", stem, Utc::now().timestamp_millis(), ext);
        tokio::fs::write(self.dir.join(&stored), data).await?;
        tracing::info!(file = %stored, bytes = data.len(), "image stored");

        Ok(format!("{}/{}", UPLOADS_ROUTE, stored))
    }

    /// Removes the file behind a URL produced by [`save`](Self::save). Failure is logged only.
    pub async fn remove(&self, url: &str) {
        let Some(name) = url.strip_prefix(UPLOADS_ROUTE).map(|rest| rest.trim_start_matches('/')) else {
            tracing::warn!(url, "not a stored upload, skipping removal");
            return;
        };
        if name.is_empty() || name.contains('/') || name.contains("..") {
            tracing::warn!(url, "refusing to remove upload outside the uploads dir");
            return;
        }

        if let Err(err) = tokio::fs::remove_file(self.dir.join(name)).await {
            tracing::warn!(url, error = %err, "unable to remove stored image");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sanitized() {
        assert_eq!(split_name("../../etc/Pizza Big.JPG").unwrap(), ("Pizza_Big".to_owned(), "jpg".to_owned()));
        assert!(split_name(".webp").is_err());
        assert!(split_name("menu.pdf").is_err());
        assert!(split_name("noext").is_err());
    }

    #[actix_web::test]
    async fn saves_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));

        let url = store.save("soup.png", b"\x89PNG").await.unwrap();
        assert!(url.starts_with("/uploads/soup_"));
        assert!(url.ends_with(".png"));
        let path = store.dir().join(url.trim_start_matches("/uploads/"));
        assert!(path.exists());

        store.remove(&url).await;
        assert!(!path.exists());
        // a second removal only logs
        store.remove(&url).await;
    }

    #[actix_web::test]
    async fn rejects_empty_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path());

        assert!(matches!(store.save("a.png", b"").await, Err(AppError::Validation(_))));
        assert!(matches!(store.save("a.exe", b"MZ").await, Err(AppError::Validation(_))));
    }
}
