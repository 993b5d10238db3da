//! Source-video storage: fetch an uploaded video into a local file the
//! decoder can read.
//!
//! Remote objects are streamed into a temporary file that is deleted when
//! the returned [`StagedVideo`] is dropped, on success, error or
//! cancellation alike.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::config::{S3Config, StorageConfig};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("video object not found: {0}")]
    NotFound(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("storage request failed: {0}")]
    Transport(String),

    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// A malformed key will never resolve; everything else may be transient.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, StorageError::InvalidKey(_))
    }
}

/// A video available on the local filesystem for the duration of one
/// extraction.
#[derive(Debug)]
pub enum StagedVideo {
    /// Downloaded copy, removed on drop.
    Temporary(TempPath),
    /// File that already lives on local disk; left untouched.
    InPlace(PathBuf),
}

impl StagedVideo {
    pub fn path(&self) -> &Path {
        match self {
            StagedVideo::Temporary(path) => &**path,
            StagedVideo::InPlace(path) => path.as_path(),
        }
    }
}

#[async_trait]
pub trait VideoStorage: Send + Sync {
    /// Make the object stored under `key` readable as a local file.
    async fn fetch(&self, key: &str) -> Result<StagedVideo, StorageError>;
}

/// Build the configured storage backend.
pub async fn from_config(config: &StorageConfig) -> Box<dyn VideoStorage> {
    match config {
        StorageConfig::S3(s3) => Box::new(S3Storage::connect(s3).await),
        StorageConfig::Local { root } => Box::new(LocalStorage::new(root.clone())),
    }
}

// ---------------------------------------------------------------------------
// S3 / MinIO
// ---------------------------------------------------------------------------

pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Storage {
    /// Client for an S3-compatible endpoint using static credentials and
    /// path-style addressing (required by MinIO).
    pub async fn connect(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "carlitos-env",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url())
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl VideoStorage for S3Storage {
    async fn fetch(&self, key: &str) -> Result<StagedVideo, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(service) if service.is_no_such_key() => StorageError::NotFound(key.to_string()),
                _ => StorageError::Transport(DisplayErrorContext(&err).to_string()),
            })?;

        let staging = tempfile::Builder::new()
            .prefix("carlitos-video-")
            .tempfile()?;
        let mut file = tokio::fs::File::from_std(staging.reopen()?);
        let path = staging.into_temp_path();

        let mut body = output.body;
        let mut written: u64 = 0;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(key, bytes = written, path = %path.display(), "Video staged from object storage");
        Ok(StagedVideo::Temporary(path))
    }
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Videos stored under a local directory; keys are relative paths.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl VideoStorage for LocalStorage {
    async fn fetch(&self, key: &str) -> Result<StagedVideo, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(StagedVideo::InPlace(path)),
            Ok(_) => Err(StorageError::NotFound(key.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn local_fetch_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads/serve.mp4"), b"video").unwrap();

        let storage = LocalStorage::new(dir.path().to_path_buf());
        let staged = storage.fetch("uploads/serve.mp4").await.unwrap();
        assert_matches!(staged, StagedVideo::InPlace(_));
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"video");
    }

    #[tokio::test]
    async fn local_fetch_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());
        let result = storage.fetch("nope.mp4").await;
        assert_matches!(result, Err(StorageError::NotFound(_)));
        assert!(result.unwrap_err().is_retriable());
    }

    #[tokio::test]
    async fn local_rejects_escaping_keys() {
        let storage = LocalStorage::new(PathBuf::from("/srv/videos"));
        for key in ["../etc/passwd", "/etc/passwd", ""] {
            let result = storage.fetch(key).await;
            assert_matches!(result, Err(StorageError::InvalidKey(_)));
        }
        assert!(!StorageError::InvalidKey("x".into()).is_retriable());
    }

    #[test]
    fn temporary_staging_removed_on_drop() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let staged = StagedVideo::Temporary(file.into_temp_path());
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        drop(staged);
        assert!(!path.exists());
    }
}
