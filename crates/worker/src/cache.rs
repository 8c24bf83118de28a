//! Local artifact cache.
//!
//! Files are keyed by content hash (`<dir>/<sha256>`), so a cached file can
//! never be stale: a different artifact version has a different hash. Files
//! are written to a temporary name and renamed into place, so concurrent
//! workers sharing a cache directory never see a partial file.

use std::path::{Path, PathBuf};

use melodia_core::error::CoreError;
use melodia_core::hashing::{is_sha256_hex, sha256_hex};

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    /// Open (and create if needed) a cache rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| cache_error("create cache directory", &dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, content_hash: &str) -> Result<PathBuf, CoreError> {
        if !is_sha256_hex(content_hash) {
            return Err(CoreError::Validation(format!(
                "'{content_hash}' is not a SHA-256 digest"
            )));
        }
        Ok(self.dir.join(content_hash))
    }

    /// Path of the cached copy of `content_hash`, if present.
    pub async fn lookup(&self, content_hash: &str) -> Result<Option<PathBuf>, CoreError> {
        let path = self.path_for(content_hash)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(Some(path)),
            Ok(false) => Ok(None),
            Err(e) => Err(cache_error("check cache entry", &path, e)),
        }
    }

    /// Store `bytes` under their hash. Fails if `bytes` do not hash to
    /// `content_hash`.
    pub async fn insert(&self, content_hash: &str, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        let path = self.path_for(content_hash)?;
        let actual = sha256_hex(bytes);
        if actual != content_hash {
            return Err(CoreError::Transient(format!(
                "Content hash mismatch: expected {content_hash}, got {actual}"
            )));
        }

        let tmp = self
            .dir
            .join(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| cache_error("write cache entry", &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(cache_error("publish cache entry", &path, e));
        }
        Ok(path)
    }
}

fn cache_error(action: &str, path: &Path, err: std::io::Error) -> CoreError {
    CoreError::Internal(format!("Failed to {action} {}: {err}", path.display()))
}
