//! Filesystem artifact store.
//!
//! Layout under the root directory:
//!
//! ```text
//! blobs/<sha256>         content, shared by every name that points at it
//! refs/<sha256(name)>    the sha256 of the named content, then the name
//! tmp/<uuid>             staging area; never read
//! ```
//!
//! Refs are flat files keyed by a digest of the name, so `models/a` and
//! `models/a/weights` never compete for the same path.
//!
//! Content is staged in `tmp/`, flushed, then published. Blobs are renamed
//! into place (two writers of the same blob write identical bytes). Refs
//! are published with a hard link, which fails if the ref already exists,
//! so the first writer of a name wins and the loser compares content.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use melodia_core::artifact::{reconcile_existing, validate_artifact_name, Artifact, ArtifactStore};
use melodia_core::error::CoreError;
use melodia_core::hashing::{is_sha256_hex, sha256_hex};
use tokio::io::AsyncWriteExt;

const BLOBS_DIR: &str = "blobs";
const REFS_DIR: &str = "refs";
const TMP_DIR: &str = "tmp";

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        for dir in [BLOBS_DIR, REFS_DIR, TMP_DIR] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .map_err(|e| io_error("create store directory", &root, e))?;
        }
        tracing::debug!(root = %root.display(), "Filesystem artifact store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join(BLOBS_DIR).join(hash)
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join(REFS_DIR).join(sha256_hex(name.as_bytes()))
    }

    fn tmp_path(&self) -> PathBuf {
        self.root.join(TMP_DIR).join(uuid::Uuid::new_v4().to_string())
    }

    /// Write `bytes` to a fresh staging file and flush it to disk.
    async fn stage(&self, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| io_error("create staging file", &tmp, e))?;
        let written = match file.write_all(bytes).await {
            Ok(()) => file.sync_all().await,
            Err(e) => Err(e),
        };
        drop(file);
        if let Err(e) = written {
            discard_staging(&tmp).await;
            return Err(io_error("write staging file", &tmp, e));
        }
        Ok(tmp)
    }

    async fn publish_blob(&self, hash: &str, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        let blob = self.blob_path(hash);
        if tokio::fs::try_exists(&blob).await.unwrap_or(false) {
            return Ok(blob);
        }
        let tmp = self.stage(bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &blob).await {
            discard_staging(&tmp).await;
            return Err(io_error("publish blob", &blob, e));
        }
        Ok(blob)
    }

    /// Bind `name` to `hash`. Returns `false` if the name was already bound.
    async fn publish_ref(&self, name: &str, hash: &str) -> Result<bool, CoreError> {
        let target = self.ref_path(name);
        let tmp = self.stage(format!("{hash}\n{name}\n").as_bytes()).await?;
        let linked = tokio::fs::hard_link(&tmp, &target).await;
        // The staging file is only a link source; drop it either way.
        discard_staging(&tmp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_error("publish ref", &target, e)),
        }
    }

    async fn read_ref(&self, name: &str) -> Result<String, CoreError> {
        let path = self.ref_path(name);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CoreError::artifact_not_found(name))
            }
            Err(e) => return Err(io_error("read ref", &path, e)),
        };
        let mut lines = contents.lines();
        let hash = lines.next().unwrap_or_default().trim().to_string();
        if !is_sha256_hex(&hash) || lines.next() != Some(name) {
            return Err(CoreError::Internal(format!(
                "Ref for artifact '{name}' is corrupt"
            )));
        }
        Ok(hash)
    }
}

async fn discard_staging(tmp: &Path) {
    if let Err(e) = tokio::fs::remove_file(tmp).await {
        tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove staging file");
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> CoreError {
    CoreError::StorageUnavailable(format!("Failed to {action} {}: {err}", path.display()))
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<Artifact, CoreError> {
        validate_artifact_name(name)?;
        let content_hash = sha256_hex(bytes);

        match self.stat(name).await {
            Ok(existing) => return reconcile_existing(existing, name, &content_hash),
            Err(CoreError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let blob = self.publish_blob(&content_hash, bytes).await?;
        if !self.publish_ref(name, &content_hash).await? {
            // Lost a race with a concurrent writer of the same name.
            let existing = self.stat(name).await?;
            return reconcile_existing(existing, name, &content_hash);
        }

        tracing::debug!(
            artifact = name,
            content_hash = %content_hash,
            size_bytes = bytes.len(),
            "Artifact published",
        );
        Ok(Artifact {
            name: name.to_string(),
            content_hash,
            size_bytes: bytes.len() as u64,
            location: blob.display().to_string(),
        })
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, CoreError> {
        validate_artifact_name(name)?;
        let hash = self.read_ref(name).await?;
        let blob = self.blob_path(&hash);
        tokio::fs::read(&blob).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => CoreError::Internal(format!(
                "Artifact '{name}' points at missing blob {hash}"
            )),
            _ => io_error("read blob", &blob, e),
        })
    }

    async fn stat(&self, name: &str) -> Result<Artifact, CoreError> {
        validate_artifact_name(name)?;
        let hash = self.read_ref(name).await?;
        let blob = self.blob_path(&hash);
        let metadata = tokio::fs::metadata(&blob)
            .await
            .map_err(|e| io_error("stat blob", &blob, e))?;
        Ok(Artifact {
            name: name.to_string(),
            content_hash: hash,
            size_bytes: metadata.len(),
            location: blob.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path().join("store")).await.unwrap();
        for sub in [BLOBS_DIR, REFS_DIR, TMP_DIR] {
            assert!(store.root().join(sub).is_dir());
        }
    }

    #[tokio::test]
    async fn identical_content_shares_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();

        let a = store.put("songs/a", b"same bytes").await.unwrap();
        let b = store.put("songs/b", b"same bytes").await.unwrap();
        assert_eq!(a.location, b.location);

        let blobs = std::fs::read_dir(store.root().join(BLOBS_DIR)).unwrap().count();
        assert_eq!(blobs, 1);
    }

    #[tokio::test]
    async fn staging_area_is_left_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        store.put("x", b"1").await.unwrap();
        let _ = store.put("x", b"2").await;

        let leftovers = std::fs::read_dir(store.root().join(TMP_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn refs_are_flat_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        store.put("models/a/weights", b"w").await.unwrap();
        store.put("models/a", b"m").await.unwrap();

        let refs: Vec<_> = std::fs::read_dir(store.root().join(REFS_DIR))
            .unwrap()
            .map(|entry| entry.unwrap())
            .collect();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|entry| entry.path().is_file()));
    }

    #[tokio::test]
    async fn failed_blob_publish_cleans_up_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        // Without the blobs directory the rename into place fails.
        std::fs::remove_dir(store.root().join(BLOBS_DIR)).unwrap();

        let result = store.publish_blob(&sha256_hex(b"payload"), b"payload").await;
        assert!(matches!(result, Err(CoreError::StorageUnavailable(_))));

        let leftovers = std::fs::read_dir(store.root().join(TMP_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
