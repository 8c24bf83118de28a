//! Immutable named byte blobs: model weights and generated outputs.
//!
//! An artifact is write-once. Writing the same bytes under an existing name
//! is a no-op; writing different bytes is an [`CoreError::ArtifactConflict`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::hashing::sha256_hex;

/// Maximum length of an artifact name.
const MAX_NAME_LEN: usize = 512;

/// Prefix under which worker outputs are published.
pub const OUTPUT_PREFIX: &str = "outputs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    /// SHA-256 hex digest of the content.
    pub content_hash: String,
    pub size_bytes: u64,
    /// Backend-specific location (file path, `s3://` URL, ...).
    pub location: String,
}

/// Validate an artifact name.
///
/// Rules:
/// - Must not be empty or exceed `MAX_NAME_LEN` characters.
/// - `/`-separated segments, none of them empty, `.` or `..`.
/// - Segments contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_artifact_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Artifact name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Artifact name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(CoreError::Validation(format!(
                "Artifact name '{name}' contains an empty or relative path segment"
            )));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(CoreError::Validation(format!(
                "Artifact name '{name}' may only contain alphanumeric, hyphen, underscore, dot or '/' characters"
            )));
        }
    }
    Ok(())
}

/// Content-addressed name for a generated output: `outputs/<sha256>.<ext>`.
pub fn output_artifact_name(bytes: &[u8], extension: &str) -> String {
    let hash = sha256_hex(bytes);
    let extension = extension.trim_start_matches('.');
    if extension.is_empty() {
        format!("{OUTPUT_PREFIX}/{hash}")
    } else {
        format!("{OUTPUT_PREFIX}/{hash}.{extension}")
    }
}

/// Resolve a second write of `name`: identical content returns the existing
/// artifact, anything else is a conflict.
pub fn reconcile_existing(
    existing: Artifact,
    name: &str,
    content_hash: &str,
) -> Result<Artifact, CoreError> {
    if existing.content_hash == content_hash {
        Ok(existing)
    } else {
        Err(CoreError::ArtifactConflict {
            name: name.to_string(),
        })
    }
}

/// Versioned, content-addressed artifact storage.
///
/// Readers never lock: artifacts are immutable once published, and a
/// publish is atomic so partial content is never visible.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<Artifact, CoreError>;

    async fn get(&self, name: &str) -> Result<Vec<u8>, CoreError>;

    /// Metadata for `name` without reading its content.
    async fn stat(&self, name: &str) -> Result<Artifact, CoreError>;

    async fn exists(&self, name: &str) -> Result<bool, CoreError> {
        match self.stat(name).await {
            Ok(_) => Ok(true),
            Err(CoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// In-process artifact store.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<String, (Artifact, Vec<u8>)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<Artifact, CoreError> {
        validate_artifact_name(name)?;
        let content_hash = sha256_hex(bytes);

        let mut artifacts = self.artifacts.write().await;
        if let Some((existing, _)) = artifacts.get(name) {
            return reconcile_existing(existing.clone(), name, &content_hash);
        }

        let artifact = Artifact {
            name: name.to_string(),
            content_hash,
            size_bytes: bytes.len() as u64,
            location: format!("memory://{name}"),
        };
        artifacts.insert(name.to_string(), (artifact.clone(), bytes.to_vec()));
        Ok(artifact)
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, CoreError> {
        validate_artifact_name(name)?;
        self.artifacts
            .read()
            .await
            .get(name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| CoreError::artifact_not_found(name))
    }

    async fn stat(&self, name: &str) -> Result<Artifact, CoreError> {
        validate_artifact_name(name)?;
        self.artifacts
            .read()
            .await
            .get(name)
            .map(|(artifact, _)| artifact.clone())
            .ok_or_else(|| CoreError::artifact_not_found(name))
    }
}
