//! Materialises the artifacts a job needs on local disk.
//!
//! Lookup order: store metadata (for the current content hash), then the
//! local cache, then a full fetch. Every store call runs under the
//! configured timeout; transient failures are retried with backoff up to
//! the configured number of attempts. Fetched bytes are verified against
//! the published hash before they enter the cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use melodia_core::artifact::ArtifactStore;
use melodia_core::backoff::{Backoff, BackoffConfig};
use melodia_core::error::CoreError;
use melodia_core::generation::LocalArtifact;
use melodia_core::hashing::sha256_hex;
use melodia_core::types::JobParams;

use crate::cache::ArtifactCache;

/// Job parameter listing extra artifact names (array of strings).
pub const ARTIFACTS_PARAM: &str = "artifacts";

pub struct ArtifactResolver {
    store: Arc<dyn ArtifactStore>,
    cache: ArtifactCache,
    fetch_timeout: Duration,
    fetch_attempts: u32,
    fetch_backoff: BackoffConfig,
}

impl ArtifactResolver {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        cache: ArtifactCache,
        fetch_timeout: Duration,
        fetch_attempts: u32,
        fetch_backoff: BackoffConfig,
    ) -> Self {
        Self {
            store,
            cache,
            fetch_timeout,
            fetch_attempts: fetch_attempts.max(1),
            fetch_backoff,
        }
    }

    /// Resolve every name, in order.
    pub async fn resolve_all(&self, names: &[String]) -> Result<Vec<LocalArtifact>, CoreError> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            resolved.push(self.resolve(name).await?);
        }
        Ok(resolved)
    }

    pub async fn resolve(&self, name: &str) -> Result<LocalArtifact, CoreError> {
        let artifact = self.with_retry(name, move || self.store.stat(name)).await?;

        if let Some(path) = self.cache.lookup(&artifact.content_hash).await? {
            tracing::debug!(artifact = name, content_hash = %artifact.content_hash, "Artifact cache hit");
            return Ok(LocalArtifact {
                name: artifact.name,
                content_hash: artifact.content_hash,
                path,
            });
        }

        let expected = artifact.content_hash.as_str();
        let bytes = self
            .with_retry(name, move || async move {
                let bytes = self.store.get(name).await?;
                let actual = sha256_hex(&bytes);
                if actual != expected {
                    return Err(CoreError::Transient(format!(
                        "Artifact '{name}' failed verification: expected {expected}, got {actual}"
                    )));
                }
                Ok(bytes)
            })
            .await?;

        let path = self.cache.insert(expected, &bytes).await?;
        tracing::info!(
            artifact = name,
            content_hash = %expected,
            size_bytes = bytes.len(),
            "Artifact fetched into cache",
        );
        Ok(LocalArtifact {
            name: artifact.name.clone(),
            content_hash: artifact.content_hash.clone(),
            path,
        })
    }

    /// Run `op` under the fetch timeout, retrying transient failures.
    async fn with_retry<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut backoff = Backoff::new(self.fetch_backoff.clone());
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.fetch_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Transient(format!(
                    "Fetching artifact '{name}' timed out after {:?}",
                    self.fetch_timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.fetch_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        artifact = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Artifact fetch failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Names of every artifact a job needs: the configured model artifacts
/// followed by those listed in the job's `artifacts` parameter, without
/// duplicates.
pub fn required_artifacts(
    model_artifacts: &[String],
    params: &JobParams,
) -> Result<Vec<String>, CoreError> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };

    for name in model_artifacts {
        push(name);
    }

    match params.get(ARTIFACTS_PARAM) {
        None | Some(serde_json::Value::Null) => {}
        Some(serde_json::Value::Array(items)) => {
            for item in items {
                let name = item.as_str().ok_or_else(|| {
                    CoreError::Validation(format!(
                        "'{ARTIFACTS_PARAM}' must be an array of artifact names"
                    ))
                })?;
                push(name);
            }
        }
        Some(_) => {
            return Err(CoreError::Validation(format!(
                "'{ARTIFACTS_PARAM}' must be an array of artifact names"
            )))
        }
    }
    Ok(names)
}
