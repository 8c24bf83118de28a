//! S3 artifact store.
//!
//! Each artifact is one object at `<prefix><name>` carrying its SHA-256 in
//! the `sha256` user metadata. Objects are written with `If-None-Match: *`
//! so a name can only be created once; S3 makes a completed PUT visible
//! atomically, so readers never observe partial content.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use melodia_core::artifact::{reconcile_existing, validate_artifact_name, Artifact, ArtifactStore};
use melodia_core::error::CoreError;
use melodia_core::hashing::{is_sha256_hex, sha256_hex};

/// User metadata key holding the content hash.
const HASH_METADATA_KEY: &str = "sha256";

/// HTTP status S3 returns when a conditional write finds an existing object.
const PRECONDITION_FAILED: u16 = 412;

pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3ArtifactStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: normalize_prefix(&prefix.into()),
        }
    }

    /// Build a client from the default AWS credential chain.
    ///
    /// `endpoint` selects an S3-compatible service (MinIO, R2, ...) and
    /// switches to path-style addressing.
    pub async fn connect(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        region: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.is_some())
            .build();
        Self::new(aws_sdk_s3::Client::from_conf(s3_config), bucket, prefix)
    }

    fn key(&self, name: &str) -> String {
        object_key(&self.prefix, name)
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }
}

/// Ensure a non-empty prefix ends with exactly one `/`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn object_key(prefix: &str, name: &str) -> String {
    format!("{prefix}{name}")
}

/// Classify an SDK failure. Timeouts and connection failures are worth
/// retrying; everything else means the store is not usable right now.
fn sdk_error<E, R>(action: &str, err: SdkError<E, R>) -> CoreError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("S3 {action} failed: {}", DisplayErrorContext(&err));
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => CoreError::Transient(message),
        _ => CoreError::StorageUnavailable(message),
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<Artifact, CoreError> {
        validate_artifact_name(name)?;
        let content_hash = sha256_hex(bytes);

        match self.stat(name).await {
            Ok(existing) => return reconcile_existing(existing, name, &content_hash),
            Err(CoreError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let key = self.key(name);
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .metadata(HASH_METADATA_KEY, &content_hash)
            .if_none_match("*")
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    artifact = name,
                    bucket = %self.bucket,
                    content_hash = %content_hash,
                    "Artifact uploaded",
                );
                Ok(Artifact {
                    name: name.to_string(),
                    content_hash,
                    size_bytes: bytes.len() as u64,
                    location: self.location(&key),
                })
            }
            Err(err)
                if err.raw_response().map(|r| r.status().as_u16())
                    == Some(PRECONDITION_FAILED) =>
            {
                // A concurrent writer created the object first.
                let existing = self.stat(name).await?;
                reconcile_existing(existing, name, &content_hash)
            }
            Err(err) => Err(sdk_error("put_object", err)),
        }
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, CoreError> {
        validate_artifact_name(name)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    CoreError::artifact_not_found(name)
                } else {
                    sdk_error("get_object", err)
                }
            })?;

        let body = output.body.collect().await.map_err(|e| {
            CoreError::Transient(format!("S3 body read for '{name}' failed: {e}"))
        })?;
        Ok(body.into_bytes().to_vec())
    }

    async fn stat(&self, name: &str) -> Result<Artifact, CoreError> {
        validate_artifact_name(name)?;
        let key = self.key(name);
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    CoreError::artifact_not_found(name)
                } else {
                    sdk_error("head_object", err)
                }
            })?;

        let content_hash = output
            .metadata()
            .and_then(|m| m.get(HASH_METADATA_KEY))
            .filter(|hash| is_sha256_hex(hash))
            .cloned()
            .ok_or_else(|| {
                CoreError::Internal(format!(
                    "S3 object '{key}' has no valid {HASH_METADATA_KEY} metadata"
                ))
            })?;

        Ok(Artifact {
            name: name.to_string(),
            content_hash,
            size_bytes: output.content_length().unwrap_or(0).max(0) as u64,
            location: self.location(&key),
        })
    }
}
