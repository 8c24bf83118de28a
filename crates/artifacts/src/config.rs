use std::path::PathBuf;
use std::sync::Arc;

use melodia_core::artifact::ArtifactStore;
use melodia_core::error::CoreError;

use crate::fs::FsArtifactStore;
use crate::s3::S3ArtifactStore;

/// Default root for the filesystem backend.
const DEFAULT_ARTIFACT_ROOT: &str = "./data/artifacts";

/// Which artifact backend to use, loaded from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Filesystem {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        prefix: String,
        region: Option<String>,
        endpoint: Option<String>,
    },
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var          | Default              |
    /// |------------------|----------------------|
    /// | `ARTIFACT_STORE` | `fs` (`fs` or `s3`)  |
    /// | `ARTIFACT_ROOT`  | `./data/artifacts`   |
    /// | `S3_BUCKET`      | required for `s3`    |
    /// | `S3_PREFIX`      | empty                |
    /// | `S3_REGION`      | AWS default chain    |
    /// | `S3_ENDPOINT`    | AWS                  |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let backend = non_empty("ARTIFACT_STORE").unwrap_or_else(|| "fs".into());

        match backend.as_str() {
            "fs" => Ok(Self::Filesystem {
                root: non_empty("ARTIFACT_ROOT")
                    .unwrap_or_else(|| DEFAULT_ARTIFACT_ROOT.into())
                    .into(),
            }),
            "s3" => Ok(Self::S3 {
                bucket: non_empty("S3_BUCKET").ok_or_else(|| {
                    CoreError::Validation("ARTIFACT_STORE=s3 requires S3_BUCKET".to_string())
                })?,
                prefix: non_empty("S3_PREFIX").unwrap_or_default(),
                region: non_empty("S3_REGION"),
                endpoint: non_empty("S3_ENDPOINT"),
            }),
            other => Err(CoreError::Validation(format!(
                "Unknown ARTIFACT_STORE '{other}'. Must be one of: fs, s3"
            ))),
        }
    }
}

/// Open the configured backend.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ArtifactStore>, CoreError> {
    match config {
        StoreConfig::Filesystem { root } => Ok(Arc::new(FsArtifactStore::open(root).await?)),
        StoreConfig::S3 {
            bucket,
            prefix,
            region,
            endpoint,
        } => Ok(Arc::new(
            S3ArtifactStore::connect(bucket, prefix, region.clone(), endpoint.clone()).await,
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_filesystem() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            config,
            StoreConfig::Filesystem {
                root: PathBuf::from(DEFAULT_ARTIFACT_ROOT)
            }
        );
    }

    #[test]
    fn s3_requires_bucket() {
        assert!(StoreConfig::from_lookup(lookup(&[("ARTIFACT_STORE", "s3")])).is_err());

        let config = StoreConfig::from_lookup(lookup(&[
            ("ARTIFACT_STORE", "s3"),
            ("S3_BUCKET", "ace-step-models"),
            ("S3_ENDPOINT", "http://localhost:9000"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            StoreConfig::S3 {
                bucket: "ace-step-models".into(),
                prefix: String::new(),
                region: None,
                endpoint: Some("http://localhost:9000".into()),
            }
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(StoreConfig::from_lookup(lookup(&[("ARTIFACT_STORE", "ftp")])).is_err());
    }
}
