//! Artifact store backends.
//!
//! - [`FsArtifactStore`]: local or shared-volume filesystem.
//! - [`S3ArtifactStore`]: Amazon S3 or any S3-compatible endpoint.
//!
//! Both implement [`melodia_core::artifact::ArtifactStore`]; pick one at
//! startup with [`StoreConfig::from_env`] and [`open_store`].

pub mod config;
pub mod fs;
pub mod s3;

pub use config::{open_store, StoreConfig};
pub use fs::FsArtifactStore;
pub use s3::S3ArtifactStore;
