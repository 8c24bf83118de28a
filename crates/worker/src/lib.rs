//! Worker side of the execution boundary.
//!
//! A [`WorkerPool`] runs N [`Worker`]s, each claiming jobs from the shared
//! queue, materialising the artifacts they need through the local cache,
//! invoking the generation capability under a heartbeat-renewed lease, and
//! publishing the output to the artifact store.

pub mod cache;
pub mod config;
pub mod generator;
pub mod heartbeat;
pub mod pool;
pub mod reaper;
pub mod resolver;
pub mod worker;

pub use cache::ArtifactCache;
pub use config::WorkerConfig;
pub use generator::{GeneratorConfig, HttpGenerator};
pub use pool::WorkerPool;
pub use worker::{Settlement, Worker};
