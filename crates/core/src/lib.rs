//! Melodia core: the job-execution domain shared by every other crate.
//!
//! - [`queue::JobQueue`]: durable queue with lease-guarded claims.
//! - [`artifact::ArtifactStore`]: write-once, content-addressed blobs.
//! - [`generation::GenerationCapability`]: the opaque model-inference seam.
//! - [`dispatcher::Dispatcher`]: submit / poll client over the queue.
//!
//! No internal dependencies; backends live in `melodia-db` and
//! `melodia-artifacts`.

pub mod artifact;
pub mod backoff;
pub mod dispatcher;
pub mod error;
pub mod generation;
pub mod hashing;
pub mod job;
pub mod queue;
pub mod types;
