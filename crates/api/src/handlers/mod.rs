pub mod artifacts;
pub mod jobs;
