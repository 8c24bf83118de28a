//! Generation requests and the capability seam.
//!
//! The queue keeps job parameters opaque. A generation backend that needs a
//! typed view parses them with [`GenerationRequest::from_params`], which also
//! decides the generation mode from which text fields are present.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::JobParams;

/// Guidance scale used when the request does not specify one.
pub const DEFAULT_GUIDANCE_SCALE: f64 = 15.0;

/// Track length used when the request does not specify one.
pub const DEFAULT_AUDIO_DURATION_SECS: f64 = 180.0;

/// Longest track a single job may request.
pub const MAX_AUDIO_DURATION_SECS: f64 = 240.0;

/// Upper bound on diffusion steps.
const MAX_INFER_STEPS: u32 = 200;

/// Which inputs drive the generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// A single free-form description of the whole song.
    FromDescription,
    /// Style prompt plus user-written lyrics.
    WithLyrics,
    /// Style prompt plus a description the lyrics are generated from.
    FromDescribedLyrics,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FromDescription => "from_description",
            Self::WithLyrics => "with_lyrics",
            Self::FromDescribedLyrics => "from_described_lyrics",
        }
    }
}

/// Typed view of generation job parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_described_song: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub described_lyrics: Option<String>,
    #[serde(default)]
    pub instrumental: bool,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infer_step: Option<u32>,
    #[serde(default = "default_audio_duration")]
    pub audio_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

fn default_guidance_scale() -> f64 {
    DEFAULT_GUIDANCE_SCALE
}

fn default_audio_duration() -> f64 {
    DEFAULT_AUDIO_DURATION_SECS
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl GenerationRequest {
    /// Parse and validate job parameters. Unknown keys are ignored.
    pub fn from_params(params: &JobParams) -> Result<Self, CoreError> {
        let request: Self =
            serde_json::from_value(serde_json::Value::Object(params.clone())).map_err(|e| {
                CoreError::Validation(format!("Invalid generation parameters: {e}"))
            })?;
        request.validate()?;
        Ok(request)
    }

    /// Determine the generation mode. A full description wins over the
    /// prompt-based modes; lyrics win over described lyrics. A prompt with
    /// neither is treated as a description of the whole song.
    pub fn mode(&self) -> Result<GenerationMode, CoreError> {
        if present(&self.full_described_song) {
            Ok(GenerationMode::FromDescription)
        } else if present(&self.lyrics) && present(&self.prompt) {
            Ok(GenerationMode::WithLyrics)
        } else if present(&self.described_lyrics) && present(&self.prompt) {
            Ok(GenerationMode::FromDescribedLyrics)
        } else if present(&self.prompt) {
            Ok(GenerationMode::FromDescription)
        } else {
            Err(CoreError::Validation(
                "Could not determine generation mode: provide full_described_song, \
                 prompt, prompt + lyrics, or prompt + described_lyrics"
                    .to_string(),
            ))
        }
    }

    /// The song description sent in from-description mode.
    pub fn song_description(&self) -> Option<&str> {
        [&self.full_described_song, &self.prompt]
            .into_iter()
            .find(|field| present(field))
            .and_then(|field| field.as_deref())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.audio_duration > 0.0 && self.audio_duration <= MAX_AUDIO_DURATION_SECS) {
            return Err(CoreError::Validation(format!(
                "audio_duration must be in (0, {MAX_AUDIO_DURATION_SECS}] seconds, got {}",
                self.audio_duration
            )));
        }
        if !(self.guidance_scale.is_finite() && self.guidance_scale > 0.0) {
            return Err(CoreError::Validation(format!(
                "guidance_scale must be a positive number, got {}",
                self.guidance_scale
            )));
        }
        if let Some(steps) = self.infer_step {
            if steps == 0 || steps > MAX_INFER_STEPS {
                return Err(CoreError::Validation(format!(
                    "infer_step must be in 1..={MAX_INFER_STEPS}, got {steps}"
                )));
            }
        }
        Ok(())
    }
}

/// A required artifact materialised on the worker's local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub name: String,
    pub content_hash: String,
    pub path: PathBuf,
}

/// The external model-inference routine. Opaque, potentially slow,
/// potentially failing.
///
/// Implementations should return [`CoreError::Transient`] only for failures
/// where another attempt might succeed; [`CoreError::GenerationFailure`]
/// marks the job failed.
#[async_trait]
pub trait GenerationCapability: Send + Sync {
    async fn generate(
        &self,
        params: &JobParams,
        artifacts: &[LocalArtifact],
    ) -> Result<Vec<u8>, CoreError>;
}
