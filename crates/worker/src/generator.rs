//! HTTP generation backend.
//!
//! Each generation mode is served by its own endpoint. The request body is
//! the normalized [`GenerationRequest`] carrying only the text fields the
//! mode uses; the response body is the rendered audio.

use std::time::Duration;

use async_trait::async_trait;
use melodia_core::error::CoreError;
use melodia_core::generation::{
    GenerationCapability, GenerationMode, GenerationRequest, LocalArtifact,
};
use melodia_core::types::JobParams;

/// Longest error body kept in a failure summary.
const MAX_ERROR_BODY_LEN: usize = 500;

/// Generation endpoints and credentials, loaded from the environment.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub from_description_url: String,
    pub with_lyrics_url: String,
    pub from_described_lyrics_url: String,
    pub modal_key: Option<String>,
    pub modal_secret: Option<String>,
    /// Upper bound on one generation request (default: 600 s).
    pub timeout: Duration,
}

impl GeneratorConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                          | Default      |
    /// |----------------------------------|--------------|
    /// | `GENERATE_FROM_DESCRIPTION`      | required     |
    /// | `GENERATE_WITH_LYRICS`           | required     |
    /// | `GENERATE_FROM_DESCRIBED_LYRICS` | required     |
    /// | `MODAL_KEY`                      | unset        |
    /// | `MODAL_SECRET`                   | unset        |
    /// | `GENERATOR_TIMEOUT_SECS`         | `600`        |
    pub fn from_env() -> Result<Self, CoreError> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| CoreError::Validation(format!("{key} must be set")))
        };

        let timeout_secs: u64 = match std::env::var("GENERATOR_TIMEOUT_SECS") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                CoreError::Validation(format!("GENERATOR_TIMEOUT_SECS has an invalid value '{raw}'"))
            })?,
            Err(_) => 600,
        };

        Ok(Self {
            from_description_url: required("GENERATE_FROM_DESCRIPTION")?,
            with_lyrics_url: required("GENERATE_WITH_LYRICS")?,
            from_described_lyrics_url: required("GENERATE_FROM_DESCRIBED_LYRICS")?,
            modal_key: std::env::var("MODAL_KEY").ok(),
            modal_secret: std::env::var("MODAL_SECRET").ok(),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn endpoint(&self, mode: GenerationMode) -> &str {
        match mode {
            GenerationMode::FromDescription => &self.from_description_url,
            GenerationMode::WithLyrics => &self.with_lyrics_url,
            GenerationMode::FromDescribedLyrics => &self.from_described_lyrics_url,
        }
    }
}

pub struct HttpGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

/// Keep only the text fields the mode consumes.
pub fn mode_payload(mut request: GenerationRequest, mode: GenerationMode) -> GenerationRequest {
    match mode {
        GenerationMode::FromDescription => {
            request.full_described_song = request.song_description().map(str::to_string);
            request.prompt = None;
            request.lyrics = None;
            request.described_lyrics = None;
        }
        GenerationMode::WithLyrics => {
            request.full_described_song = None;
            request.described_lyrics = None;
        }
        GenerationMode::FromDescribedLyrics => {
            request.full_described_song = None;
            request.lyrics = None;
        }
    }
    request
}

fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl GenerationCapability for HttpGenerator {
    async fn generate(
        &self,
        params: &JobParams,
        artifacts: &[LocalArtifact],
    ) -> Result<Vec<u8>, CoreError> {
        let request = GenerationRequest::from_params(params)?;
        let mode = request.mode()?;
        let endpoint = self.config.endpoint(mode);
        tracing::debug!(
            mode = mode.as_str(),
            endpoint,
            artifacts = artifacts.len(),
            "Calling generation endpoint",
        );

        let mut builder = self
            .client
            .post(endpoint)
            .json(&mode_payload(request, mode));
        if let Some(key) = &self.config.modal_key {
            builder = builder.header("Modal-Key", key);
        }
        if let Some(secret) = &self.config.modal_secret {
            builder = builder.header("Modal-Secret", secret);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                CoreError::Transient(format!("Generation endpoint unreachable: {e}"))
            } else {
                CoreError::GenerationFailure(format!("Generation request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::GenerationFailure(format!(
                "Generation endpoint returned {status}: {}",
                truncate_body(&body)
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::Transient(format!("Reading generated audio failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}
