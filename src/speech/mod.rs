//! Speech synthesis of the finished script.
//!
//! One synchronous request/response against the TTS endpoint; success
//! requires both an HTTP success status and a non-empty body, and either
//! failure short-circuits with an explicit error so no audio is surfaced.

use crate::error::{Error, Result};
use crate::state::AudioAsset;
use bytes::Bytes;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

/// Client for the speech synthesis API.
pub struct NarrationSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    voice: String,
}

impl NarrationSynthesizer {
    pub fn new(
        api_key: &str,
        api_base: &str,
        model: String,
        voice: String,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Synthesis(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/audio/speech", api_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model,
            voice,
        })
    }

    /// Synthesize `script` into a complete MP3 asset.
    pub async fn synthesize(&self, script: &str) -> Result<AudioAsset> {
        if script.is_empty() {
            return Err(Error::precondition("Script is empty"));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                model: &self.model,
                input: script,
                voice: &self.voice,
            })
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Synthesis(format!("status {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        if body.is_empty() {
            return Err(Error::Synthesis("empty audio response".to_string()));
        }

        // Stage the bytes through a scoped temp file (RAII removal) and
        // serve playback and download from the read-back copy.
        let staged = stage_audio(&body)?;

        tracing::info!(bytes = staged.len(), voice = %self.voice, "Synthesized narration");
        Ok(AudioAsset::mp3(staged))
    }
}

fn stage_audio(body: &[u8]) -> Result<Bytes> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(body)?;
    file.flush()?;
    let bytes = std::fs::read(file.path())?;
    Ok(Bytes::from(bytes))
}
