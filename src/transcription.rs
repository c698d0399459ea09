//! Audio transcription via Whisper-compatible APIs (Groq or OpenAI).

use crate::config::TranscriptionConfig;
use crate::error::{LlmError, Result};
use serde_json::Value;
use std::time::Duration;

const GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Multi-provider transcription client.
#[derive(Debug, Clone)]
pub struct TranscriptionService {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl TranscriptionService {
    /// Build the service when an API key is configured; None otherwise.
    pub fn from_config(config: &TranscriptionConfig) -> Option<Self> {
        if config.api_key.is_empty() {
            return None;
        }

        let endpoint = config
            .base_url
            .clone()
            .unwrap_or_else(|| match config.provider.as_str() {
                "openai" => OPENAI_ENDPOINT.to_string(),
                _ => GROQ_ENDPOINT.to_string(),
            });

        Some(Self {
            http: reqwest::Client::new(),
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout),
        })
    }

    /// Transcribe audio bytes; returns the recognized text.
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .map_err(|error| LlmError::Other(error.into()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| LlmError::ProviderRequest(error.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::ProviderRequest(format!(
                "transcription returned HTTP {}",
                response.status().as_u16()
            ))
            .into());
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| LlmError::ProviderRequest(error.to_string()))?;
        Ok(payload
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}
