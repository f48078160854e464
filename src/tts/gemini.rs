//! Gemini speech generation (`generateContent` with an audio modality).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::SpeechSynthesizer;
use crate::config::TtsConfig;
use crate::error::{AdaError, Result};
use crate::llm::openai::extract_error_message;

/// Speech synthesis through a Gemini TTS model and prebuilt voice.
pub struct GeminiTts {
    client: reqwest::Client,
    base_url: String,
    model: String,
    voice: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiTts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTts")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .finish()
    }
}

impl GeminiTts {
    /// Create a synthesizer from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdaError::Config`] when no API key is configured.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AdaError::Config("TTS requires an API key (GOOGLE_API_KEY)".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AdaError::Tts(format!("failed to build HTTP client: {e}")))?;
        info!(model = %config.model, voice = %config.voice, "TTS configured");
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            api_key,
        })
    }
}

/// Request body for one synthesis call.
fn build_speech_request(text: &str, voice: &str) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": text }] }],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": voice }
                }
            }
        }
    })
}

/// Pull the decoded audio out of a response body.
fn extract_audio(body: &Value) -> Result<Vec<u8>> {
    let data = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .and_then(|parts| {
            parts
                .iter()
                .find_map(|p| p.pointer("/inlineData/data").and_then(Value::as_str))
        })
        .ok_or_else(|| AdaError::Tts("response contained no audio".into()))?;
    let pcm = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| AdaError::Tts(format!("audio payload is not base64: {e}")))?;
    if pcm.is_empty() {
        return Err(AdaError::Tts("response contained empty audio".into()));
    }
    Ok(pcm)
}

#[async_trait]
impl SpeechSynthesizer for GeminiTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let started = Instant::now();
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_speech_request(text, &self.voice))
            .send()
            .await
            .map_err(|e| AdaError::Tts(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdaError::Tts(format!(
                "HTTP {}: {}",
                status.as_u16(),
                extract_error_message(&body)
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AdaError::Tts(format!("malformed response: {e}")))?;
        let pcm = extract_audio(&body)?;
        debug!(
            chars = text.len(),
            bytes = pcm.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "speech synthesized"
        );
        Ok(pcm)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn request_asks_for_audio_in_voice() {
        let body = build_speech_request("Hello, Sir.", "echo");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Hello, Sir.");
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "echo"
        );
    }

    #[test]
    fn extracts_inline_audio() {
        let body = json!({"candidates": [{"content": {"parts": [
            {"inlineData": {"mimeType": "audio/L16;codec=pcm;rate=24000", "data": "AAEC"}}
        ]}}]});
        assert_eq!(extract_audio(&body).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn missing_or_bad_audio_is_an_error() {
        assert!(matches!(
            extract_audio(&json!({"candidates": []})),
            Err(AdaError::Tts(_))
        ));
        let body = json!({"candidates": [{"content": {"parts": [{"inlineData": {"data": "!!"}}]}}]});
        assert!(matches!(extract_audio(&body), Err(AdaError::Tts(_))));
    }

    #[test]
    fn new_requires_key() {
        let err = GeminiTts::new(&TtsConfig::default()).unwrap_err();
        assert!(matches!(err, AdaError::Config(_)));
    }
}
