/*
 * Meeting Scribe - Speech Engine Client
 * Copyright (c) 2025 Meeting Scribe Contributors
 *
 * This work is licensed under the Creative Commons Attribution-NonCommercial 4.0 International License.
 * To view a copy of this license, visit http://creativecommons.org/licenses/by-nc/4.0/
 *
 * You are free to share and adapt this work for non-commercial purposes with attribution.
 * Commercial use is prohibited without explicit written permission.
 *
 * For commercial licensing inquiries, please contact the project maintainers.
 */

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::types::SpeechTranscript;

/// Speech-to-text engine as the transcription stage consumes it: one audio
/// file in, a word-timestamped transcript out.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn transcribe(&self, audio_file: &Path) -> Result<SpeechTranscript>;
}

/// Client for a whisper inference server speaking the OpenAI-style
/// transcription API with `verbose_json` output.
pub struct WhisperClient {
    client: Client,
    base_url: String,
    language: String,
}

impl WhisperClient {
    pub fn new(base_url: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl SpeechEngine for WhisperClient {
    async fn transcribe(&self, audio_file: &Path) -> Result<SpeechTranscript> {
        let file_data = tokio::fs::read(audio_file)
            .await
            .with_context(|| format!("Failed to read audio file {}", audio_file.display()))?;

        let file_name = audio_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(file_data)
                    .file_name(file_name)
                    .mime_str("audio/mpeg")?,
            )
            .text("response_format", "verbose_json")
            .text("word_timestamps", "true")
            .text("temperature", "0.0")
            .text("temperature_inc", "0.2")
            .text("language", self.language.clone());

        let response = self
            .client
            .post(format!("{}/inference", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("Failed to reach speech engine")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "Speech engine returned status {}: {}",
                status,
                error_text
            ));
        }

        response
            .json::<SpeechTranscript>()
            .await
            .context("Failed to parse speech engine response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transcribe_parses_verbose_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/inference")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "text": "hello there",
                    "segments": [
                        {"start": 0.0, "end": 1.2, "text": "hello there",
                         "words": [
                            {"start": 0.0, "end": 0.5, "word": "hello"},
                            {"start": 0.6, "end": 1.2, "word": "there"}
                         ]}
                    ]
                }"#,
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("clip.mp3");
        tokio::fs::write(&audio, b"fake-mp3").await.unwrap();

        let client = WhisperClient::new(server.url(), "en");
        let transcript = client.transcribe(&audio).await.unwrap();

        mock.assert_async().await;
        assert_eq!(transcript.text, "hello there");
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.segments[0].words.len(), 2);
    }

    #[tokio::test]
    async fn test_transcribe_surfaces_engine_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/inference")
            .with_status(500)
            .with_body("engine exploded")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("clip.mp3");
        tokio::fs::write(&audio, b"fake-mp3").await.unwrap();

        let client = WhisperClient::new(server.url(), "en");
        assert!(client.transcribe(&audio).await.is_err());
    }
}
