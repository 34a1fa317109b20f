/*
 * Meeting Scribe - LLM Client
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

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub keep_alive_secs: Option<u64>,
    pub temperature: Option<f32>,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            max_retries: 3,
            keep_alive_secs: Some(10),
            temperature: None,
        }
    }
}

/// Reply from the model endpoint, durations in nanoseconds as the engine
/// reports them.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub content: String,
    pub eval_count: Option<i64>,
    pub prompt_eval_count: Option<i64>,
    pub total_duration: Option<u64>,
}

/// The inference endpoint as the pipeline consumes it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn query(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &LlmOptions,
    ) -> Result<LlmReply>;
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
    total_duration: Option<u64>,
    prompt_eval_count: Option<i64>,
    eval_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    content: String,
}

/// Ollama chat client with timeout and exponential-backoff retries.
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn chat_once(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &LlmOptions,
    ) -> Result<LlmReply> {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(keep_alive) = options.keep_alive_secs {
            body["keep_alive"] = json!(keep_alive);
        }
        if let Some(temperature) = options.temperature {
            body["options"] = json!({ "temperature": temperature });
        }

        let request = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send();

        let response = timeout(Duration::from_millis(options.timeout_ms), request)
            .await
            .context("LLM request timed out")?
            .context("Failed to reach LLM endpoint")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "LLM endpoint returned status {}",
                response.status()
            ));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        Ok(LlmReply {
            content: parsed.message.content,
            eval_count: parsed.eval_count,
            prompt_eval_count: parsed.prompt_eval_count,
            total_duration: parsed.total_duration,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn query(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &LlmOptions,
    ) -> Result<LlmReply> {
        let mut last_error = None;

        for attempt in 0..=options.max_retries {
            match self.chat_once(model, messages, options).await {
                Ok(reply) => {
                    tracing::debug!(
                        "LLM query completed: model={}, tokens={:?}",
                        model,
                        reply.eval_count
                    );
                    return Ok(reply);
                }
                Err(e) => {
                    tracing::warn!(
                        "LLM query failed (attempt {}/{}): {:#}",
                        attempt + 1,
                        options.max_retries + 1,
                        e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < options.max_retries {
                let backoff = Duration::from_millis(1000u64 << attempt.min(6));
                sleep(backoff).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("All LLM retry attempts failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_parses_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"message": {"role": "assistant", "content": "A summary."},
                    "total_duration": 123456, "prompt_eval_count": 10, "eval_count": 42}"#,
            )
            .create_async()
            .await;

        let client = OllamaClient::new(server.url());
        let reply = client
            .query(
                "test-model",
                &[ChatMessage::user("Summarize this.")],
                &LlmOptions {
                    max_retries: 0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.content, "A summary.");
        assert_eq!(reply.eval_count, Some(42));
        assert_eq!(reply.prompt_eval_count, Some(10));
        assert_eq!(reply.total_duration, Some(123456));
    }

    #[tokio::test]
    async fn test_query_retries_then_fails_after_exhausted_attempts() {
        let mut server = mockito::Server::new_async().await;
        // One initial attempt plus one retry, both served the same error.
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let client = OllamaClient::new(server.url());
        let result = client
            .query(
                "test-model",
                &[ChatMessage::user("hi")],
                &LlmOptions {
                    max_retries: 1,
                    ..Default::default()
                },
            )
            .await;
        mock.assert_async().await;
        assert!(result.is_err());
    }
}
