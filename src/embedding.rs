/*
 * Meeting Scribe - Embedding Model Handler
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

//! Text embedding generation behind a scoped-acquisition handler: the
//! model is loaded for the duration of one encode run and offloaded on
//! every exit path, including failures, so GPU memory is never left
//! occupied by a finished job.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Batch size used when encoding partitioned texts.
pub const EMBEDDING_BATCH_SIZE: usize = 32;

/// The embedding model as a scoped GPU-resident resource.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Bring the model into memory.
    async fn load(&self) -> Result<()>;

    /// Encode one batch of texts into raw (unnormalized) vectors.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Drop the model from memory.
    async fn offload(&self) -> Result<()>;
}

/// Client for an HTTP embedding endpoint (Ollama-style `/api/embed`).
/// Loading is a warmup request; offloading asks the server to release the
/// model immediately via a zero keep-alive.
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingClient {
    async fn load(&self) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({ "model": self.model, "input": ["warmup"] }))
            .send()
            .await
            .context("Failed to reach embedding endpoint for model load")?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Embedding model load returned status {}",
                response.status()
            ));
        }
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .context("Failed to reach embedding endpoint")?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Embedding endpoint returned status {}",
                response.status()
            ));
        }
        let parsed: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        if parsed.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                parsed.embeddings.len()
            ));
        }
        Ok(parsed.embeddings)
    }

    async fn offload(&self) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({ "model": self.model, "input": [], "keep_alive": 0 }))
            .send()
            .await
            .context("Failed to reach embedding endpoint for offload")?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Embedding model offload returned status {}",
                response.status()
            ));
        }
        Ok(())
    }
}

/// Wraps an [`EmbeddingBackend`] with load/offload scoping, batching and
/// L2 normalization.
#[derive(Clone)]
pub struct EmbeddingModelHandler {
    backend: Arc<dyn EmbeddingBackend>,
}

impl EmbeddingModelHandler {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self { backend }
    }

    /// Load the model, encode all texts in batches, and offload. The
    /// offload runs whether or not encoding succeeded.
    pub async fn encode_scoped(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.backend
            .load()
            .await
            .context("Failed to load embedding model")?;

        let result = self.encode_batched(texts).await;

        if let Err(e) = self.backend.offload().await {
            tracing::warn!("Failed to offload embedding model: {:#}", e);
        }

        result
    }

    async fn encode_batched(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            let vectors = self.backend.embed_batch(batch).await?;
            embeddings.extend(vectors.into_iter().map(normalize));
        }
        Ok(embeddings)
    }
}

fn normalize(vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector;
    }
    vector.into_iter().map(|v| v / norm).collect()
}
