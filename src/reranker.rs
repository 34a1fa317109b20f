/*
 * Meeting Scribe - Cross-Encoder Reranker
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

//! On-demand reranking of retrieved candidates. The cross-encoder loads
//! lazily on first use, scores under the `vector_reranker` GPU class, and
//! degrades to the input order on any failure so a non-empty candidate
//! list never reranks to nothing.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::gpu::{GpuArbitrator, GpuJobClass};

/// Cross-encoder scoring backend: one score per (query, candidate) pair.
#[async_trait]
pub trait RerankBackend: Send + Sync {
    async fn load(&self) -> Result<()>;
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

/// Client for an HTTP rerank endpoint.
pub struct HttpRerankClient {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpRerankClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

#[async_trait]
impl RerankBackend for HttpRerankClient {
    async fn load(&self) -> Result<()> {
        // The serving side loads on first scoring call; nothing to do here
        // beyond a reachability check.
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("Rerank endpoint unreachable")?;
        Ok(())
    }

    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&json!({
                "model": self.model,
                "query": query,
                "documents": candidates,
            }))
            .send()
            .await
            .context("Failed to reach rerank endpoint")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Rerank endpoint returned status {}",
                response.status()
            ));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .context("Failed to parse rerank response")?;

        let mut scores = vec![0.0f32; candidates.len()];
        for result in parsed.results {
            if result.index < scores.len() {
                scores[result.index] = result.relevance_score;
            }
        }
        Ok(scores)
    }
}

pub struct Reranker {
    backend: Arc<dyn RerankBackend>,
    gpu: GpuArbitrator,
    loaded: Mutex<bool>,
}

impl Reranker {
    pub fn new(backend: Arc<dyn RerankBackend>, gpu: GpuArbitrator) -> Self {
        Self {
            backend,
            gpu,
            loaded: Mutex::new(false),
        }
    }

    /// Score candidates against the query and return the top K by
    /// descending relevance. On failure, returns the first K candidates
    /// in their input order instead.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<String>,
        top_k: usize,
    ) -> Vec<String> {
        if candidates.is_empty() {
            return Vec::new();
        }

        match self.try_rerank(query, &candidates, top_k).await {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::error!("Reranking failed, returning input order: {:#}", e);
                candidates.into_iter().take(top_k).collect()
            }
        }
    }

    async fn try_rerank(
        &self,
        query: &str,
        candidates: &[String],
        top_k: usize,
    ) -> Result<Vec<String>> {
        {
            let mut loaded = self.loaded.lock().await;
            if !*loaded {
                self.backend.load().await?;
                *loaded = true;
                tracing::info!("Reranker model loaded");
            }
        }

        let scores = {
            let _permit = self
                .gpu
                .acquire(GpuJobClass::VectorReranker, "rerank")
                .await?;
            self.backend.score(query, candidates).await?
        };

        if scores.len() != candidates.len() {
            return Err(anyhow::anyhow!(
                "Score count mismatch: {} candidates, {} scores",
                candidates.len(),
                scores.len()
            ));
        }

        let mut ranked: Vec<(&String, f32)> = candidates.iter().zip(scores).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ranked
            .into_iter()
            .take(top_k)
            .map(|(candidate, _)| candidate.clone())
            .collect())
    }
}
