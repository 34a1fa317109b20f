/*
 * Meeting Scribe - Rust Edition
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

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::recorder::manager::SessionManagerConfig;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub base_url: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct RerankConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub llm: LlmConfig,
    pub speech: SpeechConfig,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub session: SessionManagerConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let data_dir = env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".meeting-scribe")
                .join("data")
        });

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/meeting_scribe.db", data_dir.display()));

        let llm = LlmConfig {
            base_url: env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "gpt-oss:20b".to_string()),
        };

        let speech = SpeechConfig {
            base_url: env::var("WHISPER_HOST")
                .unwrap_or_else(|_| "http://localhost:8178".to_string()),
            language: env::var("WHISPER_LANGUAGE").unwrap_or_else(|_| "en".to_string()),
        };

        let embedding = EmbeddingConfig {
            base_url: env::var("EMBEDDING_HOST").unwrap_or_else(|_| llm.base_url.clone()),
            model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "bge-large-en-v1.5".to_string()),
        };

        let rerank = RerankConfig {
            base_url: env::var("RERANK_HOST").unwrap_or_else(|_| embedding.base_url.clone()),
            model: env::var("RERANK_MODEL")
                .unwrap_or_else(|_| "bge-reranker-v2-m3".to_string()),
        };

        let flush_interval_seconds = env::var("FLUSH_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .unwrap_or(10);

        let transcode_timeout_seconds = env::var("TRANSCODE_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .unwrap_or(300);

        let cleanup_interval_seconds = env::var("CLEANUP_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<u64>()
            .unwrap_or(3600);

        let temp_recording_ttl_hours = env::var("TEMP_RECORDING_TTL_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse::<u64>()
            .unwrap_or(24);

        let session = SessionManagerConfig {
            flush_interval: Duration::from_secs(flush_interval_seconds),
            transcode_timeout: Duration::from_secs(transcode_timeout_seconds),
            cleanup_interval: Duration::from_secs(cleanup_interval_seconds),
            temp_recording_ttl: Duration::from_secs(temp_recording_ttl_hours * 3600),
        };

        Ok(Config {
            database_url,
            data_dir,
            llm,
            speech,
            embedding,
            rerank,
            session,
        })
    }
}
