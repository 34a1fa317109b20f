/*
 * Meeting Scribe - Service Wiring
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

//! One top-level value owning every component handle. No singletons;
//! components receive what they need by clone of these handles, and the
//! stage graph is wired here and nowhere else.

use std::sync::Arc;

use anyhow::Result;

use crate::chat::ChatService;
use crate::config::Config;
use crate::embedding::{EmbeddingModelHandler, HttpEmbeddingClient};
use crate::gpu::GpuArbitrator;
use crate::llm::OllamaClient;
use crate::notify::{LogNotifier, Notifier};
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::recorder::manager::StopOutcome;
use crate::recorder::SessionManager;
use crate::reranker::{HttpRerankClient, Reranker};
use crate::speech::WhisperClient;
use crate::storage::{FileStore, InMemoryVectorStore, SqlStore, VectorStore};
use crate::transcode::TranscodeService;

pub struct Services {
    pub config: Config,
    pub sql: SqlStore,
    pub files: FileStore,
    pub vector: Arc<dyn VectorStore>,
    pub gpu: GpuArbitrator,
    pub notifier: Arc<dyn Notifier>,
    pub transcode: Arc<TranscodeService>,
    pub sessions: Arc<SessionManager>,
    pub pipeline: Arc<Pipeline>,
    pub chat: Arc<ChatService>,
    pub reranker: Arc<Reranker>,
}

impl Services {
    pub async fn build(config: Config) -> Result<Self> {
        let sql = SqlStore::connect(&config.database_url).await?;
        let files = FileStore::new(&config.data_dir)?;
        let vector: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let gpu = GpuArbitrator::new();
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

        let llm = Arc::new(OllamaClient::new(config.llm.base_url.clone()));
        let speech = Arc::new(WhisperClient::new(
            config.speech.base_url.clone(),
            config.speech.language.clone(),
        ));
        let embedder = EmbeddingModelHandler::new(Arc::new(HttpEmbeddingClient::new(
            config.embedding.base_url.clone(),
            config.embedding.model.clone(),
        )));
        let reranker = Arc::new(Reranker::new(
            Arc::new(HttpRerankClient::new(
                config.rerank.base_url.clone(),
                config.rerank.model.clone(),
            )),
            gpu.clone(),
        ));

        let transcode = TranscodeService::new(sql.clone());

        let pipeline = Pipeline::new(PipelineDeps {
            sql: sql.clone(),
            files: files.clone(),
            vector: vector.clone(),
            llm: llm.clone(),
            speech,
            embedder,
            gpu: gpu.clone(),
            notifier: notifier.clone(),
            llm_model: config.llm.model.clone(),
        });
        pipeline.start().await;

        let sessions = SessionManager::new(
            config.session.clone(),
            sql.clone(),
            files.clone(),
            transcode.clone(),
        );

        // A stopped session flows straight into the transcription stage.
        let handoff_pipeline = pipeline.clone();
        sessions.set_stop_handoff(Arc::new(move |outcome: StopOutcome| {
            let pipeline = handoff_pipeline.clone();
            Box::pin(async move {
                if outcome.recording_ids.is_empty() {
                    tracing::warn!(
                        "Meeting {} stopped with no recordings; skipping pipeline",
                        outcome.meeting_id
                    );
                    return;
                }
                if let Err(e) = pipeline
                    .enqueue_transcription(
                        &outcome.meeting_id,
                        outcome.recording_ids,
                        outcome.user_ids,
                    )
                    .await
                {
                    tracing::error!(
                        "Failed to queue transcription for meeting {}: {:#}",
                        outcome.meeting_id,
                        e
                    );
                }
            })
        }));
        sessions.spawn_cleanup_task();

        let chat = ChatService::new(
            sql.clone(),
            files.clone(),
            llm,
            gpu.clone(),
            config.llm.model.clone(),
        );

        Ok(Self {
            config,
            sql,
            files,
            vector,
            gpu,
            notifier,
            transcode,
            sessions,
            pipeline,
            chat,
            reranker,
        })
    }

    pub async fn shutdown(&self) {
        tracing::info!("Shutting down services");
        self.sessions.shutdown().await;
        self.transcode.shutdown().await;
        self.pipeline.shutdown().await;
        self.chat.shutdown().await;
    }
}
