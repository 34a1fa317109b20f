/*
 * Meeting Scribe - Pipeline Orchestrator
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

//! Wires Transcribe → Compile → Summarize → Embed. Each stage runs on its
//! own single-worker queue; completion callbacks emit events and only the
//! orchestrator's event loop enqueues the next stage, so the stage graph
//! is acyclic by construction. Job rows are written for every stage and a
//! failure holds the meeting in its current state and notifies the
//! requester.

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use crate::embedding::EmbeddingModelHandler;
use crate::gpu::GpuArbitrator;
use crate::job_queue::{Job, JobHeader, JobQueue, QueueStatistics};
use crate::llm::LanguageModel;
use crate::notify::Notifier;
use crate::pipeline::compile::CompileJob;
use crate::pipeline::embed::EmbedJob;
use crate::pipeline::summarize::SummarizeJob;
use crate::pipeline::transcribe::TranscribeJob;
use crate::speech::SpeechEngine;
use crate::storage::{FileStore, SqlStore, VectorStore};
use crate::types::{JobState, JobType, MeetingStatus};
use crate::util::{generate_short_id, is_valid_short_id};

const STAGE_MAX_RETRIES: u32 = 2;

/// Shared handles every stage job needs. Cheap to clone.
#[derive(Clone)]
pub struct PipelineDeps {
    pub sql: SqlStore,
    pub files: FileStore,
    pub vector: Arc<dyn VectorStore>,
    pub llm: Arc<dyn LanguageModel>,
    pub speech: Arc<dyn SpeechEngine>,
    pub embedder: EmbeddingModelHandler,
    pub gpu: GpuArbitrator,
    pub notifier: Arc<dyn Notifier>,
    pub llm_model: String,
}

#[derive(Debug)]
enum StageEvent {
    TranscriptionFinished {
        meeting_id: String,
        transcript_ids: Vec<String>,
        user_ids: Vec<String>,
    },
    CompilationFinished {
        meeting_id: String,
        compiled_transcript_id: String,
        user_ids: Vec<String>,
    },
    SummarizationFinished {
        meeting_id: String,
        compiled_transcript_id: String,
        user_ids: Vec<String>,
    },
    EmbeddingFinished {
        meeting_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineStatistics {
    pub transcribe: QueueStatistics,
    pub compile: QueueStatistics,
    pub summarize: QueueStatistics,
    pub embed: QueueStatistics,
}

pub struct Pipeline {
    deps: PipelineDeps,
    transcribe_queue: JobQueue<TranscribeJob>,
    compile_queue: JobQueue<CompileJob>,
    summarize_queue: JobQueue<SummarizeJob>,
    embed_queue: JobQueue<EmbedJob>,
    events_tx: mpsc::UnboundedSender<StageEvent>,
    events_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<StageEvent>>>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let pipeline = Arc::new(Self {
            deps,
            transcribe_queue: JobQueue::new("transcribe", STAGE_MAX_RETRIES),
            compile_queue: JobQueue::new("compile", STAGE_MAX_RETRIES),
            summarize_queue: JobQueue::new("summarize", STAGE_MAX_RETRIES),
            embed_queue: JobQueue::new("embed", STAGE_MAX_RETRIES),
            events_tx,
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
        });

        pipeline.wire_transcribe_callbacks();
        pipeline.wire_compile_callbacks();
        pipeline.wire_summarize_callbacks();
        pipeline.wire_embed_callbacks();
        pipeline
    }

    /// Start the event loop that advances meetings between stages. The
    /// loop holds only a weak handle, so dropping the pipeline stops it.
    pub async fn start(self: &Arc<Self>) {
        let mut rx = match self.events_rx.lock().await.take() {
            Some(rx) => rx,
            None => return,
        };
        let weak: Weak<Pipeline> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(pipeline) = weak.upgrade() else { break };
                if let Err(e) = pipeline.handle_event(event).await {
                    tracing::error!("Pipeline event handling failed: {:#}", e);
                }
            }
            tracing::debug!("Pipeline event loop stopped");
        });
    }

    pub async fn shutdown(&self) {
        self.transcribe_queue.stop(true).await;
        self.compile_queue.stop(true).await;
        self.summarize_queue.stop(true).await;
        self.embed_queue.stop(true).await;
    }

    pub fn statistics(&self) -> PipelineStatistics {
        PipelineStatistics {
            transcribe: self.transcribe_queue.statistics(),
            compile: self.compile_queue.statistics(),
            summarize: self.summarize_queue.statistics(),
            embed: self.embed_queue.statistics(),
        }
    }

    // -------------------------------------------------------------- //
    // Stage enqueueing
    // -------------------------------------------------------------- //

    pub async fn enqueue_transcription(
        &self,
        meeting_id: &str,
        recording_ids: Vec<String>,
        user_ids: Vec<String>,
    ) -> Result<String> {
        if !is_valid_short_id(meeting_id) {
            return Err(anyhow::anyhow!("Invalid meeting id: {}", meeting_id));
        }

        let job_id = generate_short_id();
        self.deps
            .sql
            .create_job_status(&job_id, JobType::Transcribing, meeting_id, Utc::now())
            .await?;

        let metadata = json!({
            "recording_count": recording_ids.len(),
            "user_count": user_ids.len(),
        });
        let job = TranscribeJob {
            header: JobHeader::with_metadata(job_id.clone(), metadata),
            meeting_id: meeting_id.to_string(),
            recording_ids,
            user_ids,
            produced_transcript_ids: Vec::new(),
            deps: self.deps.clone(),
        };
        self.transcribe_queue.add_job(job).await?;

        tracing::info!(
            "Queued transcription job {} for meeting {}",
            job_id,
            meeting_id
        );
        Ok(job_id)
    }

    pub async fn enqueue_compilation(
        &self,
        meeting_id: &str,
        transcript_ids: Vec<String>,
        user_ids: Vec<String>,
    ) -> Result<String> {
        let job_id = generate_short_id();
        self.deps
            .sql
            .create_job_status(&job_id, JobType::Compiling, meeting_id, Utc::now())
            .await?;

        let metadata = json!({ "transcript_count": transcript_ids.len() });
        let job = CompileJob {
            header: JobHeader::with_metadata(job_id.clone(), metadata),
            meeting_id: meeting_id.to_string(),
            transcript_ids,
            user_ids,
            compiled_transcript_id: String::new(),
            deps: self.deps.clone(),
        };
        self.compile_queue.add_job(job).await?;

        tracing::info!(
            "Queued compilation job {} for meeting {}",
            job_id,
            meeting_id
        );
        Ok(job_id)
    }

    pub async fn enqueue_summarization(
        &self,
        meeting_id: &str,
        compiled_transcript_id: &str,
        user_ids: Vec<String>,
    ) -> Result<String> {
        let job_id = generate_short_id();
        self.deps
            .sql
            .create_job_status(&job_id, JobType::Summarizing, meeting_id, Utc::now())
            .await?;

        let job = SummarizeJob {
            header: JobHeader::new(job_id.clone()),
            meeting_id: meeting_id.to_string(),
            compiled_transcript_id: compiled_transcript_id.to_string(),
            user_ids,
            deps: self.deps.clone(),
        };
        self.summarize_queue.add_job(job).await?;

        tracing::info!(
            "Queued summarization job {} for meeting {}",
            job_id,
            meeting_id
        );
        Ok(job_id)
    }

    pub async fn enqueue_embedding(
        &self,
        meeting_id: &str,
        guild_id: &str,
        compiled_transcript_id: &str,
        user_ids: Vec<String>,
    ) -> Result<String> {
        let job_id = generate_short_id();
        self.deps
            .sql
            .create_job_status(&job_id, JobType::TextEmbedding, meeting_id, Utc::now())
            .await?;

        let job = EmbedJob {
            header: JobHeader::new(job_id.clone()),
            meeting_id: meeting_id.to_string(),
            guild_id: guild_id.to_string(),
            compiled_transcript_id: compiled_transcript_id.to_string(),
            user_ids,
            deps: self.deps.clone(),
        };
        self.embed_queue.add_job(job).await?;

        tracing::info!("Queued embedding job {} for meeting {}", job_id, meeting_id);
        Ok(job_id)
    }

    // -------------------------------------------------------------- //
    // Event handling
    // -------------------------------------------------------------- //

    async fn handle_event(&self, event: StageEvent) -> Result<()> {
        match event {
            StageEvent::TranscriptionFinished {
                meeting_id,
                transcript_ids,
                user_ids,
            } => {
                self.enqueue_compilation(&meeting_id, transcript_ids, user_ids)
                    .await?;
            }
            StageEvent::CompilationFinished {
                meeting_id,
                compiled_transcript_id,
                user_ids,
            } => {
                self.enqueue_summarization(&meeting_id, &compiled_transcript_id, user_ids)
                    .await?;
            }
            StageEvent::SummarizationFinished {
                meeting_id,
                compiled_transcript_id,
                user_ids,
            } => {
                let meeting = self
                    .deps
                    .sql
                    .get_meeting(&meeting_id)
                    .await?
                    .with_context(|| format!("Meeting {} not found", meeting_id))?;
                self.enqueue_embedding(
                    &meeting_id,
                    &meeting.guild_id,
                    &compiled_transcript_id,
                    user_ids,
                )
                .await?;
            }
            StageEvent::EmbeddingFinished { meeting_id } => {
                self.deps
                    .sql
                    .update_meeting_status(&meeting_id, MeetingStatus::Completed)
                    .await?;
                if let Some(meeting) = self.deps.sql.get_meeting(&meeting_id).await? {
                    if let Err(e) = self.deps.notifier.meeting_complete(&meeting).await {
                        tracing::warn!(
                            "Failed to send completion notifications for meeting {}: {:#}",
                            meeting_id,
                            e
                        );
                    }
                }
                tracing::info!("Meeting {} fully processed", meeting_id);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------- //
    // Callback wiring
    // -------------------------------------------------------------- //

    /// Persist the in-progress transition for any stage job.
    fn on_started_callback<J: Job>(
        deps: &PipelineDeps,
    ) -> Arc<dyn for<'a> Fn(&'a J) -> futures::future::BoxFuture<'a, Result<()>> + Send + Sync>
    {
        let sql = deps.sql.clone();
        Arc::new(move |job: &J| {
            let sql = sql.clone();
            let job_id = job.header().id.clone();
            let started_at = job.header().started_at;
            Box::pin(async move {
                sql.update_job_status(&job_id, JobState::InProgress, started_at, None, None)
                    .await
            })
        })
    }

    /// Persist the failure and notify the requester. The meeting stays in
    /// whatever state it had reached.
    fn on_failed_callback<J: Job>(
        deps: &PipelineDeps,
        stage: JobType,
        meeting_id_of: fn(&J) -> &str,
    ) -> Arc<dyn for<'a> Fn(&'a J) -> futures::future::BoxFuture<'a, Result<()>> + Send + Sync>
    {
        let sql = deps.sql.clone();
        let notifier = deps.notifier.clone();
        Arc::new(move |job: &J| {
            let sql = sql.clone();
            let notifier = notifier.clone();
            let job_id = job.header().id.clone();
            let meeting_id = meeting_id_of(job).to_string();
            let header = job.header();
            let started_at = header.started_at;
            let finished_at = header.finished_at;
            let error = header.error_message.clone().unwrap_or_default();
            Box::pin(async move {
                sql.update_job_status(
                    &job_id,
                    JobState::Failed,
                    started_at,
                    finished_at,
                    Some(error.as_str()),
                )
                .await?;
                if let Some(meeting) = sql.get_meeting(&meeting_id).await? {
                    notifier.stage_failed(&meeting, stage, &error).await?;
                }
                Ok(())
            })
        })
    }

    async fn complete_job_row(sql: &SqlStore, header: &JobHeader) -> Result<()> {
        sql.update_job_status(
            &header.id,
            JobState::Completed,
            header.started_at,
            header.finished_at,
            None,
        )
        .await
    }

    fn wire_transcribe_callbacks(self: &Arc<Self>) {
        let deps = self.deps.clone();

        // Entering transcription also advances the meeting state.
        let sql = deps.sql.clone();
        self.transcribe_queue
            .set_on_started(Arc::new(move |job: &TranscribeJob| {
                let sql = sql.clone();
                let job_id = job.header.id.clone();
                let started_at = job.header.started_at;
                let meeting_id = job.meeting_id.clone();
                Box::pin(async move {
                    sql.update_job_status(&job_id, JobState::InProgress, started_at, None, None)
                        .await?;
                    sql.update_meeting_status(&meeting_id, MeetingStatus::Transcribing)
                        .await
                })
            }));

        self.transcribe_queue.set_on_failed(Self::on_failed_callback(
            &deps,
            JobType::Transcribing,
            |job: &TranscribeJob| &job.meeting_id,
        ));

        let sql = deps.sql.clone();
        let events = self.events_tx.clone();
        self.transcribe_queue
            .set_on_complete(Arc::new(move |job: &TranscribeJob| {
                let sql = sql.clone();
                let events = events.clone();
                let event = StageEvent::TranscriptionFinished {
                    meeting_id: job.meeting_id.clone(),
                    transcript_ids: job.produced_transcript_ids.clone(),
                    user_ids: job.user_ids.clone(),
                };
                let header = job.header.clone();
                Box::pin(async move {
                    Self::complete_job_row(&sql, &header).await?;
                    let _ = events.send(event);
                    Ok(())
                })
            }));
    }

    fn wire_compile_callbacks(self: &Arc<Self>) {
        let deps = self.deps.clone();
        self.compile_queue
            .set_on_started(Self::on_started_callback(&deps));
        self.compile_queue.set_on_failed(Self::on_failed_callback(
            &deps,
            JobType::Compiling,
            |job: &CompileJob| &job.meeting_id,
        ));

        let sql = deps.sql.clone();
        let events = self.events_tx.clone();
        self.compile_queue
            .set_on_complete(Arc::new(move |job: &CompileJob| {
                let sql = sql.clone();
                let events = events.clone();
                let event = StageEvent::CompilationFinished {
                    meeting_id: job.meeting_id.clone(),
                    compiled_transcript_id: job.compiled_transcript_id.clone(),
                    user_ids: job.user_ids.clone(),
                };
                let header = job.header.clone();
                Box::pin(async move {
                    Self::complete_job_row(&sql, &header).await?;
                    let _ = events.send(event);
                    Ok(())
                })
            }));
    }

    fn wire_summarize_callbacks(self: &Arc<Self>) {
        let deps = self.deps.clone();
        self.summarize_queue
            .set_on_started(Self::on_started_callback(&deps));
        self.summarize_queue.set_on_failed(Self::on_failed_callback(
            &deps,
            JobType::Summarizing,
            |job: &SummarizeJob| &job.meeting_id,
        ));

        let sql = deps.sql.clone();
        let events = self.events_tx.clone();
        self.summarize_queue
            .set_on_complete(Arc::new(move |job: &SummarizeJob| {
                let sql = sql.clone();
                let events = events.clone();
                let event = StageEvent::SummarizationFinished {
                    meeting_id: job.meeting_id.clone(),
                    compiled_transcript_id: job.compiled_transcript_id.clone(),
                    user_ids: job.user_ids.clone(),
                };
                let header = job.header.clone();
                Box::pin(async move {
                    Self::complete_job_row(&sql, &header).await?;
                    let _ = events.send(event);
                    Ok(())
                })
            }));
    }

    fn wire_embed_callbacks(self: &Arc<Self>) {
        let deps = self.deps.clone();
        self.embed_queue
            .set_on_started(Self::on_started_callback(&deps));
        self.embed_queue.set_on_failed(Self::on_failed_callback(
            &deps,
            JobType::TextEmbedding,
            |job: &EmbedJob| &job.meeting_id,
        ));

        let sql = deps.sql.clone();
        let events = self.events_tx.clone();
        self.embed_queue
            .set_on_complete(Arc::new(move |job: &EmbedJob| {
                let sql = sql.clone();
                let events = events.clone();
                let event = StageEvent::EmbeddingFinished {
                    meeting_id: job.meeting_id.clone(),
                };
                let header = job.header.clone();
                Box::pin(async move {
                    Self::complete_job_row(&sql, &header).await?;
                    let _ = events.send(event);
                    Ok(())
                })
            }));
    }
}
