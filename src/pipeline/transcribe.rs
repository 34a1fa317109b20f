/*
 * Meeting Scribe - Transcription Stage
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

//! Stage 1: run every persistent recording of a meeting through the
//! speech engine under the GPU lock and persist per-user transcript
//! documents. Individual recording failures are skipped; the stage only
//! fails if nothing at all was transcribed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::gpu::GpuJobClass;
use crate::job_queue::{Job, JobError, JobHeader};
use crate::pipeline::orchestrator::PipelineDeps;
use crate::storage::FileStore;
use crate::types::{UserTranscriptDocument, UserTranscriptRow};
use crate::util::{generate_short_id, sha256_of_file};

pub struct TranscribeJob {
    pub header: JobHeader,
    pub meeting_id: String,
    pub recording_ids: Vec<String>,
    pub user_ids: Vec<String>,
    /// Transcript row ids produced by this run; read by the completion
    /// callback to seed the compile stage.
    pub produced_transcript_ids: Vec<String>,
    pub deps: PipelineDeps,
}

#[async_trait]
impl Job for TranscribeJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut JobHeader {
        &mut self.header
    }

    async fn execute(&mut self) -> Result<()> {
        tracing::info!(
            "Transcribing meeting {} ({} recordings)",
            self.meeting_id,
            self.recording_ids.len()
        );
        self.produced_transcript_ids.clear();

        for recording_id in self.recording_ids.clone() {
            match self.transcribe_recording(&recording_id).await {
                Ok(transcript_id) => self.produced_transcript_ids.push(transcript_id),
                Err(e) => {
                    // One bad recording must not sink the rest of the
                    // meeting.
                    tracing::error!(
                        "Failed to transcribe recording {} in meeting {}: {:#}",
                        recording_id,
                        self.meeting_id,
                        e
                    );
                }
            }
        }

        if self.produced_transcript_ids.is_empty() && !self.recording_ids.is_empty() {
            return Err(JobError::Transient(format!(
                "No transcripts produced for meeting {}",
                self.meeting_id
            ))
            .into());
        }

        tracing::info!(
            "Transcribed {}/{} recordings for meeting {}",
            self.produced_transcript_ids.len(),
            self.recording_ids.len(),
            self.meeting_id
        );
        Ok(())
    }
}

impl TranscribeJob {
    async fn transcribe_recording(&self, recording_id: &str) -> Result<String> {
        let recording = self
            .deps
            .sql
            .get_recording_by_id(recording_id)
            .await?
            .with_context(|| format!("Recording {} not found", recording_id))?;

        let audio_path = self
            .deps
            .files
            .persistent_recording_path(&recording.filename);
        if !audio_path.exists() {
            return Err(anyhow::anyhow!(
                "Recording file missing: {}",
                audio_path.display()
            ));
        }

        let engine_output = {
            let _permit = self
                .deps
                .gpu
                .acquire(GpuJobClass::Transcription, &self.header.id)
                .await?;
            self.deps.speech.transcribe(&audio_path).await?
        };

        let transcript_id = generate_short_id();
        let filename = FileStore::user_transcript_filename(
            &self.meeting_id,
            &recording.user_id,
            &transcript_id,
        );
        let document = UserTranscriptDocument {
            meeting_id: self.meeting_id.clone(),
            user_id: recording.user_id.clone(),
            recording_id: recording.id.clone(),
            engine_output,
            created_at: Utc::now(),
            summary: None,
            summary_layers: None,
            summarized_at: None,
        };

        let path = self.deps.files.transcript_path(&filename);
        self.deps.files.write_json(&path, &document).await?;

        let row = UserTranscriptRow {
            id: transcript_id.clone(),
            meeting_id: self.meeting_id.clone(),
            user_id: recording.user_id.clone(),
            sha256: sha256_of_file(&path).await?,
            filename,
            created_at: Utc::now(),
        };
        if let Err(e) = self.deps.sql.insert_user_transcript(&row).await {
            self.deps.files.remove_if_exists(&path).await;
            return Err(e);
        }

        tracing::debug!(
            "Saved transcript {} for user {} in meeting {}",
            transcript_id,
            recording.user_id,
            self.meeting_id
        );
        Ok(transcript_id)
    }
}
