/*
 * Meeting Scribe - PCM to MP3 Transcoding
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

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::audio;
use crate::job_queue::{Job, JobHeader, JobQueue, QueueStatistics};
use crate::storage::SqlStore;
use crate::types::{JobState, JobType, TranscodeStatus};
use crate::util::generate_short_id;

const MP3_BITRATE: &str = "128k";
const TRANSCODE_MAX_RETRIES: u32 = 1;

/// A request to turn one finalized PCM chunk into an MP3.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub temp_recording_id: String,
    pub meeting_id: String,
    pub pcm_path: PathBuf,
    pub mp3_path: PathBuf,
}

/// Opaque sink the chunker hands finalized windows to.
#[async_trait]
pub trait TranscodeSink: Send + Sync {
    async fn enqueue(&self, request: TranscodeRequest) -> Result<()>;
}

struct TranscodeJob {
    header: JobHeader,
    request: TranscodeRequest,
    sql: SqlStore,
}

#[async_trait]
impl Job for TranscodeJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut JobHeader {
        &mut self.header
    }

    async fn execute(&mut self) -> Result<()> {
        self.sql
            .update_temp_recording_status(
                &self.request.temp_recording_id,
                TranscodeStatus::InProgress,
            )
            .await?;

        run_ffmpeg_pcm_to_mp3(&self.request.pcm_path, &self.request.mp3_path).await?;

        self.sql
            .update_temp_recording_status(&self.request.temp_recording_id, TranscodeStatus::Done)
            .await?;

        tracing::debug!(
            "Transcoded chunk {} -> {}",
            self.request.pcm_path.display(),
            self.request.mp3_path.display()
        );
        Ok(())
    }
}

async fn run_ffmpeg_pcm_to_mp3(pcm_path: &PathBuf, mp3_path: &PathBuf) -> Result<()> {
    let output = Command::new("ffmpeg")
        .args([
            "-f",
            "s16le",
            "-ar",
            &audio::SAMPLE_RATE_HZ.to_string(),
            "-ac",
            &audio::CHANNELS.to_string(),
            "-i",
            &pcm_path.to_string_lossy(),
            "-codec:a",
            "libmp3lame",
            "-b:a",
            MP3_BITRATE,
            "-y",
            &mp3_path.to_string_lossy(),
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to start ffmpeg transcode process")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!(
            "ffmpeg transcode failed with status {:?}: {}",
            output.status,
            stderr
        ));
    }
    Ok(())
}

/// Sequential ffmpeg transcode service. One worker keeps encoder load
/// predictable while the chunker emits windows at its own pace.
pub struct TranscodeService {
    queue: JobQueue<TranscodeJob>,
    sql: SqlStore,
}

impl TranscodeService {
    pub fn new(sql: SqlStore) -> Arc<Self> {
        let queue: JobQueue<TranscodeJob> = JobQueue::new("transcode", TRANSCODE_MAX_RETRIES);

        let service = Arc::new(Self {
            queue: queue.clone(),
            sql: sql.clone(),
        });

        // A chunk whose transcode exhausted its retries is marked failed so
        // promotion can skip it.
        let failed_sql = sql;
        queue.set_on_failed(Arc::new(move |job: &TranscodeJob| {
            let sql = failed_sql.clone();
            let temp_recording_id = job.request.temp_recording_id.clone();
            let job_id = job.header.id.clone();
            let finished_at = job.header.finished_at;
            let error = job.header.error_message.clone();
            Box::pin(async move {
                sql.update_temp_recording_status(&temp_recording_id, TranscodeStatus::Failed)
                    .await?;
                sql.update_job_status(
                    &job_id,
                    JobState::Failed,
                    None,
                    finished_at,
                    error.as_deref(),
                )
                .await?;
                Ok(())
            })
        }));

        let complete_sql = service.sql.clone();
        queue.set_on_complete(Arc::new(move |job: &TranscodeJob| {
            let sql = complete_sql.clone();
            let job_id = job.header.id.clone();
            let started_at = job.header.started_at;
            let finished_at = job.header.finished_at;
            Box::pin(async move {
                sql.update_job_status(&job_id, JobState::Completed, started_at, finished_at, None)
                    .await?;
                Ok(())
            })
        }));

        service
    }

    pub fn statistics(&self) -> QueueStatistics {
        self.queue.statistics()
    }

    pub async fn shutdown(&self) {
        self.queue.stop(true).await;
    }
}

#[async_trait]
impl TranscodeSink for TranscodeService {
    async fn enqueue(&self, request: TranscodeRequest) -> Result<()> {
        let job_id = generate_short_id();
        self.sql
            .create_job_status(
                &job_id,
                JobType::Transcoding,
                &request.meeting_id,
                chrono::Utc::now(),
            )
            .await?;

        let job = TranscodeJob {
            header: JobHeader::new(job_id),
            request,
            sql: self.sql.clone(),
        };
        self.queue.add_job(job).await
    }
}
