/*
 * Meeting Scribe - Transcript Compilation Stage
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

//! Stage 2: merge every user transcript of a meeting into one normalized,
//! time-sorted compiled transcript document.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::job_queue::{Job, JobError, JobHeader};
use crate::pipeline::orchestrator::PipelineDeps;
use crate::storage::FileStore;
use crate::types::{
    CompiledTranscriptDocument, CompiledTranscriptRow, SegmentSpeaker, SegmentTimestamp,
    TranscriptSegment, UserTranscriptDocument, UserTranscriptRow,
};
use crate::util::{generate_short_id, sha256_of_file};

pub struct CompileJob {
    pub header: JobHeader,
    pub meeting_id: String,
    pub transcript_ids: Vec<String>,
    pub user_ids: Vec<String>,
    /// Filled during execute; read by the completion callback.
    pub compiled_transcript_id: String,
    pub deps: PipelineDeps,
}

/// Normalize one user's engine output into compiled segments.
pub fn normalize_user_segments(
    row: &UserTranscriptRow,
    document: &UserTranscriptDocument,
) -> Vec<TranscriptSegment> {
    document
        .engine_output
        .segments
        .iter()
        .map(|segment| TranscriptSegment {
            timestamp: SegmentTimestamp {
                start_time: segment.start,
                end_time: segment.end,
            },
            speaker: SegmentSpeaker {
                user_id: row.user_id.clone(),
                user_transcription_file: row.filename.clone(),
            },
            content: segment.text.trim().to_string(),
        })
        .collect()
}

/// Merge all users' segments into one ascending timeline. The sort is
/// stable, so equal start times keep their input order and re-running on
/// the same inputs reproduces the ordering byte for byte.
pub fn merge_segments(mut segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    segments.sort_by(|a, b| {
        a.timestamp
            .start_time
            .partial_cmp(&b.timestamp.start_time)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    segments
}

#[async_trait]
impl Job for CompileJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut JobHeader {
        &mut self.header
    }

    async fn execute(&mut self) -> Result<()> {
        let rows = self
            .deps
            .sql
            .get_user_transcripts_for_meeting(&self.meeting_id)
            .await?;
        if rows.is_empty() {
            return Err(JobError::Permanent(format!(
                "No transcripts found for meeting {}",
                self.meeting_id
            ))
            .into());
        }

        let mut all_segments = Vec::new();
        let mut loaded = 0usize;
        for row in &rows {
            let path = self.deps.files.transcript_path(&row.filename);
            let document: UserTranscriptDocument = match self.deps.files.read_json(&path).await {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(
                        "Skipping unreadable transcript {} for meeting {}: {:#}",
                        row.id,
                        self.meeting_id,
                        e
                    );
                    continue;
                }
            };
            all_segments.extend(normalize_user_segments(row, &document));
            loaded += 1;
        }

        if loaded == 0 {
            return Err(JobError::Transient(format!(
                "No transcript documents readable for meeting {}",
                self.meeting_id
            ))
            .into());
        }

        let segments = merge_segments(all_segments);

        let mut user_ids: Vec<String> = rows.iter().map(|r| r.user_id.clone()).collect();
        user_ids.sort();
        user_ids.dedup();

        let document = CompiledTranscriptDocument {
            meeting_id: self.meeting_id.clone(),
            compiled_at: Utc::now(),
            transcript_count: loaded,
            user_ids,
            segment_count: segments.len(),
            segments,
            summary: None,
            summary_layers: None,
            summarized_at: None,
        };

        let filename = FileStore::compiled_transcript_filename(&self.meeting_id);
        let path = self.deps.files.compilation_path(&filename);
        self.deps.files.write_json(&path, &document).await?;

        let row = CompiledTranscriptRow {
            id: generate_short_id(),
            meeting_id: self.meeting_id.clone(),
            sha256: sha256_of_file(&path).await?,
            filename,
            created_at: Utc::now(),
        };
        self.deps.sql.insert_compiled_transcript(&row).await?;
        self.compiled_transcript_id = row.id.clone();

        tracing::info!(
            "Compiled {} segments from {} transcripts for meeting {}",
            document.segment_count,
            document.transcript_count,
            self.meeting_id
        );
        Ok(())
    }
}
