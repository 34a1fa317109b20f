/*
 * Meeting Scribe - Embedding Stage
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

//! Stage 4: embed contextualized transcript segments and all summary
//! partitions, then upsert them into the vector store under deterministic
//! document ids so a re-run overwrites rather than duplicates.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::gpu::GpuJobClass;
use crate::job_queue::{Job, JobHeader};
use crate::pipeline::orchestrator::PipelineDeps;
use crate::pipeline::partition::{
    partition_multi_level_summaries, partition_transcript_segments, SummaryPartition,
    TranscriptPartition,
};
use crate::storage::vector::{embeddings_collection, VectorRecord, SUMMARIES_COLLECTION};
use crate::storage::FileStore;
use crate::types::CompiledTranscriptDocument;

pub struct EmbedJob {
    pub header: JobHeader,
    pub meeting_id: String,
    pub guild_id: String,
    pub compiled_transcript_id: String,
    pub user_ids: Vec<String>,
    pub deps: PipelineDeps,
}

/// Vector-store document id for a transcript segment.
pub fn segment_document_id(meeting_id: &str, segment_index: usize) -> String {
    format!("{}_{}", meeting_id, segment_index)
}

/// Vector-store document id for a summary partition.
pub fn summary_document_id(meeting_id: &str, partition: &SummaryPartition) -> String {
    if partition.metadata.is_subsummary {
        format!(
            "{}_level{}_summary{}_segment{}",
            meeting_id,
            partition.metadata.summary_level.unwrap_or(0),
            partition.metadata.summary_index_in_level.unwrap_or(0),
            partition.segment_index
        )
    } else {
        format!("{}_final_segment{}", meeting_id, partition.segment_index)
    }
}

#[async_trait]
impl Job for EmbedJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut JobHeader {
        &mut self.header
    }

    async fn execute(&mut self) -> Result<()> {
        let filename = FileStore::compiled_transcript_filename(&self.meeting_id);
        let path = self.deps.files.compilation_path(&filename);
        let compiled: CompiledTranscriptDocument = self
            .deps
            .files
            .read_json(&path)
            .await
            .context("Failed to load compiled transcript")?;

        let partitions = partition_transcript_segments(&compiled);
        if partitions.is_empty() {
            tracing::warn!("No segments to embed for meeting {}", self.meeting_id);
            return Ok(());
        }

        self.embed_transcript_partitions(&partitions).await?;

        match (&compiled.summary, &compiled.summary_layers) {
            (Some(summary), Some(layers)) => {
                let summary_partitions = partition_multi_level_summaries(
                    layers,
                    summary,
                    &self.meeting_id,
                    &self.guild_id,
                );
                if summary_partitions.is_empty() {
                    tracing::warn!(
                        "No summary partitions produced for meeting {}",
                        self.meeting_id
                    );
                } else {
                    self.embed_summary_partitions(&summary_partitions).await?;
                }
            }
            _ => tracing::info!(
                "No summaries on compiled transcript for meeting {}; embedding segments only",
                self.meeting_id
            ),
        }

        Ok(())
    }
}

impl EmbedJob {
    async fn embed_transcript_partitions(
        &self,
        partitions: &[TranscriptPartition],
    ) -> Result<()> {
        let texts: Vec<String> = partitions
            .iter()
            .map(|p| p.contextualized_text.clone())
            .collect();

        let embeddings = {
            let _permit = self
                .deps
                .gpu
                .acquire(GpuJobClass::TextEmbedding, &self.header.id)
                .await?;
            self.deps.embedder.encode_scoped(&texts).await?
        };

        let collection = embeddings_collection(&self.guild_id);
        let records: Vec<VectorRecord> = partitions
            .iter()
            .zip(embeddings)
            .map(|(partition, embedding)| {
                let segment = &partition.original_segment;
                VectorRecord {
                    id: segment_document_id(&self.meeting_id, partition.segment_index),
                    document: partition.contextualized_text.clone(),
                    embedding,
                    metadata: json!({
                        "meeting_id": self.meeting_id,
                        "guild_id": self.guild_id,
                        "segment_index": partition.segment_index,
                        "original_content": segment.content,
                        "user_id": segment.speaker.user_id,
                        "user_transcription_file": segment.speaker.user_transcription_file,
                        "start_time": segment.timestamp.start_time,
                        "end_time": segment.timestamp.end_time,
                    }),
                }
            })
            .collect();

        let count = records.len();
        self.deps.vector.upsert(&collection, records).await?;
        tracing::info!(
            "Stored {} segment embeddings in collection {}",
            count,
            collection
        );
        Ok(())
    }

    async fn embed_summary_partitions(&self, partitions: &[SummaryPartition]) -> Result<()> {
        let texts: Vec<String> = partitions.iter().map(|p| p.text.clone()).collect();

        let embeddings = {
            let _permit = self
                .deps
                .gpu
                .acquire(GpuJobClass::TextEmbedding, &self.header.id)
                .await?;
            self.deps.embedder.encode_scoped(&texts).await?
        };

        let records: Vec<VectorRecord> = partitions
            .iter()
            .zip(embeddings)
            .map(|(partition, embedding)| {
                let mut metadata = json!({
                    "meeting_id": partition.metadata.meeting_id,
                    "guild_id": partition.metadata.guild_id,
                    "is_subsummary": partition.metadata.is_subsummary,
                    "segment_index": partition.segment_index,
                    "global_partition_index": partition.global_partition_index,
                    "estimated_tokens": partition.estimated_tokens,
                    "start_char": partition.start_char,
                    "end_char": partition.end_char,
                });
                if partition.metadata.is_subsummary {
                    metadata["summary_level"] = json!(partition.metadata.summary_level);
                    metadata["summary_index_in_level"] =
                        json!(partition.metadata.summary_index_in_level);
                } else {
                    metadata["is_final_summary"] =
                        json!(partition.metadata.is_final_summary.unwrap_or(false));
                }

                VectorRecord {
                    id: summary_document_id(&self.meeting_id, partition),
                    document: partition.text.clone(),
                    embedding,
                    metadata,
                }
            })
            .collect();

        let count = records.len();
        self.deps
            .vector
            .upsert(SUMMARIES_COLLECTION, records)
            .await?;
        tracing::info!(
            "Stored {} summary embeddings in collection {}",
            count,
            SUMMARIES_COLLECTION
        );
        Ok(())
    }
}
