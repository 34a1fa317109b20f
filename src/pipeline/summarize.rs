/*
 * Meeting Scribe - Recursive Summarization Stage
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

//! Stage 3: recursively summarize the compiled transcript. The raw text
//! is split into word-bounded chunks, each chunk is summarized under the
//! GPU lock, and the concatenated summaries feed the next level until the
//! text fits in a single request. All intermediate layers are kept; they
//! get embedded alongside the final summary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::gpu::{GpuArbitrator, GpuJobClass};
use crate::job_queue::{Job, JobError, JobHeader};
use crate::llm::{ChatMessage, LanguageModel, LlmOptions};
use crate::pipeline::orchestrator::PipelineDeps;
use crate::pipeline::prompts;
use crate::storage::FileStore;
use crate::types::{CompiledTranscriptDocument, SummaryLayers, UserTranscriptDocument};
use crate::util::word_count;

/// Chunk size for one summarization request.
pub const MAX_WORDS_PER_REQUEST: usize = 2000;

/// Run the recursive summarization loop. Returns every layer's summaries
/// plus the final consolidated summary. Individual chunk failures are
/// skipped; a level where every chunk fails aborts the run.
pub async fn recursive_summarize(
    llm: &dyn LanguageModel,
    gpu: &GpuArbitrator,
    model: &str,
    job_id: &str,
    raw_text: &str,
) -> Result<(SummaryLayers, String)> {
    let mut layers: SummaryLayers = Vec::new();
    let mut level = 0usize;
    let mut text = raw_text.to_string();

    let final_summary = loop {
        let words = word_count(&text);
        tracing::info!("Summarization level {}: {} words", level, words);

        if words <= MAX_WORDS_PER_REQUEST && level > 0 {
            break text;
        }

        let word_list: Vec<&str> = text.split_whitespace().collect();
        let chunks: Vec<String> = word_list
            .chunks(MAX_WORDS_PER_REQUEST)
            .map(|chunk| chunk.join(" "))
            .collect();
        let total_chunks = chunks.len();

        let mut level_summaries = Vec::with_capacity(total_chunks);
        for (i, chunk) in chunks.iter().enumerate() {
            let (system, user) = if level == 0 {
                (
                    prompts::LEVEL_0_SYSTEM_MESSAGE,
                    prompts::level_0_user_content(i + 1, total_chunks, chunk),
                )
            } else {
                (
                    prompts::LEVEL_N_SYSTEM_MESSAGE,
                    prompts::level_n_user_content(i + 1, total_chunks, chunk),
                )
            };

            let reply = {
                let _permit = gpu.acquire(GpuJobClass::Summarization, job_id).await?;
                llm.query(
                    model,
                    &[ChatMessage::system(system), ChatMessage::user(user)],
                    &LlmOptions::default(),
                )
                .await
            };

            match reply {
                Ok(reply) => {
                    tracing::debug!(
                        "Summarized chunk {}/{} at level {} ({} words)",
                        i + 1,
                        total_chunks,
                        level,
                        word_count(&reply.content)
                    );
                    level_summaries.push(reply.content);
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to summarize chunk {}/{} at level {}: {:#}",
                        i + 1,
                        total_chunks,
                        level,
                        e
                    );
                }
            }
        }

        if level_summaries.is_empty() {
            return Err(anyhow::anyhow!(
                "Every chunk failed at summarization level {}",
                level
            ));
        }

        layers.push(level_summaries.clone());
        text = level_summaries.join("\n\n");
        level += 1;
    };

    tracing::info!(
        "Recursive summarization finished: {} layers, {} word final summary",
        layers.len(),
        word_count(&final_summary)
    );
    Ok((layers, final_summary))
}

pub struct SummarizeJob {
    pub header: JobHeader,
    pub meeting_id: String,
    pub compiled_transcript_id: String,
    pub user_ids: Vec<String>,
    pub deps: PipelineDeps,
}

#[async_trait]
impl Job for SummarizeJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut JobHeader {
        &mut self.header
    }

    async fn execute(&mut self) -> Result<()> {
        let filename = FileStore::compiled_transcript_filename(&self.meeting_id);
        let path = self.deps.files.compilation_path(&filename);
        let mut compiled: CompiledTranscriptDocument = self
            .deps
            .files
            .read_json(&path)
            .await
            .context("Failed to load compiled transcript")?;

        if compiled.segments.is_empty() {
            return Err(JobError::Permanent(format!(
                "Compiled transcript for meeting {} has no segments",
                self.meeting_id
            ))
            .into());
        }

        let raw_text = compiled
            .segments
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        tracing::info!(
            "Summarizing meeting {} ({} words of transcript)",
            self.meeting_id,
            word_count(&raw_text)
        );

        let (layers, final_summary) = recursive_summarize(
            self.deps.llm.as_ref(),
            &self.deps.gpu,
            &self.deps.llm_model,
            &self.header.id,
            &raw_text,
        )
        .await?;

        let summarized_at = Utc::now();
        compiled.summary = Some(final_summary.clone());
        compiled.summary_layers = Some(layers.clone());
        compiled.summarized_at = Some(summarized_at);
        self.deps.files.write_json(&path, &compiled).await?;

        // Mirror the summary into each user's transcript document;
        // individual failures only cost that one document.
        let rows = self
            .deps
            .sql
            .get_user_transcripts_for_meeting(&self.meeting_id)
            .await?;
        let mut updated = 0usize;
        for row in &rows {
            let user_path = self.deps.files.transcript_path(&row.filename);
            let result: Result<()> = async {
                let mut document: UserTranscriptDocument =
                    self.deps.files.read_json(&user_path).await?;
                document.summary = Some(final_summary.clone());
                document.summary_layers = Some(layers.clone());
                document.summarized_at = Some(summarized_at);
                self.deps.files.write_json(&user_path, &document).await
            }
            .await;

            match result {
                Ok(()) => updated += 1,
                Err(e) => tracing::warn!(
                    "Failed to update transcript {} with summary: {:#}",
                    row.id,
                    e
                ),
            }
        }

        tracing::info!(
            "Stored summaries for meeting {} ({} layers, {}/{} user transcripts updated)",
            self.meeting_id,
            layers.len(),
            updated,
            rows.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::llm::LlmReply;

    /// Model that replies with a fixed-size summary and counts calls.
    struct FixedSummaryModel {
        calls: Arc<AtomicUsize>,
        summary_words: usize,
    }

    #[async_trait]
    impl LanguageModel for FixedSummaryModel {
        async fn query(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _options: &LlmOptions,
        ) -> Result<LlmReply> {
            assert_eq!(messages.len(), 2);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LlmReply {
                content: vec!["summary"; self.summary_words].join(" "),
                eval_count: Some(self.summary_words as i64),
                prompt_eval_count: None,
                total_duration: None,
            })
        }
    }

    fn words(n: usize) -> String {
        vec!["transcript"; n].join(" ")
    }

    #[tokio::test]
    async fn test_short_text_still_gets_one_summarization_pass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = FixedSummaryModel {
            calls: calls.clone(),
            summary_words: 300,
        };
        let gpu = GpuArbitrator::with_seed(1);

        let (layers, final_summary) =
            recursive_summarize(&model, &gpu, "test-model", "job-1", &words(500))
                .await
                .unwrap();

        // One level with one chunk; the level-0 summary is the final one.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].len(), 1);
        assert_eq!(word_count(&final_summary), 300);
    }

    #[tokio::test]
    async fn test_long_text_recurses_until_under_limit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = FixedSummaryModel {
            calls: calls.clone(),
            summary_words: 400,
        };
        let gpu = GpuArbitrator::with_seed(1);

        // 12,000 words -> 6 level-0 chunks -> 2,400 words of summaries
        // -> 2 level-1 chunks -> 800 words -> done.
        let (layers, final_summary) =
            recursive_summarize(&model, &gpu, "test-model", "job-1", &words(12_000))
                .await
                .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].len(), 6);
        assert_eq!(layers[1].len(), 2);
        assert_eq!(word_count(&final_summary), 800);

        // The final summary is the join of the last layer.
        assert_eq!(final_summary, layers[1].join("\n\n"));
    }

    /// Model that fails every request.
    struct BrokenModel;

    #[async_trait]
    impl LanguageModel for BrokenModel {
        async fn query(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _options: &LlmOptions,
        ) -> Result<LlmReply> {
            Err(anyhow::anyhow!("inference backend offline"))
        }
    }

    #[tokio::test]
    async fn test_all_chunks_failing_aborts() {
        let gpu = GpuArbitrator::with_seed(1);
        let result =
            recursive_summarize(&BrokenModel, &gpu, "test-model", "job-1", &words(100)).await;
        assert!(result.is_err());
    }
}
