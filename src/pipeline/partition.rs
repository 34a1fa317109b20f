/*
 * Meeting Scribe - Embedding Partitioners
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

//! Prepares text for embedding. Transcript segments are contextualized
//! with their ±2 neighbors; summaries are sliced into token-bounded
//! partitions with sentence-boundary overlap.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{CompiledTranscriptDocument, SummaryLayers, TranscriptSegment};
use crate::util::word_count;

/// Token ceiling per summary partition, sized for the embedding model.
pub const MAX_PARTITION_TOKENS: usize = 512;
/// Fraction of a partition re-included in its successor for continuity.
pub const PARTITION_OVERLAP: f64 = 0.15;
/// Safety margin kept below the token ceiling.
pub const PARTITION_TOKEN_BUFFER: f64 = 0.05;
/// Neighboring segments included on each side of a transcript segment.
const CONTEXT_SEGMENTS: usize = 2;

/// Rough token estimate: ~1.3 words per token for English text, rounded
/// up so the partition ceiling is never exceeded by the estimate.
pub fn estimate_token_count(text: &str) -> usize {
    (word_count(text) as f64 / 1.3).ceil() as usize
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindow {
    pub start_index: usize,
    pub end_index: usize,
    pub window_size: usize,
}

/// One transcript segment together with its embedding input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptPartition {
    pub original_segment: TranscriptSegment,
    pub contextualized_text: String,
    pub segment_index: usize,
    pub context_window: ContextWindow,
}

/// Contextualize every compiled segment with its surrounding segments.
pub fn partition_transcript_segments(
    compiled: &CompiledTranscriptDocument,
) -> Vec<TranscriptPartition> {
    let segments = &compiled.segments;
    let mut partitions = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        let start_idx = i.saturating_sub(CONTEXT_SEGMENTS);
        let end_idx = (i + CONTEXT_SEGMENTS + 1).min(segments.len());
        let window = &segments[start_idx..end_idx];

        let contextualized_text = window
            .iter()
            .map(|s| s.content.as_str())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        partitions.push(TranscriptPartition {
            original_segment: segment.clone(),
            contextualized_text,
            segment_index: i,
            context_window: ContextWindow {
                start_index: start_idx,
                end_index: end_idx - 1,
                window_size: window.len(),
            },
        });
    }

    partitions
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPartitionMetadata {
    pub meeting_id: String,
    pub guild_id: String,
    pub is_subsummary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_level: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_index_in_level: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_final_summary: Option<bool>,
}

/// A token-bounded slice of summary text prepared for embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPartition {
    pub text: String,
    pub segment_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub estimated_tokens: usize,
    pub global_partition_index: usize,
    pub metadata: SummaryPartitionMetadata,
}

/// Split one summary text into partitions no larger than the effective
/// token budget, overlapping on sentence boundaries.
pub fn partition_summary_text(
    summary_text: &str,
    metadata: &SummaryPartitionMetadata,
) -> Vec<SummaryPartition> {
    if summary_text.trim().is_empty() {
        return Vec::new();
    }

    let effective_max_tokens =
        (MAX_PARTITION_TOKENS as f64 * (1.0 - PARTITION_TOKEN_BUFFER)) as usize;
    let overlap_tokens = (effective_max_tokens as f64 * PARTITION_OVERLAP) as usize;

    let total_tokens = estimate_token_count(summary_text);
    if total_tokens <= effective_max_tokens {
        return vec![SummaryPartition {
            text: summary_text.to_string(),
            segment_index: 0,
            start_char: 0,
            end_char: summary_text.len(),
            estimated_tokens: total_tokens,
            global_partition_index: 0,
            metadata: metadata.clone(),
        }];
    }

    let sentences = split_into_sentences(summary_text);

    let mut partitions = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;
    let mut segment_index = 0usize;
    let mut start_char = 0usize;

    for sentence in sentences {
        let sentence_tokens = estimate_token_count(&sentence);

        if current_tokens + sentence_tokens > effective_max_tokens && !current.is_empty() {
            let segment_text = current.join(" ");
            let end_char = start_char + segment_text.len();
            partitions.push(SummaryPartition {
                text: segment_text,
                segment_index,
                start_char,
                end_char,
                estimated_tokens: current_tokens,
                global_partition_index: 0,
                metadata: metadata.clone(),
            });

            // Carry trailing sentences forward as overlap.
            let mut overlap: Vec<String> = Vec::new();
            let mut overlap_token_count = 0usize;
            for prev in current.iter().rev() {
                let prev_tokens = estimate_token_count(prev);
                if overlap_token_count + prev_tokens <= overlap_tokens {
                    overlap.insert(0, prev.clone());
                    overlap_token_count += prev_tokens;
                } else {
                    break;
                }
            }

            let overlap_len: usize = if overlap.is_empty() {
                0
            } else {
                overlap.join(" ").len()
            };
            start_char = end_char - overlap_len;
            current_tokens = overlap_token_count + sentence_tokens;
            current = overlap;
            current.push(sentence);
            segment_index += 1;
        } else {
            current.push(sentence);
            current_tokens += sentence_tokens;
        }
    }

    if !current.is_empty() {
        let segment_text = current.join(" ");
        let end_char = start_char + segment_text.len();
        partitions.push(SummaryPartition {
            text: segment_text,
            segment_index,
            start_char,
            end_char,
            estimated_tokens: current_tokens,
            global_partition_index: 0,
            metadata: metadata.clone(),
        });
    }

    partitions
}

/// Partition every subsummary layer plus the final summary, assigning
/// global partition indices across the whole set.
pub fn partition_multi_level_summaries(
    summary_layers: &SummaryLayers,
    final_summary: &str,
    meeting_id: &str,
    guild_id: &str,
) -> Vec<SummaryPartition> {
    let mut all = Vec::new();
    let mut global_index = 0usize;

    for (level, summaries) in summary_layers.iter().enumerate() {
        for (summary_index, summary_text) in summaries.iter().enumerate() {
            let metadata = SummaryPartitionMetadata {
                meeting_id: meeting_id.to_string(),
                guild_id: guild_id.to_string(),
                is_subsummary: true,
                summary_level: Some(level),
                summary_index_in_level: Some(summary_index),
                is_final_summary: None,
            };
            for mut partition in partition_summary_text(summary_text, &metadata) {
                partition.global_partition_index = global_index;
                global_index += 1;
                all.push(partition);
            }
        }
    }

    let final_metadata = SummaryPartitionMetadata {
        meeting_id: meeting_id.to_string(),
        guild_id: guild_id.to_string(),
        is_subsummary: false,
        summary_level: None,
        summary_index_in_level: None,
        is_final_summary: Some(true),
    };
    for mut partition in partition_summary_text(final_summary, &final_metadata) {
        partition.global_partition_index = global_index;
        global_index += 1;
        all.push(partition);
    }

    all
}

lazy_static! {
    static ref SENTENCE_BOUNDARY: Regex =
        Regex::new(r"(?P<terminator>[.!?])\s+(?P<next>[A-Z])").unwrap();
}

/// Split text into sentences on terminator-then-capital boundaries, with
/// common abbreviations neutralized first.
fn split_into_sentences(text: &str) -> Vec<String> {
    const ABBREVIATIONS: &[(&str, &str)] = &[
        ("Mr.", "Mr"),
        ("Mrs.", "Mrs"),
        ("Ms.", "Ms"),
        ("Dr.", "Dr"),
        ("Jr.", "Jr"),
        ("Sr.", "Sr"),
        ("vs.", "vs"),
        ("etc.", "etc"),
        ("e.g.", "eg"),
        ("i.e.", "ie"),
    ];

    let mut normalized = text.to_string();
    for (from, to) in ABBREVIATIONS {
        normalized = normalized.replace(from, to);
    }

    // Mark boundaries, then split; regex crate has no lookbehind.
    let marked = SENTENCE_BOUNDARY.replace_all(&normalized, "${terminator}\u{1}${next}");
    marked
        .split('\u{1}')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SegmentSpeaker, SegmentTimestamp};
    use chrono::Utc;

    fn segment(i: usize) -> TranscriptSegment {
        TranscriptSegment {
            timestamp: SegmentTimestamp {
                start_time: i as f64,
                end_time: i as f64 + 1.0,
            },
            speaker: SegmentSpeaker {
                user_id: format!("user-{}", i % 2),
                user_transcription_file: "t.json".to_string(),
            },
            content: format!("segment {}", i),
        }
    }

    fn compiled(n: usize) -> CompiledTranscriptDocument {
        CompiledTranscriptDocument {
            meeting_id: "m1".to_string(),
            compiled_at: Utc::now(),
            transcript_count: 2,
            user_ids: vec!["user-0".to_string(), "user-1".to_string()],
            segment_count: n,
            segments: (0..n).map(segment).collect(),
            summary: None,
            summary_layers: None,
            summarized_at: None,
        }
    }

    #[test]
    fn test_transcript_partitions_use_plus_minus_two_context() {
        let partitions = partition_transcript_segments(&compiled(6));
        assert_eq!(partitions.len(), 6);

        // First segment: no left context, two right neighbors.
        assert_eq!(partitions[0].context_window.start_index, 0);
        assert_eq!(partitions[0].context_window.end_index, 2);
        assert_eq!(partitions[0].context_window.window_size, 3);
        assert_eq!(partitions[0].contextualized_text, "segment 0 segment 1 segment 2");

        // Middle segment: full ±2 window.
        assert_eq!(partitions[3].context_window.start_index, 1);
        assert_eq!(partitions[3].context_window.end_index, 5);
        assert_eq!(partitions[3].context_window.window_size, 5);
        assert_eq!(
            partitions[3].contextualized_text,
            "segment 1 segment 2 segment 3 segment 4 segment 5"
        );

        // Last segment: two left neighbors only.
        assert_eq!(partitions[5].context_window.start_index, 3);
        assert_eq!(partitions[5].context_window.end_index, 5);
    }

    #[test]
    fn test_transcript_partitions_empty_input() {
        assert!(partition_transcript_segments(&compiled(0)).is_empty());
    }

    #[test]
    fn test_token_estimate() {
        // 13 words / 1.3 = 10 tokens exactly.
        let text = "one two three four five six seven eight nine ten eleven twelve thirteen";
        assert_eq!(estimate_token_count(text), 10);
        // 14 words / 1.3 = 10.77, rounded up.
        assert_eq!(estimate_token_count(&format!("{} fourteen", text)), 11);
        // A single word still counts as one token.
        assert_eq!(estimate_token_count("word"), 1);
        assert_eq!(estimate_token_count(""), 0);
    }

    fn meta() -> SummaryPartitionMetadata {
        SummaryPartitionMetadata {
            meeting_id: "m1".to_string(),
            guild_id: "g1".to_string(),
            is_subsummary: false,
            summary_level: None,
            summary_index_in_level: None,
            is_final_summary: Some(true),
        }
    }

    #[test]
    fn test_short_summary_is_single_partition() {
        let partitions = partition_summary_text("One short sentence.", &meta());
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].segment_index, 0);
        assert_eq!(partitions[0].start_char, 0);
    }

    #[test]
    fn test_long_summary_is_split_with_overlap() {
        // ~80 words per sentence, 20 sentences: far over the token budget.
        let sentence = format!("{} end.", "word ".repeat(80).trim());
        let text = (0..20)
            .map(|i| format!("Sentence {} begins. {}", i, sentence))
            .collect::<Vec<_>>()
            .join(" ");

        let partitions = partition_summary_text(&text, &meta());
        assert!(partitions.len() > 1);

        let effective_max =
            (MAX_PARTITION_TOKENS as f64 * (1.0 - PARTITION_TOKEN_BUFFER)) as usize;
        for (i, partition) in partitions.iter().enumerate() {
            assert_eq!(partition.segment_index, i);
            assert!(partition.estimated_tokens <= effective_max + 1);
        }

        // Consecutive partitions share overlapping text.
        let first_tail: String = partitions[0]
            .text
            .split_whitespace()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join(" ");
        assert!(partitions[1].text.contains(&first_tail));
    }

    #[test]
    fn test_empty_summary_yields_no_partitions() {
        assert!(partition_summary_text("   ", &meta()).is_empty());
    }

    #[test]
    fn test_multi_level_partitioning_sets_metadata_and_global_indices() {
        let layers: SummaryLayers = vec![
            vec!["Layer zero summary one.".to_string(), "Layer zero summary two.".to_string()],
            vec!["Layer one consolidated.".to_string()],
        ];
        let partitions =
            partition_multi_level_summaries(&layers, "The final summary.", "m1", "g1");

        assert_eq!(partitions.len(), 4);
        for (i, partition) in partitions.iter().enumerate() {
            assert_eq!(partition.global_partition_index, i);
        }

        assert!(partitions[0].metadata.is_subsummary);
        assert_eq!(partitions[0].metadata.summary_level, Some(0));
        assert_eq!(partitions[0].metadata.summary_index_in_level, Some(0));
        assert_eq!(partitions[1].metadata.summary_index_in_level, Some(1));
        assert_eq!(partitions[2].metadata.summary_level, Some(1));

        let last = &partitions[3];
        assert!(!last.metadata.is_subsummary);
        assert_eq!(last.metadata.is_final_summary, Some(true));
    }

    #[test]
    fn test_sentence_split_handles_abbreviations() {
        let sentences =
            split_into_sentences("Dr. Smith spoke first. Mrs. Jones replied. All agreed.");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "Dr Smith spoke first.");
    }
}
