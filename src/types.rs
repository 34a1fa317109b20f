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

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a meeting. Advances monotonically; only the recording →
/// processing transition is driven by audio stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeetingStatus {
    Scheduled,
    Recording,
    Processing,
    Transcribing,
    Completed,
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeetingStatus::Scheduled => write!(f, "scheduled"),
            MeetingStatus::Recording => write!(f, "recording"),
            MeetingStatus::Processing => write!(f, "processing"),
            MeetingStatus::Transcribing => write!(f, "transcribing"),
            MeetingStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for MeetingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(MeetingStatus::Scheduled),
            "recording" => Ok(MeetingStatus::Recording),
            "processing" => Ok(MeetingStatus::Processing),
            "transcribing" => Ok(MeetingStatus::Transcribing),
            "completed" => Ok(MeetingStatus::Completed),
            other => Err(anyhow!("Unknown meeting status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    Transcoding,
    Transcribing,
    Compiling,
    Summarizing,
    TextEmbedding,
    Chatbot,
    Cleaning,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Transcoding => write!(f, "transcoding"),
            JobType::Transcribing => write!(f, "transcribing"),
            JobType::Compiling => write!(f, "compiling"),
            JobType::Summarizing => write!(f, "summarizing"),
            JobType::TextEmbedding => write!(f, "text_embedding"),
            JobType::Chatbot => write!(f, "chatbot"),
            JobType::Cleaning => write!(f, "cleaning"),
        }
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcoding" => Ok(JobType::Transcoding),
            "transcribing" => Ok(JobType::Transcribing),
            "compiling" => Ok(JobType::Compiling),
            "summarizing" => Ok(JobType::Summarizing),
            "text_embedding" => Ok(JobType::TextEmbedding),
            "chatbot" => Ok(JobType::Chatbot),
            "cleaning" => Ok(JobType::Cleaning),
            other => Err(anyhow!("Unknown job type: {}", other)),
        }
    }
}

/// Status of a job row. Transitions pending → in_progress →
/// {completed, failed, skipped}; never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::InProgress => write!(f, "in_progress"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "in_progress" => Ok(JobState::InProgress),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "skipped" => Ok(JobState::Skipped),
            other => Err(anyhow!("Unknown job state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscodeStatus {
    Queued,
    InProgress,
    Done,
    Failed,
}

impl fmt::Display for TranscodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeStatus::Queued => write!(f, "queued"),
            TranscodeStatus::InProgress => write!(f, "in_progress"),
            TranscodeStatus::Done => write!(f, "done"),
            TranscodeStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TranscodeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TranscodeStatus::Queued),
            "in_progress" => Ok(TranscodeStatus::InProgress),
            "done" => Ok(TranscodeStatus::Done),
            "failed" => Ok(TranscodeStatus::Failed),
            other => Err(anyhow!("Unknown transcode status: {}", other)),
        }
    }
}

// -------------------------------------------------------------- //
// SQL row types
// -------------------------------------------------------------- //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub requested_by: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: MeetingStatus,
    pub participants: Vec<String>,
}

/// A single finalized 30s PCM window for one user in one meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempRecording {
    pub id: String,
    pub meeting_id: String,
    pub user_id: String,
    pub chunk_idx: u32,
    pub start_timestamp_ms: u64,
    pub filename: String,
    pub transcode_status: TranscodeStatus,
    pub created_at: DateTime<Utc>,
}

/// The durable encoded recording for one user across a whole meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentRecording {
    pub id: String,
    pub meeting_id: String,
    pub user_id: String,
    pub duration_ms: u64,
    pub sha256: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTranscriptRow {
    pub id: String,
    pub meeting_id: String,
    pub user_id: String,
    pub sha256: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledTranscriptRow {
    pub id: String,
    pub meeting_id: String,
    pub sha256: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusRow {
    pub id: String,
    pub job_type: JobType,
    pub meeting_id: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobState,
    pub error_log: Option<String>,
}

// -------------------------------------------------------------- //
// Transcript documents (JSON on disk)
// -------------------------------------------------------------- //

/// One time-stamped utterance in a compiled transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub timestamp: SegmentTimestamp,
    pub speaker: SegmentSpeaker,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentTimestamp {
    pub start_time: f64,
    pub end_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSpeaker {
    pub user_id: String,
    pub user_transcription_file: String,
}

/// Summaries produced at each recursion level, level 0 first.
pub type SummaryLayers = Vec<Vec<String>>;

/// Per-user transcript document written by the transcription stage and
/// later mutated in place with summary fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTranscriptDocument {
    pub meeting_id: String,
    pub user_id: String,
    pub recording_id: String,
    pub engine_output: SpeechTranscript,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_layers: Option<SummaryLayers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarized_at: Option<DateTime<Utc>>,
}

/// Meeting-level merged, time-sorted transcript document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledTranscriptDocument {
    pub meeting_id: String,
    pub compiled_at: DateTime<Utc>,
    pub transcript_count: usize,
    pub user_ids: Vec<String>,
    pub segment_count: usize,
    pub segments: Vec<TranscriptSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_layers: Option<SummaryLayers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarized_at: Option<DateTime<Utc>>,
}

/// Raw speech engine output with word-level timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechTranscript {
    pub text: String,
    pub segments: Vec<SpeechSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<SpeechWord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechWord {
    pub start: f64,
    pub end: f64,
    pub word: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_string_round_trips() {
        for status in [
            MeetingStatus::Scheduled,
            MeetingStatus::Recording,
            MeetingStatus::Processing,
            MeetingStatus::Transcribing,
            MeetingStatus::Completed,
        ] {
            assert_eq!(status.to_string().parse::<MeetingStatus>().unwrap(), status);
        }

        for state in [
            JobState::Pending,
            JobState::InProgress,
            JobState::Completed,
            JobState::Failed,
            JobState::Skipped,
        ] {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }

        assert_eq!(JobType::TextEmbedding.to_string(), "text_embedding");
        assert_eq!("text_embedding".parse::<JobType>().unwrap(), JobType::TextEmbedding);
        assert!("bogus".parse::<TranscodeStatus>().is_err());
    }
}
