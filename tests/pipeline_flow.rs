/*
 * Meeting Scribe - Pipeline Flow Integration Tests
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

//! Runs a meeting through Transcribe → Compile → Summarize → Embed with
//! mock engines and checks ordering, persistence and idempotence.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;

use meeting_scribe::embedding::{EmbeddingBackend, EmbeddingModelHandler};
use meeting_scribe::gpu::GpuArbitrator;
use meeting_scribe::llm::{ChatMessage, LanguageModel, LlmOptions, LlmReply};
use meeting_scribe::notify::Notifier;
use meeting_scribe::pipeline::{Pipeline, PipelineDeps};
use meeting_scribe::speech::SpeechEngine;
use meeting_scribe::storage::{
    vector::embeddings_collection, vector::SUMMARIES_COLLECTION, FileStore, InMemoryVectorStore,
    SqlStore, VectorStore,
};
use meeting_scribe::types::{
    JobState, JobType, Meeting, MeetingStatus, PersistentRecording, SpeechSegment,
    SpeechTranscript, SpeechWord,
};

struct ScriptedSpeechEngine;

#[async_trait]
impl SpeechEngine for ScriptedSpeechEngine {
    async fn transcribe(&self, audio_file: &Path) -> Result<SpeechTranscript> {
        let name = audio_file.file_name().unwrap().to_string_lossy().to_string();
        // Interleaved timelines so compilation has real sorting to do.
        let segments = if name.contains("alice") {
            vec![
                (0.0, 4.0, "alice opens the meeting"),
                (10.0, 14.0, "alice proposes the roadmap"),
            ]
        } else {
            vec![(5.0, 9.0, "bob raises a concern")]
        };

        Ok(SpeechTranscript {
            text: segments.iter().map(|s| s.2).collect::<Vec<_>>().join(" "),
            segments: segments
                .into_iter()
                .map(|(start, end, text)| SpeechSegment {
                    start,
                    end,
                    text: text.to_string(),
                    words: vec![SpeechWord {
                        start,
                        end,
                        word: text.split(' ').next().unwrap().to_string(),
                    }],
                })
                .collect(),
        })
    }
}

struct ShortSummaryModel;

#[async_trait]
impl LanguageModel for ShortSummaryModel {
    async fn query(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _options: &LlmOptions,
    ) -> Result<LlmReply> {
        Ok(LlmReply {
            content: "The team discussed the roadmap and one open concern.".to_string(),
            eval_count: Some(10),
            prompt_eval_count: Some(100),
            total_duration: None,
        })
    }
}

struct UnitVectorBackend;

#[async_trait]
impl EmbeddingBackend for UnitVectorBackend {
    async fn load(&self) -> Result<()> {
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }

    async fn offload(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct CountingNotifier {
    completions: parking_lot::Mutex<Vec<String>>,
    failures: parking_lot::Mutex<Vec<(String, JobType)>>,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn meeting_complete(&self, meeting: &Meeting) -> Result<()> {
        self.completions.lock().push(meeting.id.clone());
        Ok(())
    }

    async fn stage_failed(&self, meeting: &Meeting, stage: JobType, _error: &str) -> Result<()> {
        self.failures.lock().push((meeting.id.clone(), stage));
        Ok(())
    }
}

struct Fixture {
    sql: SqlStore,
    files: FileStore,
    vector: Arc<InMemoryVectorStore>,
    notifier: Arc<CountingNotifier>,
    pipeline: Arc<Pipeline>,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let files = FileStore::new(dir.path()).unwrap();
    let sql = SqlStore::in_memory().await.unwrap();
    let vector = Arc::new(InMemoryVectorStore::new());
    let notifier = Arc::new(CountingNotifier::default());

    let pipeline = Pipeline::new(PipelineDeps {
        sql: sql.clone(),
        files: files.clone(),
        vector: vector.clone(),
        llm: Arc::new(ShortSummaryModel),
        speech: Arc::new(ScriptedSpeechEngine),
        embedder: EmbeddingModelHandler::new(Arc::new(UnitVectorBackend)),
        gpu: GpuArbitrator::with_seed(21),
        notifier: notifier.clone(),
        llm_model: "test-model".to_string(),
    });
    pipeline.start().await;

    Fixture {
        sql,
        files,
        vector,
        notifier,
        pipeline,
        _dir: dir,
    }
}

const MEETING_ID: &str = "feed0000000f1001";

async fn seed_meeting(fixture: &Fixture) -> (Vec<String>, Vec<String>) {
    fixture
        .sql
        .insert_meeting(&Meeting {
            id: MEETING_ID.to_string(),
            guild_id: "guild-7".to_string(),
            channel_id: "channel-7".to_string(),
            requested_by: "requester".to_string(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            status: MeetingStatus::Processing,
            participants: vec!["alice".to_string(), "bob".to_string()],
        })
        .await
        .unwrap();

    let mut recording_ids = Vec::new();
    for user in ["alice", "bob"] {
        let filename = format!("{}_{}.mp3", MEETING_ID, user);
        let path = fixture.files.persistent_recording_path(&filename);
        tokio::fs::write(&path, b"fake-mp3-audio").await.unwrap();

        let recording = PersistentRecording {
            id: format!("rec0000000000{:03}", recording_ids.len()),
            meeting_id: MEETING_ID.to_string(),
            user_id: user.to_string(),
            duration_ms: 60_000,
            sha256: "0".repeat(64),
            filename,
            created_at: Utc::now(),
        };
        fixture
            .sql
            .insert_persistent_recording(&recording)
            .await
            .unwrap();
        recording_ids.push(recording.id);
    }

    (
        recording_ids,
        vec!["alice".to_string(), "bob".to_string()],
    )
}

async fn wait_for_status(sql: &SqlStore, status: MeetingStatus) {
    for _ in 0..400 {
        let meeting = sql.get_meeting(MEETING_ID).await.unwrap().unwrap();
        if meeting.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("meeting never reached status {}", status);
}

#[tokio::test]
async fn meeting_flows_through_all_four_stages() {
    let fixture = fixture().await;
    let (recording_ids, user_ids) = seed_meeting(&fixture).await;

    fixture
        .pipeline
        .enqueue_transcription(MEETING_ID, recording_ids, user_ids)
        .await
        .unwrap();

    wait_for_status(&fixture.sql, MeetingStatus::Completed).await;

    // Per-user transcripts exist on disk and in SQL.
    let transcripts = fixture
        .sql
        .get_user_transcripts_for_meeting(MEETING_ID)
        .await
        .unwrap();
    assert_eq!(transcripts.len(), 2);

    // The compiled transcript is time-sorted across speakers.
    let compiled_row = fixture
        .sql
        .get_compiled_transcript_for_meeting(MEETING_ID)
        .await
        .unwrap()
        .unwrap();
    let compiled: meeting_scribe::types::CompiledTranscriptDocument = fixture
        .files
        .read_json(&fixture.files.compilation_path(&compiled_row.filename))
        .await
        .unwrap();
    assert_eq!(compiled.segment_count, 3);
    let contents: Vec<&str> = compiled
        .segments
        .iter()
        .map(|s| s.content.as_str())
        .collect();
    assert_eq!(
        contents,
        vec![
            "alice opens the meeting",
            "bob raises a concern",
            "alice proposes the roadmap"
        ]
    );

    // Summaries landed in the compiled document and every user document.
    assert!(compiled.summary.is_some());
    assert!(compiled.summary_layers.is_some());
    for row in &transcripts {
        let document: meeting_scribe::types::UserTranscriptDocument = fixture
            .files
            .read_json(&fixture.files.transcript_path(&row.filename))
            .await
            .unwrap();
        assert!(document.summary.is_some());
    }

    // Embeddings: one per segment, plus summary partitions.
    let collection = embeddings_collection("guild-7");
    assert_eq!(
        fixture
            .vector
            .count_for_meeting(&collection, MEETING_ID)
            .await
            .unwrap(),
        3
    );
    assert!(
        fixture
            .vector
            .count_for_meeting(SUMMARIES_COLLECTION, MEETING_ID)
            .await
            .unwrap()
            >= 2
    );

    // One job row per stage, all completed, with start/finish times.
    let jobs = fixture.sql.get_jobs_for_meeting(MEETING_ID).await.unwrap();
    let mut stages: Vec<JobType> = jobs.iter().map(|j| j.job_type).collect();
    stages.sort_by_key(|s| s.to_string());
    assert_eq!(jobs.len(), 4);
    for job in &jobs {
        assert_eq!(job.status, JobState::Completed, "job {:?}", job.job_type);
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());
    }
    assert!(stages.contains(&JobType::Transcribing));
    assert!(stages.contains(&JobType::Compiling));
    assert!(stages.contains(&JobType::Summarizing));
    assert!(stages.contains(&JobType::TextEmbedding));

    // Participants got exactly one completion notification batch.
    assert_eq!(
        *fixture.notifier.completions.lock(),
        vec![MEETING_ID.to_string()]
    );
    assert!(fixture.notifier.failures.lock().is_empty());

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn rerunning_embed_is_idempotent() {
    let fixture = fixture().await;
    let (recording_ids, user_ids) = seed_meeting(&fixture).await;

    fixture
        .pipeline
        .enqueue_transcription(MEETING_ID, recording_ids, user_ids.clone())
        .await
        .unwrap();
    wait_for_status(&fixture.sql, MeetingStatus::Completed).await;

    let collection = embeddings_collection("guild-7");
    let segment_count = fixture
        .vector
        .count_for_meeting(&collection, MEETING_ID)
        .await
        .unwrap();
    let summary_count = fixture
        .vector
        .count_for_meeting(SUMMARIES_COLLECTION, MEETING_ID)
        .await
        .unwrap();

    // Run the embed stage a second time over the same inputs.
    let compiled_row = fixture
        .sql
        .get_compiled_transcript_for_meeting(MEETING_ID)
        .await
        .unwrap()
        .unwrap();
    fixture
        .pipeline
        .enqueue_embedding(MEETING_ID, "guild-7", &compiled_row.id, user_ids)
        .await
        .unwrap();

    // Wait for the second embedding job to complete.
    for _ in 0..400 {
        let jobs = fixture.sql.get_jobs_for_meeting(MEETING_ID).await.unwrap();
        let embed_jobs: Vec<_> = jobs
            .iter()
            .filter(|j| j.job_type == JobType::TextEmbedding)
            .collect();
        if embed_jobs.len() == 2 && embed_jobs.iter().all(|j| j.status == JobState::Completed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // Deterministic document ids make the re-run a pure overwrite.
    assert_eq!(
        fixture
            .vector
            .count_for_meeting(&collection, MEETING_ID)
            .await
            .unwrap(),
        segment_count
    );
    assert_eq!(
        fixture
            .vector
            .count_for_meeting(SUMMARIES_COLLECTION, MEETING_ID)
            .await
            .unwrap(),
        summary_count
    );

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn failed_transcription_holds_meeting_and_notifies_requester() {
    // A speech engine that always fails means zero transcripts; the
    // pipeline must not advance past transcription.
    struct DeadEngine;

    #[async_trait]
    impl SpeechEngine for DeadEngine {
        async fn transcribe(&self, _audio_file: &Path) -> Result<SpeechTranscript> {
            Err(anyhow::anyhow!("engine offline"))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let files = FileStore::new(dir.path()).unwrap();
    let sql = SqlStore::in_memory().await.unwrap();
    let vector = Arc::new(InMemoryVectorStore::new());
    let notifier = Arc::new(CountingNotifier::default());

    let pipeline = Pipeline::new(PipelineDeps {
        sql: sql.clone(),
        files: files.clone(),
        vector: vector.clone(),
        llm: Arc::new(ShortSummaryModel),
        speech: Arc::new(DeadEngine),
        embedder: EmbeddingModelHandler::new(Arc::new(UnitVectorBackend)),
        gpu: GpuArbitrator::with_seed(5),
        notifier: notifier.clone(),
        llm_model: "test-model".to_string(),
    });
    pipeline.start().await;

    let fixture = Fixture {
        sql: sql.clone(),
        files,
        vector,
        notifier: notifier.clone(),
        pipeline: pipeline.clone(),
        _dir: dir,
    };
    let (recording_ids, user_ids) = seed_meeting(&fixture).await;

    pipeline
        .enqueue_transcription(MEETING_ID, recording_ids, user_ids)
        .await
        .unwrap();

    // Wait for the transcription job to exhaust its retries and fail.
    for _ in 0..400 {
        let jobs = sql.get_jobs_for_meeting(MEETING_ID).await.unwrap();
        if jobs
            .iter()
            .any(|j| j.job_type == JobType::Transcribing && j.status == JobState::Failed)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let jobs = sql.get_jobs_for_meeting(MEETING_ID).await.unwrap();
    // Only the transcription job exists; compile was never enqueued.
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobState::Failed);
    assert!(jobs[0].error_log.is_some());

    let meeting = sql.get_meeting(MEETING_ID).await.unwrap().unwrap();
    assert_eq!(meeting.status, MeetingStatus::Transcribing);

    assert_eq!(
        *notifier.failures.lock(),
        vec![(MEETING_ID.to_string(), JobType::Transcribing)]
    );
    assert!(notifier.completions.lock().is_empty());

    pipeline.shutdown().await;
}
