/*
 * Meeting Scribe - Recording Session Manager
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

//! Owns the channel → session mapping and the stop sequence: final flush,
//! chunk-count equalization, transcode draining, promotion of temp chunks
//! into persistent recordings and handoff to the processing pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::audio::WINDOW_MS;
use crate::recorder::session::{ChunkerSnapshot, RecordingSession};
use crate::storage::{FileStore, SqlStore};
use crate::transcode::TranscodeSink;
use crate::types::{Meeting, MeetingStatus, PersistentRecording, TranscodeStatus};
use crate::util::{generate_short_id, sha256_of_file};

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub flush_interval: Duration,
    pub transcode_timeout: Duration,
    pub cleanup_interval: Duration,
    pub temp_recording_ttl: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            transcode_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(3600),
            temp_recording_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Everything the pipeline needs to pick the meeting up after audio stops.
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub meeting_id: String,
    pub guild_id: String,
    pub recording_ids: Vec<String>,
    pub user_ids: Vec<String>,
}

/// Invoked after a successful stop so the orchestrator can enqueue the
/// transcription stage. Wired externally; the manager never reaches into
/// the pipeline itself.
pub type StopHandoff = Arc<dyn Fn(StopOutcome) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub meeting_id: String,
    pub channel_id: String,
    pub guild_id: String,
    pub chunker: ChunkerSnapshot,
    pub chunk_status_counts: HashMap<String, usize>,
}

struct ActiveSession {
    session: Arc<RecordingSession>,
    flusher_token: CancellationToken,
    flusher_handle: Option<JoinHandle<()>>,
}

pub struct SessionManager {
    config: SessionManagerConfig,
    sql: SqlStore,
    files: FileStore,
    transcode: Arc<dyn TranscodeSink>,
    sessions: RwLock<HashMap<String, ActiveSession>>,
    handoff: parking_lot::RwLock<Option<StopHandoff>>,
    cleanup_token: CancellationToken,
}

impl SessionManager {
    pub fn new(
        config: SessionManagerConfig,
        sql: SqlStore,
        files: FileStore,
        transcode: Arc<dyn TranscodeSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sql,
            files,
            transcode,
            sessions: RwLock::new(HashMap::new()),
            handoff: parking_lot::RwLock::new(None),
            cleanup_token: CancellationToken::new(),
        })
    }

    /// Wire the post-stop handoff. Called once by the service wiring.
    pub fn set_stop_handoff(&self, handoff: StopHandoff) {
        *self.handoff.write() = Some(handoff);
    }

    // -------------------------------------------------------------- //
    // Session lifecycle
    // -------------------------------------------------------------- //

    /// Open a recording session for a voice channel. Inserts the meeting
    /// row and starts the chunker's periodic flusher.
    pub async fn start_session(
        self: &Arc<Self>,
        channel_id: &str,
        meeting_id: Option<String>,
        requested_by: &str,
        guild_id: &str,
    ) -> Result<String> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(channel_id) {
            return Err(anyhow::anyhow!(
                "Recording session already exists for channel {}",
                channel_id
            ));
        }

        let meeting_id = meeting_id.unwrap_or_else(generate_short_id);

        let meeting = Meeting {
            id: meeting_id.clone(),
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            requested_by: requested_by.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            status: MeetingStatus::Recording,
            participants: vec![],
        };
        self.sql
            .insert_meeting(&meeting)
            .await
            .context("Failed to insert meeting row")?;

        let session = Arc::new(RecordingSession::new(
            meeting_id.clone(),
            guild_id.to_string(),
            channel_id.to_string(),
            self.sql.clone(),
            self.files.clone(),
            self.transcode.clone(),
        ));

        let flusher_token = CancellationToken::new();
        let flusher_handle = self.spawn_flusher(session.clone(), flusher_token.clone());

        sessions.insert(
            channel_id.to_string(),
            ActiveSession {
                session,
                flusher_token,
                flusher_handle: Some(flusher_handle),
            },
        );

        tracing::info!(
            "Started recording session for meeting {} in channel {}",
            meeting_id,
            channel_id
        );
        Ok(meeting_id)
    }

    fn spawn_flusher(
        &self,
        session: Arc<RecordingSession>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let interval = self.config.flush_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(interval) => session.flush_full_windows().await,
                }
            }
            tracing::debug!("Flusher stopped for meeting {}", session.meeting_id);
        })
    }

    /// Feed a decoded voice packet into the channel's session, if any.
    pub async fn push_voice_packet(
        &self,
        channel_id: &str,
        user_id: &str,
        pcm: &[u8],
    ) -> Result<()> {
        let sessions = self.sessions.read().await;
        match sessions.get(channel_id) {
            Some(active) => active.session.push_voice_packet(user_id, pcm).await,
            None => Ok(()),
        }
    }

    /// Stop a channel's session: run the chunker stop sequence, drain
    /// transcodes, promote chunks into persistent recordings and hand off
    /// to the pipeline.
    pub async fn stop_session(self: &Arc<Self>, channel_id: &str) -> Result<Option<StopOutcome>> {
        let active = {
            let mut sessions = self.sessions.write().await;
            match sessions.remove(channel_id) {
                Some(active) => active,
                None => {
                    tracing::warn!("No active session for channel {}", channel_id);
                    return Ok(None);
                }
            }
        };

        active.flusher_token.cancel();
        if let Some(handle) = active.flusher_handle {
            let _ = handle.await;
        }

        let session = active.session;
        let meeting_id = session.meeting_id.clone();
        let guild_id = session.guild_id.clone();

        let mut user_ids = session.finalize().await?;
        user_ids.sort();

        self.sql
            .update_meeting_participants(&meeting_id, &user_ids)
            .await?;
        self.sql.update_meeting_ended(&meeting_id, Utc::now()).await?;
        self.sql
            .update_meeting_status(&meeting_id, MeetingStatus::Processing)
            .await?;

        let drained = self
            .wait_for_pending_transcodes(&meeting_id, self.config.transcode_timeout)
            .await?;
        if !drained {
            tracing::warn!(
                "Timeout waiting for transcodes on meeting {}; promoting completed chunks only",
                meeting_id
            );
        }

        let mut recording_ids = Vec::new();
        for user_id in &user_ids {
            match self.promote_user_chunks(&meeting_id, user_id).await {
                Ok(Some(recording_id)) => recording_ids.push(recording_id),
                Ok(None) => tracing::warn!(
                    "No promotable chunks for user {} in meeting {}",
                    user_id,
                    meeting_id
                ),
                Err(e) => tracing::error!(
                    "Failed to promote chunks for user {} in meeting {}: {:#}",
                    user_id,
                    meeting_id,
                    e
                ),
            }
        }

        let outcome = StopOutcome {
            meeting_id: meeting_id.clone(),
            guild_id,
            recording_ids,
            user_ids,
        };

        tracing::info!(
            "Stopped recording session for meeting {}: {} recordings promoted",
            meeting_id,
            outcome.recording_ids.len()
        );

        let handoff = self.handoff.read().clone();
        if let Some(handoff) = handoff {
            handoff(outcome.clone()).await;
        }

        Ok(Some(outcome))
    }

    /// Halt the flush loop and ingress without tearing down state.
    pub async fn pause_session(&self, channel_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let Some(active) = sessions.get_mut(channel_id) else {
            return Ok(false);
        };
        active.flusher_token.cancel();
        if let Some(handle) = active.flusher_handle.take() {
            let _ = handle.await;
        }
        active.session.pause().await;
        tracing::info!("Paused recording session in channel {}", channel_id);
        Ok(true)
    }

    pub async fn resume_session(self: &Arc<Self>, channel_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let Some(active) = sessions.get_mut(channel_id) else {
            return Ok(false);
        };
        active.session.resume().await;
        let token = CancellationToken::new();
        active.flusher_token = token.clone();
        active.flusher_handle = Some(self.spawn_flusher(active.session.clone(), token));
        tracing::info!("Resumed recording session in channel {}", channel_id);
        Ok(true)
    }

    // -------------------------------------------------------------- //
    // Promotion
    // -------------------------------------------------------------- //

    /// Poll until every temp recording of the meeting reaches a terminal
    /// transcode status, with 1s → 10s exponential backoff. Returns false
    /// on timeout.
    async fn wait_for_pending_transcodes(
        &self,
        meeting_id: &str,
        max_wait: Duration,
    ) -> Result<bool> {
        let started = tokio::time::Instant::now();
        let mut poll_interval = Duration::from_secs(1);
        let max_poll_interval = Duration::from_secs(10);

        loop {
            let chunks = self.sql.get_temp_recordings_for_meeting(meeting_id).await?;
            let pending = chunks
                .iter()
                .filter(|c| {
                    matches!(
                        c.transcode_status,
                        TranscodeStatus::Queued | TranscodeStatus::InProgress
                    )
                })
                .count();

            if pending == 0 {
                return Ok(true);
            }
            if started.elapsed() > max_wait {
                return Ok(false);
            }

            tracing::debug!(
                "Waiting for {} pending transcodes on meeting {}",
                pending,
                meeting_id
            );
            sleep(poll_interval).await;
            poll_interval = (poll_interval.mul_f64(1.5)).min(max_poll_interval);
        }
    }

    /// Concatenate one user's transcoded chunks, in chunk order, into a
    /// single persistent recording. Failed chunks are skipped; their rows
    /// stay behind for the TTL cleanup.
    async fn promote_user_chunks(
        &self,
        meeting_id: &str,
        user_id: &str,
    ) -> Result<Option<String>> {
        let chunks = self
            .sql
            .get_temp_recordings_for_user_in_meeting(meeting_id, user_id)
            .await?;
        if chunks.is_empty() {
            return Ok(None);
        }

        let done: Vec<_> = chunks
            .iter()
            .filter(|c| c.transcode_status == TranscodeStatus::Done)
            .collect();
        if done.is_empty() {
            return Ok(None);
        }
        if done.len() < chunks.len() {
            tracing::warn!(
                "Promoting {}/{} chunks for user {} in meeting {} (rest not transcoded)",
                done.len(),
                chunks.len(),
                user_id,
                meeting_id
            );
        }

        let mp3_inputs: Vec<PathBuf> = done
            .iter()
            .map(|c| {
                self.files
                    .temp_recording_path(&c.filename.replace(".pcm", ".mp3"))
            })
            .collect();

        let recording_filename = format!("{}_{}.mp3", meeting_id, user_id);
        let output = self.files.persistent_recording_path(&recording_filename);
        self.files
            .concatenate(&mp3_inputs, &output)
            .await
            .context("Failed to concatenate transcoded chunks")?;

        let recording = PersistentRecording {
            id: generate_short_id(),
            meeting_id: meeting_id.to_string(),
            user_id: user_id.to_string(),
            duration_ms: done.len() as u64 * WINDOW_MS,
            sha256: sha256_of_file(&output).await?,
            filename: recording_filename,
            created_at: Utc::now(),
        };
        self.sql.insert_persistent_recording(&recording).await?;

        // Promoted chunk rows and their files are no longer needed.
        let done_ids: Vec<String> = done.iter().map(|c| c.id.clone()).collect();
        for chunk in &done {
            self.files
                .remove_if_exists(&self.files.temp_recording_path(&chunk.filename))
                .await;
            self.files
                .remove_if_exists(
                    &self
                        .files
                        .temp_recording_path(&chunk.filename.replace(".pcm", ".mp3")),
                )
                .await;
        }
        self.sql.delete_temp_recordings(&done_ids).await?;

        tracing::info!(
            "Promoted {} chunks into recording {} for user {} in meeting {}",
            done_ids.len(),
            recording.id,
            user_id,
            meeting_id
        );
        Ok(Some(recording.id))
    }

    // -------------------------------------------------------------- //
    // Introspection
    // -------------------------------------------------------------- //

    pub async fn get_session_status(&self, channel_id: &str) -> Result<Option<SessionStatus>> {
        let sessions = self.sessions.read().await;
        let Some(active) = sessions.get(channel_id) else {
            return Ok(None);
        };
        let session = &active.session;

        let chunks = self
            .sql
            .get_temp_recordings_for_meeting(&session.meeting_id)
            .await?;
        let mut chunk_status_counts: HashMap<String, usize> = HashMap::new();
        for chunk in chunks {
            *chunk_status_counts
                .entry(chunk.transcode_status.to_string())
                .or_default() += 1;
        }

        Ok(Some(SessionStatus {
            meeting_id: session.meeting_id.clone(),
            channel_id: session.channel_id.clone(),
            guild_id: session.guild_id.clone(),
            chunker: session.snapshot().await,
            chunk_status_counts,
        }))
    }

    pub async fn list_active_sessions(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    // -------------------------------------------------------------- //
    // TTL cleanup
    // -------------------------------------------------------------- //

    /// Spawn the periodic cleanup of stale temp recordings.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        let token = self.cleanup_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(manager.config.cleanup_interval) => {
                        if let Err(e) = manager.run_cleanup_once().await {
                            tracing::error!("Temp recording cleanup failed: {:#}", e);
                        }
                    }
                }
            }
        })
    }

    /// Delete temp recordings past the TTL that reached a terminal
    /// transcode status, together with their files.
    pub async fn run_cleanup_once(&self) -> Result<usize> {
        let ttl = chrono::Duration::from_std(self.config.temp_recording_ttl)
            .context("Invalid TTL duration")?;
        let cutoff = Utc::now() - ttl;

        let expired = self.sql.get_expired_temp_recordings(cutoff).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        for chunk in &expired {
            self.files
                .remove_if_exists(&self.files.temp_recording_path(&chunk.filename))
                .await;
            self.files
                .remove_if_exists(
                    &self
                        .files
                        .temp_recording_path(&chunk.filename.replace(".pcm", ".mp3")),
                )
                .await;
        }

        let ids: Vec<String> = expired.iter().map(|c| c.id.clone()).collect();
        self.sql.delete_temp_recordings(&ids).await?;

        tracing::info!("Cleaned up {} expired temp recordings", ids.len());
        Ok(ids.len())
    }

    /// Stop all sessions and the cleanup task.
    pub async fn shutdown(self: &Arc<Self>) {
        self.cleanup_token.cancel();
        let channels = self.list_active_sessions().await;
        for channel in channels {
            if let Err(e) = self.stop_session(&channel).await {
                tracing::error!("Failed to stop session in channel {}: {:#}", channel, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio;
    use crate::transcode::TranscodeRequest;
    use async_trait::async_trait;

    /// Sink that "transcodes" instantly: copies the PCM bytes to the MP3
    /// path and marks the chunk done.
    struct InstantSink {
        sql: SqlStore,
    }

    #[async_trait]
    impl TranscodeSink for InstantSink {
        async fn enqueue(&self, request: TranscodeRequest) -> Result<()> {
            let data = tokio::fs::read(&request.pcm_path).await?;
            tokio::fs::write(&request.mp3_path, &data).await?;
            self.sql
                .update_temp_recording_status(&request.temp_recording_id, TranscodeStatus::Done)
                .await?;
            Ok(())
        }
    }

    /// Sink that marks chunks done only after a delay, from a background
    /// task, to exercise the stop-path drain.
    struct DelayedSink {
        sql: SqlStore,
        delay: Duration,
    }

    #[async_trait]
    impl TranscodeSink for DelayedSink {
        async fn enqueue(&self, request: TranscodeRequest) -> Result<()> {
            let sql = self.sql.clone();
            let delay = self.delay;
            tokio::spawn(async move {
                sleep(delay).await;
                let data = tokio::fs::read(&request.pcm_path).await.unwrap_or_default();
                let _ = tokio::fs::write(&request.mp3_path, &data).await;
                let _ = sql
                    .update_temp_recording_status(
                        &request.temp_recording_id,
                        TranscodeStatus::Done,
                    )
                    .await;
            });
            Ok(())
        }
    }

    /// Sink that always fails the chunk.
    struct FailingSink {
        sql: SqlStore,
    }

    #[async_trait]
    impl TranscodeSink for FailingSink {
        async fn enqueue(&self, request: TranscodeRequest) -> Result<()> {
            self.sql
                .update_temp_recording_status(&request.temp_recording_id, TranscodeStatus::Failed)
                .await?;
            Ok(())
        }
    }

    fn test_config() -> SessionManagerConfig {
        SessionManagerConfig {
            flush_interval: Duration::from_millis(50),
            transcode_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn fixture(
        sink: impl Fn(SqlStore) -> Arc<dyn TranscodeSink>,
    ) -> (Arc<SessionManager>, SqlStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path()).unwrap();
        let sql = SqlStore::in_memory().await.unwrap();
        let manager = SessionManager::new(test_config(), sql.clone(), files, sink(sql.clone()));
        (manager, sql, dir)
    }

    fn packet(ms: u64) -> Vec<u8> {
        vec![1u8; audio::pcm_bytes_for_ms(ms)]
    }

    #[tokio::test]
    async fn test_start_stop_promotes_recordings() {
        let (manager, sql, _dir) =
            fixture(|sql| Arc::new(InstantSink { sql }) as Arc<dyn TranscodeSink>).await;

        let meeting_id = manager
            .start_session("channel-1", None, "requester", "guild-1")
            .await
            .unwrap();

        let meeting = sql.get_meeting(&meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Recording);

        // 35 seconds of speech: one full window plus a partial.
        for _ in 0..35 {
            manager
                .push_voice_packet("channel-1", "alice", &packet(1000))
                .await
                .unwrap();
        }

        let outcome = manager.stop_session("channel-1").await.unwrap().unwrap();
        assert_eq!(outcome.meeting_id, meeting_id);
        assert_eq!(outcome.user_ids, vec!["alice"]);
        assert_eq!(outcome.recording_ids.len(), 1);

        let recording = sql
            .get_recording_by_id(&outcome.recording_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recording.user_id, "alice");
        assert_eq!(recording.duration_ms, 2 * WINDOW_MS);
        assert_eq!(recording.sha256.len(), 64);

        // Promoted temp rows are gone.
        assert!(sql
            .get_temp_recordings_for_meeting(&meeting_id)
            .await
            .unwrap()
            .is_empty());

        let meeting = sql.get_meeting(&meeting_id).await.unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Processing);
        assert_eq!(meeting.participants, vec!["alice"]);
        assert!(meeting.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_stop_waits_for_delayed_transcodes() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path()).unwrap();
        let sql = SqlStore::in_memory().await.unwrap();
        let sink = Arc::new(DelayedSink {
            sql: sql.clone(),
            delay: Duration::from_millis(1500),
        });
        let manager = SessionManager::new(test_config(), sql.clone(), files, sink);

        manager
            .start_session("channel-1", None, "requester", "guild-1")
            .await
            .unwrap();
        for _ in 0..10 {
            manager
                .push_voice_packet("channel-1", "alice", &packet(1000))
                .await
                .unwrap();
        }

        let outcome = manager.stop_session("channel-1").await.unwrap().unwrap();
        // The stop path blocked until the delayed transcode finished and
        // still promoted the chunk.
        assert_eq!(outcome.recording_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_transcodes_are_skipped_from_promotion() {
        let (manager, sql, _dir) =
            fixture(|sql| Arc::new(FailingSink { sql }) as Arc<dyn TranscodeSink>).await;

        let meeting_id = manager
            .start_session("channel-1", None, "requester", "guild-1")
            .await
            .unwrap();
        for _ in 0..35 {
            manager
                .push_voice_packet("channel-1", "alice", &packet(1000))
                .await
                .unwrap();
        }

        let outcome = manager.stop_session("channel-1").await.unwrap().unwrap();
        assert!(outcome.recording_ids.is_empty());

        // Failed chunks remain in SQL for the TTL cleanup.
        let chunks = sql
            .get_temp_recordings_for_meeting(&meeting_id)
            .await
            .unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks
            .iter()
            .all(|c| c.transcode_status == TranscodeStatus::Failed));
    }

    #[tokio::test]
    async fn test_stop_handoff_is_invoked() {
        let (manager, _sql, _dir) =
            fixture(|sql| Arc::new(InstantSink { sql }) as Arc<dyn TranscodeSink>).await;

        let received = Arc::new(parking_lot::Mutex::new(None));
        let sink = received.clone();
        manager.set_stop_handoff(Arc::new(move |outcome: StopOutcome| {
            let sink = sink.clone();
            Box::pin(async move {
                *sink.lock() = Some(outcome);
            })
        }));

        manager
            .start_session("channel-1", None, "requester", "guild-1")
            .await
            .unwrap();
        for _ in 0..5 {
            manager
                .push_voice_packet("channel-1", "alice", &packet(1000))
                .await
                .unwrap();
        }
        manager.stop_session("channel-1").await.unwrap();

        let outcome = received.lock().clone().unwrap();
        assert_eq!(outcome.user_ids, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_double_start_rejected_and_unknown_stop_is_none() {
        let (manager, _sql, _dir) =
            fixture(|sql| Arc::new(InstantSink { sql }) as Arc<dyn TranscodeSink>).await;

        manager
            .start_session("channel-1", None, "requester", "guild-1")
            .await
            .unwrap();
        assert!(manager
            .start_session("channel-1", None, "requester", "guild-1")
            .await
            .is_err());

        assert!(manager.stop_session("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_chunks() {
        let (manager, sql, dir) =
            fixture(|sql| Arc::new(InstantSink { sql }) as Arc<dyn TranscodeSink>).await;

        let meeting = Meeting {
            id: "meet0000000000ff".to_string(),
            guild_id: "g".to_string(),
            channel_id: "c".to_string(),
            requested_by: "r".to_string(),
            started_at: Utc::now(),
            ended_at: None,
            status: MeetingStatus::Completed,
            participants: vec![],
        };
        sql.insert_meeting(&meeting).await.unwrap();

        let filename = "old_chunk.pcm";
        let pcm_path = dir.path().join("recordings").join("temp").join(filename);
        tokio::fs::write(&pcm_path, b"stale").await.unwrap();

        sql.insert_temp_recording(&crate::types::TempRecording {
            id: "temp00000000dead".to_string(),
            meeting_id: meeting.id.clone(),
            user_id: "u".to_string(),
            chunk_idx: 0,
            start_timestamp_ms: 0,
            filename: filename.to_string(),
            transcode_status: TranscodeStatus::Done,
            created_at: Utc::now() - chrono::Duration::hours(48),
        })
        .await
        .unwrap();

        let removed = manager.run_cleanup_once().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!pcm_path.exists());
        assert!(sql
            .get_temp_recordings_for_meeting(&meeting.id)
            .await
            .unwrap()
            .is_empty());
    }
}
