/*
 * Meeting Scribe - Per-User Timeline Chunker
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

//! Converts bursty, gap-prone per-speaker voice packets into strictly
//! frame-aligned 30s windows on a single session timeline.
//!
//! Every speaker's window k covers the identical wall-clock span
//! [k*30s, (k+1)*30s) measured from session start. Gaps between packets
//! are filled with silence rounded up to whole 20ms frames; a speaker's
//! first packet pads from t=0, so late joiners start with a silence run
//! equal to their join delay. At stop, trailing partial windows are padded
//! to full size and every speaker is topped up with silent windows until
//! all chunk counts match.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytes::BytesMut;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::audio::{
    self, is_frame_aligned, pcm_duration_ms, round_gap_to_frames, silence_bytes, WINDOW_BYTES,
    WINDOW_MS,
};
use crate::storage::{FileStore, SqlStore};
use crate::transcode::{TranscodeRequest, TranscodeSink};
use crate::types::{TempRecording, TranscodeStatus};
use crate::util::generate_short_id;

struct UserTimeline {
    buffer: BytesMut,
    chunk_counter: u32,
    /// Milliseconds of this user's timeline covered so far (end of the
    /// last appended packet, relative to session start).
    last_wall_ms: u64,
}

impl UserTimeline {
    fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            chunk_counter: 0,
            // A new speaker's timeline starts at session t=0 so the first
            // gap equals their join delay; this is what keeps chunk counts
            // equal across speakers.
            last_wall_ms: 0,
        }
    }
}

struct SessionState {
    recording: bool,
    shutting_down: bool,
    users: HashMap<String, UserTimeline>,
    max_chunk_idx_seen: Option<u32>,
    temp_recording_ids: Vec<String>,
}

/// Per-user buffer sizes and chunk counters, for introspection.
#[derive(Debug, Clone)]
pub struct ChunkerSnapshot {
    pub recording: bool,
    pub user_buffer_bytes: HashMap<String, usize>,
    pub user_chunk_counts: HashMap<String, u32>,
    pub max_chunk_idx_seen: Option<u32>,
    pub total_chunks: usize,
}

/// One meeting's chunker. Ingress and the stop path are serialized by a
/// single async mutex; the shutdown flag is checked before every append,
/// so no packet lands after the session leaves the recording state.
pub struct RecordingSession {
    pub meeting_id: String,
    pub guild_id: String,
    pub channel_id: String,
    started_at: Instant,
    state: Mutex<SessionState>,
    sql: SqlStore,
    files: FileStore,
    transcode: Arc<dyn TranscodeSink>,
}

impl RecordingSession {
    pub fn new(
        meeting_id: String,
        guild_id: String,
        channel_id: String,
        sql: SqlStore,
        files: FileStore,
        transcode: Arc<dyn TranscodeSink>,
    ) -> Self {
        Self {
            meeting_id,
            guild_id,
            channel_id,
            started_at: Instant::now(),
            state: Mutex::new(SessionState {
                recording: true,
                shutting_down: false,
                users: HashMap::new(),
                max_chunk_idx_seen: None,
                temp_recording_ids: Vec::new(),
            }),
            sql,
            files,
            transcode,
        }
    }

    /// Milliseconds since the session started.
    pub fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Feed one decoded voice packet for a user, stamped with the arrival
    /// time on the session clock.
    pub async fn push_voice_packet(&self, user_id: &str, pcm: &[u8]) -> Result<()> {
        self.ingest_at(user_id, pcm, self.now_ms()).await
    }

    /// Ingress with an explicit arrival time (session-relative ms).
    pub async fn ingest_at(&self, user_id: &str, pcm: &[u8], now_ms: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.recording || state.shutting_down {
            return Ok(());
        }

        // Decoded packets are expected on frame boundaries; a short tail
        // is padded up to the next frame.
        let mut packet = pcm.to_vec();
        if !is_frame_aligned(packet.len()) {
            let padded = packet.len().div_ceil(audio::FRAME_BYTES) * audio::FRAME_BYTES;
            tracing::debug!(
                "Padding unaligned {}-byte packet to {} bytes for user {}",
                packet.len(),
                padded,
                user_id
            );
            packet.resize(padded, 0);
        }

        let duration_ms = pcm_duration_ms(packet.len());
        let packet_start_ms = now_ms.saturating_sub(duration_ms);

        let timeline = state
            .users
            .entry(user_id.to_string())
            .or_insert_with(UserTimeline::new);

        let gap_ms = packet_start_ms.saturating_sub(timeline.last_wall_ms);
        let pad_ms = round_gap_to_frames(gap_ms);
        if pad_ms > 0 {
            timeline.buffer.extend_from_slice(&silence_bytes(pad_ms));
        }
        timeline.buffer.extend_from_slice(&packet);
        timeline.last_wall_ms = packet_start_ms + duration_ms;

        debug_assert!(is_frame_aligned(timeline.buffer.len()));

        self.emit_full_windows_for_user(&mut state, user_id).await;
        Ok(())
    }

    /// Emit every complete window currently buffered, across all users.
    /// Called by the periodic flusher; ingress emits eagerly as well.
    pub async fn flush_full_windows(&self) {
        let mut state = self.state.lock().await;
        if !state.recording {
            return;
        }
        let user_ids: Vec<String> = state.users.keys().cloned().collect();
        for user_id in user_ids {
            self.emit_full_windows_for_user(&mut state, &user_id).await;
        }
    }

    async fn emit_full_windows_for_user(&self, state: &mut SessionState, user_id: &str) {
        loop {
            let ready = state
                .users
                .get(user_id)
                .map(|t| t.buffer.len() >= WINDOW_BYTES)
                .unwrap_or(false);
            if !ready {
                break;
            }
            if let Err(e) = self.emit_window(state, user_id).await {
                // Keep the buffer intact; the next flush retries.
                tracing::error!(
                    "Failed to flush window for user {} in meeting {}: {:#}",
                    user_id,
                    self.meeting_id,
                    e
                );
                break;
            }
        }
    }

    /// Slice one window off the front of the user's buffer, persist it and
    /// hand it to the transcode sink. The buffer is only drained after the
    /// file and SQL row both exist.
    async fn emit_window(&self, state: &mut SessionState, user_id: &str) -> Result<()> {
        let (chunk_idx, window) = {
            let timeline = state
                .users
                .get(user_id)
                .context("Unknown user timeline")?;
            (
                timeline.chunk_counter,
                timeline.buffer[..WINDOW_BYTES].to_vec(),
            )
        };

        let filename = FileStore::chunk_filename(&self.meeting_id, user_id, chunk_idx);
        let pcm_path = self.files.write_temp_pcm(&filename, &window).await?;

        let temp = TempRecording {
            id: generate_short_id(),
            meeting_id: self.meeting_id.clone(),
            user_id: user_id.to_string(),
            chunk_idx,
            start_timestamp_ms: chunk_idx as u64 * WINDOW_MS,
            filename: filename.clone(),
            transcode_status: TranscodeStatus::Queued,
            created_at: Utc::now(),
        };

        if let Err(e) = self.sql.insert_temp_recording(&temp).await {
            // Orphaned PCM files are cleaned when the row insert fails.
            self.files.remove_if_exists(&pcm_path).await;
            return Err(e);
        }

        let timeline = state.users.get_mut(user_id).context("Unknown user timeline")?;
        let _ = timeline.buffer.split_to(WINDOW_BYTES);
        timeline.chunk_counter += 1;
        state.max_chunk_idx_seen = Some(
            state
                .max_chunk_idx_seen
                .map_or(chunk_idx, |m| m.max(chunk_idx)),
        );
        state.temp_recording_ids.push(temp.id.clone());

        tracing::debug!(
            "Emitted chunk {} for user {} in meeting {} ({} bytes)",
            chunk_idx,
            user_id,
            self.meeting_id,
            WINDOW_BYTES
        );

        let mp3_filename = filename.replace(".pcm", ".mp3");
        let request = TranscodeRequest {
            temp_recording_id: temp.id.clone(),
            meeting_id: self.meeting_id.clone(),
            pcm_path,
            mp3_path: self.files.temp_recording_path(&mp3_filename),
        };
        if let Err(e) = self.transcode.enqueue(request).await {
            tracing::error!(
                "Failed to queue transcode for chunk {} of user {}: {:#}",
                chunk_idx,
                user_id,
                e
            );
            if let Err(e) = self
                .sql
                .update_temp_recording_status(&temp.id, TranscodeStatus::Failed)
                .await
            {
                tracing::error!("Failed to mark chunk {} failed: {:#}", temp.id, e);
            }
        }

        Ok(())
    }

    /// Stop ingress, pad trailing partial windows to full size and emit
    /// fully silent windows until every speaker has the same chunk count.
    /// Returns the user ids that ever spoke.
    pub async fn finalize(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.shutting_down = true;
        state.recording = false;

        // Pad and emit trailing partial windows.
        let user_ids: Vec<String> = state.users.keys().cloned().collect();
        for user_id in &user_ids {
            let timeline = state.users.get_mut(user_id).context("Unknown user timeline")?;
            if !timeline.buffer.is_empty() {
                let missing = WINDOW_BYTES - (timeline.buffer.len() % WINDOW_BYTES);
                if missing != WINDOW_BYTES {
                    timeline.buffer.extend_from_slice(&vec![0u8; missing]);
                }
            }
            self.emit_full_windows_for_user(&mut state, user_id).await;
        }

        // Equalize chunk counts: every speaker ends with as many windows
        // as the furthest-ahead speaker.
        let target = state
            .users
            .values()
            .map(|t| t.chunk_counter)
            .max()
            .unwrap_or(0);
        for user_id in &user_ids {
            loop {
                let counter = state
                    .users
                    .get(user_id)
                    .map(|t| t.chunk_counter)
                    .unwrap_or(target);
                if counter >= target {
                    break;
                }
                let timeline = state.users.get_mut(user_id).context("Unknown user timeline")?;
                timeline.buffer.extend_from_slice(&silence_bytes(WINDOW_MS));
                self.emit_window(&mut state, user_id)
                    .await
                    .context("Failed to emit backfill window")?;
            }
        }

        tracing::info!(
            "Finalized chunker for meeting {}: {} users, {} chunks each",
            self.meeting_id,
            user_ids.len(),
            target
        );

        Ok(user_ids)
    }

    /// Halt ingress without tearing down timelines.
    pub async fn pause(&self) {
        self.state.lock().await.recording = false;
    }

    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        if !state.shutting_down {
            state.recording = true;
        }
    }

    pub async fn is_recording(&self) -> bool {
        self.state.lock().await.recording
    }

    pub async fn snapshot(&self) -> ChunkerSnapshot {
        let state = self.state.lock().await;
        ChunkerSnapshot {
            recording: state.recording,
            user_buffer_bytes: state
                .users
                .iter()
                .map(|(id, t)| (id.clone(), t.buffer.len()))
                .collect(),
            user_chunk_counts: state
                .users
                .iter()
                .map(|(id, t)| (id.clone(), t.chunk_counter))
                .collect(),
            max_chunk_idx_seen: state.max_chunk_idx_seen,
            total_chunks: state.temp_recording_ids.len(),
        }
    }
}
