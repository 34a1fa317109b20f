/*
 * Meeting Scribe - SQL Persistence
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

//! SQLite-backed persistence for meetings, recordings, transcripts, job
//! status rows and chat conversations. Enum columns store their string
//! values; participant lists are stored as JSON text.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::types::{
    CompiledTranscriptRow, JobState, JobStatusRow, JobType, Meeting, MeetingStatus,
    PersistentRecording, TempRecording, TranscodeStatus, UserTranscriptRow,
};

const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS meetings (
    id TEXT PRIMARY KEY,
    guild_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    requested_by TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT NOT NULL,
    participants TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_meetings_guild ON meetings (guild_id);

CREATE TABLE IF NOT EXISTS temp_recordings (
    id TEXT PRIMARY KEY,
    meeting_id TEXT NOT NULL REFERENCES meetings (id),
    user_id TEXT NOT NULL,
    chunk_idx INTEGER NOT NULL,
    start_timestamp_ms INTEGER NOT NULL,
    filename TEXT NOT NULL,
    transcode_status TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_temp_recordings_meeting ON temp_recordings (meeting_id);

CREATE TABLE IF NOT EXISTS recordings (
    id TEXT PRIMARY KEY,
    meeting_id TEXT NOT NULL REFERENCES meetings (id),
    user_id TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    sha256 TEXT NOT NULL,
    filename TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_recordings_meeting ON recordings (meeting_id);

CREATE TABLE IF NOT EXISTS user_transcripts (
    id TEXT PRIMARY KEY,
    meeting_id TEXT NOT NULL REFERENCES meetings (id),
    user_id TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    filename TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_user_transcripts_meeting ON user_transcripts (meeting_id);

CREATE TABLE IF NOT EXISTS compiled_transcripts (
    id TEXT PRIMARY KEY,
    meeting_id TEXT NOT NULL REFERENCES meetings (id),
    sha256 TEXT NOT NULL,
    filename TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_compiled_transcripts_meeting ON compiled_transcripts (meeting_id);

CREATE TABLE IF NOT EXISTS jobs_status (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    meeting_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    status TEXT NOT NULL,
    error_log TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_status_meeting ON jobs_status (meeting_id);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    guild_id TEXT,
    requesting_user_id TEXT,
    conversation_file TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Connect to the given SQLite database, creating it if missing, and
    /// run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database. A single connection keeps every query
    /// on the same memory instance.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATIONS)
            .execute(&self.pool)
            .await
            .context("Failed to run SQL migrations")?;
        Ok(())
    }

    // -------------------------------------------------------------- //
    // Meetings
    // -------------------------------------------------------------- //

    pub async fn insert_meeting(&self, meeting: &Meeting) -> Result<()> {
        sqlx::query(
            "INSERT INTO meetings \
             (id, guild_id, channel_id, requested_by, started_at, ended_at, status, participants) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&meeting.id)
        .bind(&meeting.guild_id)
        .bind(&meeting.channel_id)
        .bind(&meeting.requested_by)
        .bind(meeting.started_at)
        .bind(meeting.ended_at)
        .bind(meeting.status.to_string())
        .bind(serde_json::to_string(&meeting.participants)?)
        .execute(&self.pool)
        .await
        .context("Failed to insert meeting")?;
        Ok(())
    }

    pub async fn get_meeting(&self, meeting_id: &str) -> Result<Option<Meeting>> {
        let row = sqlx::query("SELECT * FROM meetings WHERE id = ?")
            .bind(meeting_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query meeting")?;
        row.map(map_meeting).transpose()
    }

    pub async fn update_meeting_status(
        &self,
        meeting_id: &str,
        status: MeetingStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE meetings SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(meeting_id)
            .execute(&self.pool)
            .await
            .context("Failed to update meeting status")?;
        Ok(())
    }

    pub async fn update_meeting_ended(
        &self,
        meeting_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE meetings SET ended_at = ? WHERE id = ?")
            .bind(ended_at)
            .bind(meeting_id)
            .execute(&self.pool)
            .await
            .context("Failed to update meeting end time")?;
        Ok(())
    }

    pub async fn update_meeting_participants(
        &self,
        meeting_id: &str,
        participants: &[String],
    ) -> Result<()> {
        sqlx::query("UPDATE meetings SET participants = ? WHERE id = ?")
            .bind(serde_json::to_string(participants)?)
            .bind(meeting_id)
            .execute(&self.pool)
            .await
            .context("Failed to update meeting participants")?;
        Ok(())
    }

    // -------------------------------------------------------------- //
    // Temp recordings
    // -------------------------------------------------------------- //

    pub async fn insert_temp_recording(&self, recording: &TempRecording) -> Result<()> {
        sqlx::query(
            "INSERT INTO temp_recordings \
             (id, meeting_id, user_id, chunk_idx, start_timestamp_ms, filename, transcode_status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&recording.id)
        .bind(&recording.meeting_id)
        .bind(&recording.user_id)
        .bind(recording.chunk_idx as i64)
        .bind(recording.start_timestamp_ms as i64)
        .bind(&recording.filename)
        .bind(recording.transcode_status.to_string())
        .bind(recording.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert temp recording")?;
        Ok(())
    }

    pub async fn update_temp_recording_status(
        &self,
        temp_recording_id: &str,
        status: TranscodeStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE temp_recordings SET transcode_status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(temp_recording_id)
            .execute(&self.pool)
            .await
            .context("Failed to update transcode status")?;
        Ok(())
    }

    pub async fn get_temp_recordings_for_meeting(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<TempRecording>> {
        let rows = sqlx::query(
            "SELECT * FROM temp_recordings WHERE meeting_id = ? ORDER BY user_id, chunk_idx",
        )
        .bind(meeting_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query temp recordings")?;
        rows.into_iter().map(map_temp_recording).collect()
    }

    pub async fn get_temp_recordings_for_user_in_meeting(
        &self,
        meeting_id: &str,
        user_id: &str,
    ) -> Result<Vec<TempRecording>> {
        let rows = sqlx::query(
            "SELECT * FROM temp_recordings WHERE meeting_id = ? AND user_id = ? ORDER BY chunk_idx",
        )
        .bind(meeting_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query user temp recordings")?;
        rows.into_iter().map(map_temp_recording).collect()
    }

    pub async fn delete_temp_recordings(&self, temp_recording_ids: &[String]) -> Result<()> {
        for id in temp_recording_ids {
            sqlx::query("DELETE FROM temp_recordings WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .context("Failed to delete temp recording")?;
        }
        Ok(())
    }

    /// Temp recordings older than the cutoff that already reached a
    /// terminal transcode status, eligible for TTL cleanup.
    pub async fn get_expired_temp_recordings(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TempRecording>> {
        let rows = sqlx::query(
            "SELECT * FROM temp_recordings \
             WHERE created_at < ? AND transcode_status IN ('done', 'failed')",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query expired temp recordings")?;
        rows.into_iter().map(map_temp_recording).collect()
    }

    // -------------------------------------------------------------- //
    // Persistent recordings
    // -------------------------------------------------------------- //

    pub async fn insert_persistent_recording(
        &self,
        recording: &PersistentRecording,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO recordings \
             (id, meeting_id, user_id, duration_ms, sha256, filename, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&recording.id)
        .bind(&recording.meeting_id)
        .bind(&recording.user_id)
        .bind(recording.duration_ms as i64)
        .bind(&recording.sha256)
        .bind(&recording.filename)
        .bind(recording.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert persistent recording")?;
        Ok(())
    }

    pub async fn get_recording_by_id(
        &self,
        recording_id: &str,
    ) -> Result<Option<PersistentRecording>> {
        let row = sqlx::query("SELECT * FROM recordings WHERE id = ?")
            .bind(recording_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query recording")?;
        row.map(map_persistent_recording).transpose()
    }

    pub async fn get_recordings_for_meeting(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<PersistentRecording>> {
        let rows = sqlx::query("SELECT * FROM recordings WHERE meeting_id = ? ORDER BY user_id")
            .bind(meeting_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query recordings")?;
        rows.into_iter().map(map_persistent_recording).collect()
    }

    // -------------------------------------------------------------- //
    // Transcripts
    // -------------------------------------------------------------- //

    pub async fn insert_user_transcript(&self, transcript: &UserTranscriptRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_transcripts (id, meeting_id, user_id, sha256, filename, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&transcript.id)
        .bind(&transcript.meeting_id)
        .bind(&transcript.user_id)
        .bind(&transcript.sha256)
        .bind(&transcript.filename)
        .bind(transcript.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert user transcript")?;
        Ok(())
    }

    pub async fn get_user_transcripts_for_meeting(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<UserTranscriptRow>> {
        let rows =
            sqlx::query("SELECT * FROM user_transcripts WHERE meeting_id = ? ORDER BY user_id")
                .bind(meeting_id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to query user transcripts")?;
        rows.into_iter().map(map_user_transcript).collect()
    }

    pub async fn insert_compiled_transcript(
        &self,
        transcript: &CompiledTranscriptRow,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO compiled_transcripts (id, meeting_id, sha256, filename, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&transcript.id)
        .bind(&transcript.meeting_id)
        .bind(&transcript.sha256)
        .bind(&transcript.filename)
        .bind(transcript.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert compiled transcript")?;
        Ok(())
    }

    pub async fn get_compiled_transcript_for_meeting(
        &self,
        meeting_id: &str,
    ) -> Result<Option<CompiledTranscriptRow>> {
        let row = sqlx::query(
            "SELECT * FROM compiled_transcripts WHERE meeting_id = ? \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(meeting_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query compiled transcript")?;
        row.map(map_compiled_transcript).transpose()
    }

    // -------------------------------------------------------------- //
    // Job status
    // -------------------------------------------------------------- //

    pub async fn create_job_status(
        &self,
        job_id: &str,
        job_type: JobType,
        meeting_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs_status (id, type, meeting_id, created_at, status) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(job_type.to_string())
        .bind(meeting_id)
        .bind(created_at)
        .bind(JobState::Pending.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to create job status row")?;
        Ok(())
    }

    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobState,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        error_log: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs_status SET status = ?, started_at = ?, finished_at = ?, error_log = ? \
             WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(started_at)
        .bind(finished_at)
        .bind(error_log)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("Failed to update job status row")?;
        Ok(())
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<JobStatusRow>> {
        let row = sqlx::query("SELECT * FROM jobs_status WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query job status")?;
        row.map(map_job_status).transpose()
    }

    pub async fn get_jobs_for_meeting(&self, meeting_id: &str) -> Result<Vec<JobStatusRow>> {
        let rows =
            sqlx::query("SELECT * FROM jobs_status WHERE meeting_id = ? ORDER BY created_at")
                .bind(meeting_id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to query jobs for meeting")?;
        rows.into_iter().map(map_job_status).collect()
    }

    pub async fn count_meetings(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM meetings")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count meetings")?;
        Ok(row.get("n"))
    }

    pub async fn count_jobs_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs_status GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count jobs")?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("status"), r.get("n")))
            .collect())
    }

    // -------------------------------------------------------------- //
    // Conversations
    // -------------------------------------------------------------- //

    pub async fn insert_conversation(
        &self,
        conversation_id: &str,
        guild_id: Option<&str>,
        requesting_user_id: Option<&str>,
        conversation_file: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations \
             (id, guild_id, requesting_user_id, conversation_file, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(guild_id)
        .bind(requesting_user_id)
        .bind(conversation_file)
        .bind(created_at)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert conversation")?;
        Ok(())
    }

    pub async fn touch_conversation(
        &self,
        conversation_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(updated_at)
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .context("Failed to update conversation")?;
        Ok(())
    }

    pub async fn get_conversation_file(&self, conversation_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT conversation_file FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query conversation")?;
        Ok(row.map(|r| r.get::<String, _>("conversation_file")))
    }
}

// -------------------------------------------------------------- //
// Row mapping
// -------------------------------------------------------------- //

fn map_meeting(row: SqliteRow) -> Result<Meeting> {
    let participants: Vec<String> =
        serde_json::from_str(&row.try_get::<String, _>("participants")?)
            .context("Malformed participants JSON")?;
    Ok(Meeting {
        id: row.try_get("id")?,
        guild_id: row.try_get("guild_id")?,
        channel_id: row.try_get("channel_id")?,
        requested_by: row.try_get("requested_by")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        participants,
    })
}

fn map_temp_recording(row: SqliteRow) -> Result<TempRecording> {
    Ok(TempRecording {
        id: row.try_get("id")?,
        meeting_id: row.try_get("meeting_id")?,
        user_id: row.try_get("user_id")?,
        chunk_idx: row.try_get::<i64, _>("chunk_idx")? as u32,
        start_timestamp_ms: row.try_get::<i64, _>("start_timestamp_ms")? as u64,
        filename: row.try_get("filename")?,
        transcode_status: row.try_get::<String, _>("transcode_status")?.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_persistent_recording(row: SqliteRow) -> Result<PersistentRecording> {
    Ok(PersistentRecording {
        id: row.try_get("id")?,
        meeting_id: row.try_get("meeting_id")?,
        user_id: row.try_get("user_id")?,
        duration_ms: row.try_get::<i64, _>("duration_ms")? as u64,
        sha256: row.try_get("sha256")?,
        filename: row.try_get("filename")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_user_transcript(row: SqliteRow) -> Result<UserTranscriptRow> {
    Ok(UserTranscriptRow {
        id: row.try_get("id")?,
        meeting_id: row.try_get("meeting_id")?,
        user_id: row.try_get("user_id")?,
        sha256: row.try_get("sha256")?,
        filename: row.try_get("filename")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_compiled_transcript(row: SqliteRow) -> Result<CompiledTranscriptRow> {
    Ok(CompiledTranscriptRow {
        id: row.try_get("id")?,
        meeting_id: row.try_get("meeting_id")?,
        sha256: row.try_get("sha256")?,
        filename: row.try_get("filename")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_job_status(row: SqliteRow) -> Result<JobStatusRow> {
    Ok(JobStatusRow {
        id: row.try_get("id")?,
        job_type: row.try_get::<String, _>("type")?.parse()?,
        meeting_id: row.try_get("meeting_id")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        error_log: row.try_get("error_log")?,
    })
}
