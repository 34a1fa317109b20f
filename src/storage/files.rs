/*
 * Meeting Scribe - Recording & Transcript File Storage
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

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// Storage layout rooted at one data directory:
///
/// ```text
/// data/
///   recordings/temp/          PCM chunks + transcoded MP3s
///   recordings/storage/       promoted persistent recordings
///   transcriptions/storage/   per-user transcript JSON
///   transcriptions/compilations/storage/   compiled transcript JSON
///   conversations/            chat history JSON
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    temp_recordings: PathBuf,
    persistent_recordings: PathBuf,
    transcripts: PathBuf,
    compilations: PathBuf,
    conversations: PathBuf,
}

impl FileStore {
    pub fn new(data_root: &Path) -> Result<Self> {
        let store = Self {
            temp_recordings: data_root.join("recordings").join("temp"),
            persistent_recordings: data_root.join("recordings").join("storage"),
            transcripts: data_root.join("transcriptions").join("storage"),
            compilations: data_root
                .join("transcriptions")
                .join("compilations")
                .join("storage"),
            conversations: data_root.join("conversations"),
        };

        for dir in [
            &store.temp_recordings,
            &store.persistent_recordings,
            &store.transcripts,
            &store.compilations,
            &store.conversations,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create storage directory {}", dir.display()))?;
        }

        Ok(store)
    }

    pub fn temp_recording_path(&self, filename: &str) -> PathBuf {
        self.temp_recordings.join(filename)
    }

    pub fn persistent_recording_path(&self, filename: &str) -> PathBuf {
        self.persistent_recordings.join(filename)
    }

    pub fn transcript_path(&self, filename: &str) -> PathBuf {
        self.transcripts.join(filename)
    }

    pub fn compilation_path(&self, filename: &str) -> PathBuf {
        self.compilations.join(filename)
    }

    pub fn conversation_path(&self, filename: &str) -> PathBuf {
        self.conversations.join(filename)
    }

    /// Filename of a stored PCM chunk: 4-digit zero-padded sequence.
    pub fn chunk_filename(meeting_id: &str, user_id: &str, chunk_idx: u32) -> String {
        format!("{}_{}_chunk_{:04}.pcm", meeting_id, user_id, chunk_idx)
    }

    pub fn user_transcript_filename(meeting_id: &str, user_id: &str, transcript_id: &str) -> String {
        format!("transcript_{}_{}_{}.json", meeting_id, user_id, transcript_id)
    }

    pub fn compiled_transcript_filename(meeting_id: &str) -> String {
        format!("transcript_{}.json", meeting_id)
    }

    pub async fn write_temp_pcm(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.temp_recording_path(filename);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write PCM chunk {}", path.display()))?;
        Ok(path)
    }

    /// Concatenate input files into `output` in order, returning the byte
    /// count written. Used when promoting transcoded chunks into one
    /// persistent recording.
    pub async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<u64> {
        let mut out = tokio::fs::File::create(output)
            .await
            .with_context(|| format!("Failed to create {}", output.display()))?;

        let mut total = 0u64;
        for input in inputs {
            let data = tokio::fs::read(input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            total += data.len() as u64;
            out.write_all(&data)
                .await
                .with_context(|| format!("Failed to append to {}", output.display()))?;
        }
        out.flush().await?;
        Ok(total)
    }

    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let data =
            serde_json::to_vec_pretty(value).context("Failed to serialize JSON document")?;
        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Malformed JSON document {}", path.display()))
    }

    /// Best-effort delete; missing files are not an error.
    pub async fn remove_if_exists(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filenames() {
        assert_eq!(
            FileStore::chunk_filename("abcd1234abcd1234", "42", 7),
            "abcd1234abcd1234_42_chunk_0007.pcm"
        );
        assert_eq!(
            FileStore::compiled_transcript_filename("abcd1234abcd1234"),
            "transcript_abcd1234abcd1234.json"
        );
        assert_eq!(
            FileStore::user_transcript_filename("m", "u", "t"),
            "transcript_m_u_t.json"
        );
    }

    #[tokio::test]
    async fn test_write_and_concatenate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let a = store.write_temp_pcm("a.pcm", b"hello ").await.unwrap();
        let b = store.write_temp_pcm("b.pcm", b"world").await.unwrap();

        let out = store.persistent_recording_path("joined.bin");
        let written = store.concatenate(&[a, b], &out).await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let path = store.transcript_path("doc.json");
        let value = serde_json::json!({"meeting_id": "m1", "segments": [1, 2, 3]});
        store.write_json(&path, &value).await.unwrap();

        let loaded: serde_json::Value = store.read_json(&path).await.unwrap();
        assert_eq!(loaded, value);
    }

    #[tokio::test]
    async fn test_remove_if_exists_is_quiet_on_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store
            .remove_if_exists(&store.temp_recording_path("never-written.pcm"))
            .await;
    }
}
