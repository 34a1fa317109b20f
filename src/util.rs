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

use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of the opaque identifiers used for meetings, recordings,
/// transcripts and jobs.
pub const SHORT_ID_LENGTH: usize = 16;

/// Generate a 16 hex character identifier derived from a random UUID.
pub fn generate_short_id() -> String {
    Uuid::new_v4().simple().to_string()[..SHORT_ID_LENGTH].to_string()
}

/// Validate that an identifier has the expected 16-hex-char shape.
pub fn is_valid_short_id(id: &str) -> bool {
    id.len() == SHORT_ID_LENGTH && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Compute the SHA-256 digest of a file, returned as lowercase hex.
pub async fn sha256_of_file(path: &Path) -> Result<String> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;
    Ok(sha256_of_bytes(&data))
}

/// Compute the SHA-256 digest of a byte slice, returned as lowercase hex.
pub fn sha256_of_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_shape() {
        let id = generate_short_id();
        assert_eq!(id.len(), SHORT_ID_LENGTH);
        assert!(is_valid_short_id(&id));
    }

    #[test]
    fn test_short_ids_are_unique() {
        let a = generate_short_id();
        let b = generate_short_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_valid_short_id_rejects_bad_input() {
        assert!(!is_valid_short_id("short"));
        assert!(!is_valid_short_id("zzzzzzzzzzzzzzzz"));
        assert!(!is_valid_short_id("0123456789abcdef0"));
        assert!(is_valid_short_id("0123456789abcdef"));
    }

    #[test]
    fn test_sha256_of_bytes() {
        // Known digest of the empty input
        assert_eq!(
            sha256_of_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("one two  three\nfour"), 4);
    }
}
