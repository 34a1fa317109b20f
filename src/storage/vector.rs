/*
 * Meeting Scribe - Vector Store Interface
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

//! Narrow interface over the vector database. The pipeline only needs
//! deterministic-ID upsert (so re-running a stage is a no-op) and counting
//! for introspection; search lives with the retrieval features outside the
//! pipeline core.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Transcript segment embeddings live in one collection per guild.
pub fn embeddings_collection(guild_id: &str) -> String {
    format!("embeddings_{}", guild_id)
}

/// All summary embeddings share one collection.
pub const SUMMARIES_COLLECTION: &str = "summaries";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert-or-replace by record id.
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()>;

    async fn count(&self, collection: &str) -> Result<usize>;

    /// Number of documents in a collection whose metadata carries the given
    /// meeting id.
    async fn count_for_meeting(&self, collection: &str, meeting_id: &str) -> Result<usize>;
}

/// In-process vector store used by tests and local runs.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: parking_lot::RwLock<HashMap<String, HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<VectorRecord> {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id).cloned())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()> {
        let mut collections = self.collections.write();
        let entries = collections.entry(collection.to_string()).or_default();
        for record in records {
            entries.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0))
    }

    async fn count_for_meeting(&self, collection: &str, meeting_id: &str) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| {
                c.values()
                    .filter(|r| r.metadata.get("meeting_id").and_then(|v| v.as_str())
                        == Some(meeting_id))
                    .count()
            })
            .unwrap_or(0))
    }
}
