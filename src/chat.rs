/*
 * Meeting Scribe - Chat Subsystem
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

//! Interactive chat over the shared LLM. Lives outside the meeting
//! pipeline but competes for the GPU as the `chatbot` class, which the
//! arbitrator serves with absolute priority.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::gpu::{GpuArbitrator, GpuJobClass};
use crate::job_queue::{Job, JobHeader, JobQueue, QueueStatistics};
use crate::llm::{ChatMessage, LanguageModel, LlmOptions};
use crate::storage::{FileStore, SqlStore};
use crate::types::JobType;
use crate::util::generate_short_id;

const CHAT_MAX_RETRIES: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChatMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Conversation history as stored on disk; the SQL row only points here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDocument {
    pub id: String,
    pub guild_id: Option<String>,
    pub requesting_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<StoredChatMessage>,
}

struct ChatJob {
    header: JobHeader,
    conversation_id: String,
    prompt: String,
    reply_tx: Option<oneshot::Sender<String>>,
    sql: SqlStore,
    files: FileStore,
    llm: Arc<dyn LanguageModel>,
    gpu: GpuArbitrator,
    model: String,
}

#[async_trait]
impl Job for ChatJob {
    fn header(&self) -> &JobHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut JobHeader {
        &mut self.header
    }

    async fn execute(&mut self) -> Result<()> {
        let filename = format!("conversation_{}.json", self.conversation_id);
        let path = self.files.conversation_path(&filename);
        let mut document: ConversationDocument = self
            .files
            .read_json(&path)
            .await
            .context("Failed to load conversation")?;

        document.messages.push(StoredChatMessage {
            role: "user".to_string(),
            content: self.prompt.clone(),
            timestamp: Utc::now(),
        });

        let history: Vec<ChatMessage> = document
            .messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();

        let reply = {
            let _permit = self
                .gpu
                .acquire(GpuJobClass::Chatbot, &self.header.id)
                .await?;
            self.llm
                .query(&self.model, &history, &LlmOptions::default())
                .await?
        };

        document.messages.push(StoredChatMessage {
            role: "assistant".to_string(),
            content: reply.content.clone(),
            timestamp: Utc::now(),
        });
        document.updated_at = Utc::now();
        self.files.write_json(&path, &document).await?;
        self.sql
            .touch_conversation(&self.conversation_id, document.updated_at)
            .await?;

        if let Some(tx) = self.reply_tx.take() {
            let _ = tx.send(reply.content);
        }
        Ok(())
    }
}

/// Owns conversations and the single-worker chat queue.
pub struct ChatService {
    queue: JobQueue<ChatJob>,
    sql: SqlStore,
    files: FileStore,
    llm: Arc<dyn LanguageModel>,
    gpu: GpuArbitrator,
    model: String,
}

impl ChatService {
    pub fn new(
        sql: SqlStore,
        files: FileStore,
        llm: Arc<dyn LanguageModel>,
        gpu: GpuArbitrator,
        model: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: JobQueue::new("chat", CHAT_MAX_RETRIES),
            sql,
            files,
            llm,
            gpu,
            model,
        })
    }

    /// Create a new conversation with an empty history.
    pub async fn start_conversation(
        &self,
        guild_id: Option<&str>,
        requesting_user_id: Option<&str>,
    ) -> Result<String> {
        let conversation_id = generate_short_id();
        let created_at = Utc::now();
        let filename = format!("conversation_{}.json", conversation_id);

        let document = ConversationDocument {
            id: conversation_id.clone(),
            guild_id: guild_id.map(str::to_string),
            requesting_user_id: requesting_user_id.map(str::to_string),
            created_at,
            updated_at: created_at,
            messages: Vec::new(),
        };
        let path = self.files.conversation_path(&filename);
        self.files.write_json(&path, &document).await?;

        self.sql
            .insert_conversation(
                &conversation_id,
                guild_id,
                requesting_user_id,
                &filename,
                created_at,
            )
            .await?;

        tracing::info!("Started conversation {}", conversation_id);
        Ok(conversation_id)
    }

    /// Queue a chat turn. The returned receiver resolves with the
    /// assistant's reply once the job has run.
    pub async fn ask(
        &self,
        conversation_id: &str,
        prompt: impl Into<String>,
    ) -> Result<oneshot::Receiver<String>> {
        if self
            .sql
            .get_conversation_file(conversation_id)
            .await?
            .is_none()
        {
            return Err(anyhow::anyhow!(
                "Conversation {} not found",
                conversation_id
            ));
        }

        let job_id = generate_short_id();
        // Chat jobs track status under their conversation id; they have no
        // meeting to reference.
        self.sql
            .create_job_status(&job_id, JobType::Chatbot, conversation_id, Utc::now())
            .await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = ChatJob {
            header: JobHeader::new(job_id),
            conversation_id: conversation_id.to_string(),
            prompt: prompt.into(),
            reply_tx: Some(reply_tx),
            sql: self.sql.clone(),
            files: self.files.clone(),
            llm: self.llm.clone(),
            gpu: self.gpu.clone(),
            model: self.model.clone(),
        };
        self.queue.add_job(job).await?;
        Ok(reply_rx)
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<ConversationDocument> {
        let filename = self
            .sql
            .get_conversation_file(conversation_id)
            .await?
            .with_context(|| format!("Conversation {} not found", conversation_id))?;
        self.files
            .read_json(&self.files.conversation_path(&filename))
            .await
    }

    pub fn statistics(&self) -> QueueStatistics {
        self.queue.statistics()
    }

    pub async fn shutdown(&self) {
        self.queue.stop(true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmReply;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn query(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _options: &LlmOptions,
        ) -> Result<LlmReply> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(LlmReply {
                content: format!("echo: {}", last),
                eval_count: None,
                prompt_eval_count: None,
                total_duration: None,
            })
        }
    }

    async fn fixture() -> (Arc<ChatService>, GpuArbitrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path()).unwrap();
        let sql = SqlStore::in_memory().await.unwrap();
        let gpu = GpuArbitrator::with_seed(11);
        let service = ChatService::new(
            sql,
            files,
            Arc::new(EchoModel),
            gpu.clone(),
            "chat-model".to_string(),
        );
        (service, gpu, dir)
    }

    #[tokio::test]
    async fn test_chat_turn_round_trip() {
        let (service, gpu, _dir) = fixture().await;

        let conversation_id = service
            .start_conversation(Some("guild-1"), Some("user-1"))
            .await
            .unwrap();

        let reply_rx = service.ask(&conversation_id, "hello bot").await.unwrap();
        let reply = reply_rx.await.unwrap();
        assert_eq!(reply, "echo: hello bot");

        let document = service.conversation(&conversation_id).await.unwrap();
        assert_eq!(document.messages.len(), 2);
        assert_eq!(document.messages[0].role, "user");
        assert_eq!(document.messages[1].role, "assistant");

        // The turn went through the GPU arbitrator as chatbot work.
        assert_eq!(gpu.status().total_grants(GpuJobClass::Chatbot), 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_ask_unknown_conversation_fails() {
        let (service, _gpu, _dir) = fixture().await;
        assert!(service.ask("missing0000000000", "hi").await.is_err());
    }

    #[tokio::test]
    async fn test_multi_turn_history_accumulates() {
        let (service, _gpu, _dir) = fixture().await;
        let conversation_id = service.start_conversation(None, None).await.unwrap();

        for i in 0..3 {
            let rx = service
                .ask(&conversation_id, format!("turn {}", i))
                .await
                .unwrap();
            rx.await.unwrap();
        }

        let document = service.conversation(&conversation_id).await.unwrap();
        assert_eq!(document.messages.len(), 6);
        service.shutdown().await;
    }
}
