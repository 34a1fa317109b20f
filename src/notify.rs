/*
 * Meeting Scribe - Completion Notifications
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

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{JobType, Meeting};

/// Outbound notifications. The chat-platform delivery lives outside this
/// crate; the pipeline only decides who hears about what.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell every participant their meeting is fully processed.
    async fn meeting_complete(&self, meeting: &Meeting) -> Result<()>;

    /// Tell the requester a pipeline stage failed.
    async fn stage_failed(&self, meeting: &Meeting, stage: JobType, error: &str) -> Result<()>;
}

/// Default notifier: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn meeting_complete(&self, meeting: &Meeting) -> Result<()> {
        tracing::info!(
            "Meeting {} complete; notifying {} participants",
            meeting.id,
            meeting.participants.len()
        );
        Ok(())
    }

    async fn stage_failed(&self, meeting: &Meeting, stage: JobType, error: &str) -> Result<()> {
        tracing::warn!(
            "Stage {} failed for meeting {}; notifying requester {}: {}",
            stage,
            meeting.id,
            meeting.requested_by,
            error
        );
        Ok(())
    }
}
