/*
 * Meeting Scribe - GPU Resource Arbitrator
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

//! Serializes heterogeneous GPU workloads behind a single lock.
//!
//! Scheduling policy:
//! 1. Chatbot requests always go first and have no consecutive-run cap.
//! 2. Otherwise a non-chatbot class is drawn with equal weight; a class
//!    that has hit its consecutive cap is excluded from the draw.
//! 3. If the drawn class has no waiters, the dispatcher falls through to
//!    the other non-chatbot classes in a deterministic order, trying the
//!    capped class last so caps only yield when nothing else is waiting.
//!
//! The lock is granted as an RAII [`GpuPermit`]; dropping the permit (on
//! any exit path, panics included) releases the lock and wakes the
//! dispatcher.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::oneshot;

/// Equal selection weight per non-chatbot class in the tuned mix.
pub const GPU_CLASS_WEIGHT: f64 = 0.20;

pub const MAX_CONSECUTIVE_TRANSCRIPTION: u32 = 2;
pub const MAX_CONSECUTIVE_TEXT_EMBEDDING: u32 = 2;
pub const MAX_CONSECUTIVE_SUMMARIZATION: u32 = 1;
pub const MAX_CONSECUTIVE_VECTOR_RERANKER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuJobClass {
    Transcription,
    TextEmbedding,
    Summarization,
    Chatbot,
    VectorReranker,
}

impl GpuJobClass {
    pub const ALL: [GpuJobClass; 5] = [
        GpuJobClass::Transcription,
        GpuJobClass::TextEmbedding,
        GpuJobClass::Summarization,
        GpuJobClass::Chatbot,
        GpuJobClass::VectorReranker,
    ];

    /// Non-chatbot classes in the dispatcher's deterministic fallthrough
    /// order.
    pub const ROUND_ROBIN: [GpuJobClass; 4] = [
        GpuJobClass::Transcription,
        GpuJobClass::TextEmbedding,
        GpuJobClass::Summarization,
        GpuJobClass::VectorReranker,
    ];

    fn index(self) -> usize {
        match self {
            GpuJobClass::Transcription => 0,
            GpuJobClass::TextEmbedding => 1,
            GpuJobClass::Summarization => 2,
            GpuJobClass::Chatbot => 3,
            GpuJobClass::VectorReranker => 4,
        }
    }

    fn consecutive_cap(self) -> Option<u32> {
        match self {
            GpuJobClass::Transcription => Some(MAX_CONSECUTIVE_TRANSCRIPTION),
            GpuJobClass::TextEmbedding => Some(MAX_CONSECUTIVE_TEXT_EMBEDDING),
            GpuJobClass::Summarization => Some(MAX_CONSECUTIVE_SUMMARIZATION),
            GpuJobClass::VectorReranker => Some(MAX_CONSECUTIVE_VECTOR_RERANKER),
            GpuJobClass::Chatbot => None,
        }
    }
}

impl fmt::Display for GpuJobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuJobClass::Transcription => write!(f, "transcription"),
            GpuJobClass::TextEmbedding => write!(f, "text_embedding"),
            GpuJobClass::Summarization => write!(f, "summarization"),
            GpuJobClass::Chatbot => write!(f, "chatbot"),
            GpuJobClass::VectorReranker => write!(f, "vector_reranker"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GpuHolder {
    pub job_id: String,
    pub class: GpuJobClass,
    pub acquired_at: DateTime<Utc>,
}

/// Per-class counters keyed by [`GpuJobClass::index`].
pub type ClassCounts = [u64; 5];

#[derive(Debug, Clone)]
pub struct GpuStatus {
    pub locked: bool,
    pub current_holder: Option<GpuHolder>,
    pub queue_depths: ClassCounts,
    pub total_grants: ClassCounts,
    pub consecutive_counts: ClassCounts,
    pub last_class: Option<GpuJobClass>,
}

impl GpuStatus {
    pub fn queue_depth(&self, class: GpuJobClass) -> u64 {
        self.queue_depths[class.index()]
    }

    pub fn total_grants(&self, class: GpuJobClass) -> u64 {
        self.total_grants[class.index()]
    }
}

struct Waiter {
    grant_tx: oneshot::Sender<()>,
    job_id: String,
}

struct ArbitratorState {
    queues: [VecDeque<Waiter>; 5],
    locked: bool,
    holder: Option<GpuHolder>,
    consecutive: [u32; 5],
    last_class: Option<GpuJobClass>,
    totals: [u64; 5],
    rng: StdRng,
}

impl ArbitratorState {
    /// Pick the next class to serve. Caps are checked before the weighted
    /// draw; a capped class is excluded from the draw entirely.
    fn select_class(&mut self) -> GpuJobClass {
        if let Some(last) = self.last_class {
            if let Some(cap) = last.consecutive_cap() {
                if self.consecutive[last.index()] >= cap {
                    // Forced switch: equal probability among the other
                    // non-chatbot classes.
                    let others: Vec<GpuJobClass> = GpuJobClass::ROUND_ROBIN
                        .iter()
                        .copied()
                        .filter(|c| *c != last)
                        .collect();
                    let pick = self.rng.gen_range(0..others.len());
                    return others[pick];
                }
            }
        }

        // Weighted draw over the non-chatbot classes; chatbot never
        // reaches this point because the dispatcher serves it first. The
        // roll spans the summed weights so the equal 20% slices cover the
        // whole draw.
        let total_weight = GPU_CLASS_WEIGHT * GpuJobClass::ROUND_ROBIN.len() as f64;
        let roll: f64 = self.rng.gen::<f64>() * total_weight;
        let mut threshold = 0.0;
        for class in GpuJobClass::ROUND_ROBIN {
            threshold += GPU_CLASS_WEIGHT;
            if roll < threshold {
                return class;
            }
        }
        GpuJobClass::VectorReranker
    }

    /// Deterministic fallthrough order starting from the chosen class. A
    /// class sitting at its consecutive cap is tried last so it only runs
    /// again when no other class has waiters.
    fn dispatch_order(&self, chosen: GpuJobClass) -> Vec<GpuJobClass> {
        let capped = self.last_class.filter(|last| {
            last.consecutive_cap()
                .is_some_and(|cap| self.consecutive[last.index()] >= cap)
        });

        let mut order = Vec::with_capacity(4);
        if Some(chosen) != capped {
            order.push(chosen);
        }
        for class in GpuJobClass::ROUND_ROBIN {
            if class != chosen && Some(class) != capped {
                order.push(class);
            }
        }
        if let Some(class) = capped {
            order.push(class);
        }
        order
    }

    /// Account for a finished run. Chatbot runs neither advance nor reset
    /// the other counters.
    fn record_release(&mut self, class: GpuJobClass) {
        if class != GpuJobClass::Chatbot {
            for other in GpuJobClass::ROUND_ROBIN {
                if other == class {
                    self.consecutive[other.index()] = if self.last_class == Some(class) {
                        self.consecutive[other.index()] + 1
                    } else {
                        1
                    };
                } else {
                    self.consecutive[other.index()] = 0;
                }
            }
        }
        self.last_class = Some(class);
    }
}

struct ArbitratorInner {
    state: parking_lot::Mutex<ArbitratorState>,
}

impl ArbitratorInner {
    /// Grant the lock to the next eligible waiter, if any. Runs whenever
    /// a request arrives or the lock is released; serialized by the state
    /// mutex. Waiters that already gave up are skipped.
    fn dispatch(&self) {
        let mut state = self.state.lock();
        loop {
            if state.locked {
                return;
            }

            // Chatbot has absolute priority and no cap.
            let chatbot_idx = GpuJobClass::Chatbot.index();
            let class = if !state.queues[chatbot_idx].is_empty() {
                Some(GpuJobClass::Chatbot)
            } else {
                let chosen = state.select_class();
                state
                    .dispatch_order(chosen)
                    .into_iter()
                    .find(|c| !state.queues[c.index()].is_empty())
            };

            let Some(class) = class else {
                return;
            };
            let Some(waiter) = state.queues[class.index()].pop_front() else {
                return;
            };

            state.locked = true;
            state.holder = Some(GpuHolder {
                job_id: waiter.job_id.clone(),
                class,
                acquired_at: Utc::now(),
            });
            state.totals[class.index()] += 1;

            if waiter.grant_tx.send(()).is_ok() {
                tracing::debug!("GPU lock granted to {} job {}", class, waiter.job_id);
                return;
            }

            // Waiter cancelled while queued; undo and pick again.
            tracing::debug!(
                "GPU waiter {} ({}) gone before grant, skipping",
                waiter.job_id,
                class
            );
            state.locked = false;
            state.holder = None;
            state.totals[class.index()] -= 1;
        }
    }

    fn release(&self, class: GpuJobClass, job_id: &str) {
        {
            let mut state = self.state.lock();
            if !state.locked {
                tracing::warn!(
                    "GPU release by {} job {} with lock already free",
                    class,
                    job_id
                );
                return;
            }
            state.locked = false;
            state.holder = None;
            state.record_release(class);
        }
        tracing::debug!("GPU lock released by {} job {}", class, job_id);
        self.dispatch();
    }
}

/// Scoped grant of the GPU. Dropping the permit releases the lock; this is
/// the only release path, so a double release cannot be expressed.
pub struct GpuPermit {
    inner: Arc<ArbitratorInner>,
    class: GpuJobClass,
    job_id: String,
}

impl GpuPermit {
    pub fn class(&self) -> GpuJobClass {
        self.class
    }

    /// Release explicitly. Equivalent to dropping the permit.
    pub fn release(self) {}
}

impl Drop for GpuPermit {
    fn drop(&mut self) {
        self.inner.release(self.class, &self.job_id);
    }
}

/// The GPU access gatekeeper. Cheap to clone; all clones share one lock.
#[derive(Clone)]
pub struct GpuArbitrator {
    inner: Arc<ArbitratorInner>,
}

impl GpuArbitrator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic scheduler for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Arc::new(ArbitratorInner {
                state: parking_lot::Mutex::new(ArbitratorState {
                    queues: Default::default(),
                    locked: false,
                    holder: None,
                    consecutive: [0; 5],
                    last_class: None,
                    totals: [0; 5],
                    rng,
                }),
            }),
        }
    }

    /// Wait for exclusive GPU access. May suspend indefinitely. Dropping
    /// the returned future while queued is safe; the dispatcher skips
    /// abandoned waiters.
    pub async fn acquire(&self, class: GpuJobClass, job_id: &str) -> Result<GpuPermit> {
        let (grant_tx, grant_rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            state.queues[class.index()].push_back(Waiter {
                grant_tx,
                job_id: job_id.to_string(),
            });
        }
        tracing::debug!("GPU lock requested by {} job {}", class, job_id);
        self.inner.dispatch();

        grant_rx
            .await
            .map_err(|_| anyhow::anyhow!("GPU arbitrator shut down while waiting for grant"))?;

        Ok(GpuPermit {
            inner: self.inner.clone(),
            class,
            job_id: job_id.to_string(),
        })
    }

    pub fn status(&self) -> GpuStatus {
        let state = self.inner.state.lock();
        let mut queue_depths = [0u64; 5];
        for class in GpuJobClass::ALL {
            queue_depths[class.index()] = state.queues[class.index()].len() as u64;
        }
        GpuStatus {
            locked: state.locked,
            current_holder: state.holder.clone(),
            queue_depths,
            total_grants: state.totals,
            consecutive_counts: state.consecutive.map(u64::from),
            last_class: state.last_class,
        }
    }
}

impl Default for GpuArbitrator {
    fn default() -> Self {
        Self::new()
    }
}
