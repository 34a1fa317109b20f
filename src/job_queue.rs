/*
 * Meeting Scribe - Sequential Job Queue
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

//! Event-driven FIFO queue bound to a single worker task. The queue is
//! idle until jobs arrive, processes one job at a time, retries failed
//! jobs up to a configurable limit and notifies observers through
//! function-valued callbacks that never propagate their own errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::types::JobState;

/// How long the idle worker sleeps before re-checking the shutdown signal.
const IDLE_WAKE_INTERVAL: Duration = Duration::from_secs(1);

/// Classified job failure. The queue retries transient errors up to its
/// retry limit; permanent errors fail immediately regardless of retries
/// left.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("transient failure: {0}")]
    Transient(String),
}

/// Shared header carried by every job.
#[derive(Debug, Clone)]
pub struct JobHeader {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobState,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

impl JobHeader {
    pub fn new(id: String) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: JobState::Pending,
            error_message: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(id: String, metadata: serde_json::Value) -> Self {
        Self {
            metadata,
            ..Self::new(id)
        }
    }

    fn mark_started(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = JobState::InProgress;
    }

    fn mark_completed(&mut self) {
        self.finished_at = Some(Utc::now());
        self.status = JobState::Completed;
    }

    fn mark_failed(&mut self, error_message: String) {
        self.finished_at = Some(Utc::now());
        self.status = JobState::Failed;
        self.error_message = Some(error_message);
    }

    fn reset_for_retry(&mut self) {
        self.status = JobState::Pending;
        self.error_message = None;
        self.finished_at = None;
    }
}

/// A unit of work processed by a [`JobQueue`]. `execute` may suspend for
/// as long as it needs; any error it returns is caught by the worker.
#[async_trait]
pub trait Job: Send + 'static {
    fn header(&self) -> &JobHeader;
    fn header_mut(&mut self) -> &mut JobHeader;
    async fn execute(&mut self) -> Result<()>;
}

/// Callback invoked with the job after a lifecycle transition. Errors are
/// logged and swallowed; they never stop the worker.
pub type JobCallback<J> =
    Arc<dyn for<'a> Fn(&'a J) -> BoxFuture<'a, Result<()>> + Send + Sync>;

#[derive(Default)]
struct JobCallbacks<J> {
    on_started: Option<JobCallback<J>>,
    on_complete: Option<JobCallback<J>>,
    on_failed: Option<JobCallback<J>>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStatistics {
    pub running: bool,
    pub queue_size: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    pub current_job_id: Option<String>,
}

struct QueueInner<J: Job> {
    name: String,
    max_retries: u32,
    tx: mpsc::UnboundedSender<J>,
    rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<J>>>,
    running: AtomicBool,
    shutdown: parking_lot::Mutex<CancellationToken>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    queue_size: AtomicUsize,
    total_processed: AtomicUsize,
    total_failed: AtomicUsize,
    current_job_id: parking_lot::Mutex<Option<String>>,
    retry_counts: parking_lot::Mutex<HashMap<String, u32>>,
    callbacks: parking_lot::RwLock<JobCallbacks<J>>,
}

/// Generic single-worker FIFO queue with retries and lifecycle callbacks.
pub struct JobQueue<J: Job> {
    inner: Arc<QueueInner<J>>,
}

impl<J: Job> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<J: Job + Sync> JobQueue<J> {
    pub fn new(name: impl Into<String>, max_retries: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                max_retries,
                tx,
                rx: tokio::sync::Mutex::new(Some(rx)),
                running: AtomicBool::new(false),
                shutdown: parking_lot::Mutex::new(CancellationToken::new()),
                worker: tokio::sync::Mutex::new(None),
                queue_size: AtomicUsize::new(0),
                total_processed: AtomicUsize::new(0),
                total_failed: AtomicUsize::new(0),
                current_job_id: parking_lot::Mutex::new(None),
                retry_counts: parking_lot::Mutex::new(HashMap::new()),
                callbacks: parking_lot::RwLock::new(JobCallbacks {
                    on_started: None,
                    on_complete: None,
                    on_failed: None,
                }),
            }),
        }
    }

    /// Wire lifecycle callbacks. Called by the owner before jobs flow; the
    /// queue itself never decides what happens downstream.
    pub fn set_on_started(&self, cb: JobCallback<J>) {
        self.inner.callbacks.write().on_started = Some(cb);
    }

    pub fn set_on_complete(&self, cb: JobCallback<J>) {
        self.inner.callbacks.write().on_complete = Some(cb);
    }

    pub fn set_on_failed(&self, cb: JobCallback<J>) {
        self.inner.callbacks.write().on_failed = Some(cb);
    }

    /// Enqueue a job. Non-blocking; starts the worker if it is idle.
    pub async fn add_job(&self, job: J) -> Result<()> {
        self.inner.queue_size.fetch_add(1, Ordering::SeqCst);
        self.inner
            .tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("Job queue '{}' channel closed", self.inner.name))?;

        if !self.inner.running.load(Ordering::SeqCst) {
            self.start().await;
        }
        Ok(())
    }

    /// Start the worker task. Idempotent.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        *self.inner.shutdown.lock() = token.clone();

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            Self::worker_loop(inner, token).await;
        });
        *self.inner.worker.lock().await = Some(handle);

        tracing::debug!("Job queue '{}' worker started", self.inner.name);
    }

    /// Stop the worker. With `wait_for_completion` the current job's
    /// `execute()` is allowed to finish first.
    pub async fn stop(&self, wait_for_completion: bool) {
        if !self.inner.running.load(Ordering::SeqCst) {
            return;
        }

        self.inner.shutdown.lock().cancel();

        if wait_for_completion {
            let handle = self.inner.worker.lock().await.take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }

        self.inner.running.store(false, Ordering::SeqCst);
        tracing::debug!("Job queue '{}' worker stopped", self.inner.name);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> QueueStatistics {
        QueueStatistics {
            running: self.inner.running.load(Ordering::SeqCst),
            queue_size: self.inner.queue_size.load(Ordering::SeqCst),
            total_processed: self.inner.total_processed.load(Ordering::SeqCst) as u64,
            total_failed: self.inner.total_failed.load(Ordering::SeqCst) as u64,
            current_job_id: self.inner.current_job_id.lock().clone(),
        }
    }

    async fn worker_loop(inner: Arc<QueueInner<J>>, shutdown: CancellationToken) {
        let mut rx = match inner.rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                tracing::error!("Job queue '{}' receiver already taken", inner.name);
                inner.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        loop {
            match timeout(IDLE_WAKE_INTERVAL, rx.recv()).await {
                Ok(Some(job)) => {
                    inner.queue_size.fetch_sub(1, Ordering::SeqCst);
                    *inner.current_job_id.lock() = Some(job.header().id.clone());
                    Self::process_job(&inner, job).await;
                    *inner.current_job_id.lock() = None;
                }
                Ok(None) => break,
                Err(_) => {
                    // Periodic wake so an idle worker can observe shutdown.
                    if shutdown.is_cancelled() {
                        break;
                    }
                }
            }

            if shutdown.is_cancelled() {
                break;
            }
        }

        // Hand the receiver back so the queue can be restarted.
        *inner.rx.lock().await = Some(rx);
        inner.running.store(false, Ordering::SeqCst);
    }

    async fn process_job(inner: &Arc<QueueInner<J>>, mut job: J) {
        let job_id = job.header().id.clone();
        let retry_count = inner.retry_counts.lock().get(&job_id).copied().unwrap_or(0);

        job.header_mut().mark_started();
        Self::fire_callback(inner, &job, CallbackKind::Started).await;

        match job.execute().await {
            Ok(()) => {
                job.header_mut().mark_completed();
                inner.total_processed.fetch_add(1, Ordering::SeqCst);
                inner.retry_counts.lock().remove(&job_id);
                Self::fire_callback(inner, &job, CallbackKind::Complete).await;
            }
            Err(err) => {
                let error_message = format!("{:#}", err);
                let permanent = matches!(
                    err.downcast_ref::<JobError>(),
                    Some(JobError::Permanent(_))
                );

                if !permanent && retry_count < inner.max_retries {
                    tracing::warn!(
                        "Job {} failed on queue '{}' (attempt {}/{}), re-queueing: {}",
                        job_id,
                        inner.name,
                        retry_count + 1,
                        inner.max_retries + 1,
                        error_message
                    );
                    inner.retry_counts.lock().insert(job_id.clone(), retry_count + 1);
                    job.header_mut().reset_for_retry();

                    // Failed attempts are absorbed internally; observers only
                    // see the terminal outcome.
                    inner.queue_size.fetch_add(1, Ordering::SeqCst);
                    if inner.tx.send(job).is_err() {
                        inner.queue_size.fetch_sub(1, Ordering::SeqCst);
                        tracing::error!(
                            "Job queue '{}' closed while re-queueing job {}",
                            inner.name,
                            job_id
                        );
                    }
                } else {
                    job.header_mut().mark_failed(error_message.clone());
                    inner.total_failed.fetch_add(1, Ordering::SeqCst);
                    inner.retry_counts.lock().remove(&job_id);
                    tracing::error!(
                        "Job {} failed on queue '{}': {}",
                        job_id,
                        inner.name,
                        error_message
                    );
                    Self::fire_callback(inner, &job, CallbackKind::Failed).await;
                }
            }
        }
    }

    async fn fire_callback(inner: &Arc<QueueInner<J>>, job: &J, kind: CallbackKind) {
        let cb = {
            let callbacks = inner.callbacks.read();
            match kind {
                CallbackKind::Started => callbacks.on_started.clone(),
                CallbackKind::Complete => callbacks.on_complete.clone(),
                CallbackKind::Failed => callbacks.on_failed.clone(),
            }
        };

        if let Some(cb) = cb {
            if let Err(e) = cb(job).await {
                tracing::error!(
                    "Error in {:?} callback on queue '{}' for job {}: {:#}",
                    kind,
                    inner.name,
                    job.header().id,
                    e
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CallbackKind {
    Started,
    Complete,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct TestJob {
        header: JobHeader,
        failures_remaining: u32,
        permanent: bool,
        executions: Arc<AtomicU32>,
    }

    impl TestJob {
        fn new(id: &str, failures_remaining: u32, permanent: bool) -> (Self, Arc<AtomicU32>) {
            let executions = Arc::new(AtomicU32::new(0));
            (
                Self {
                    header: JobHeader::new(id.to_string()),
                    failures_remaining,
                    permanent,
                    executions: executions.clone(),
                },
                executions,
            )
        }
    }

    #[async_trait]
    impl Job for TestJob {
        fn header(&self) -> &JobHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut JobHeader {
            &mut self.header
        }

        async fn execute(&mut self) -> Result<()> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.failures_remaining > 0 {
                self.failures_remaining -= 1;
                if self.permanent {
                    return Err(JobError::Permanent("bad input".to_string()).into());
                }
                return Err(JobError::Transient("engine timeout".to_string()).into());
            }
            Ok(())
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_processes_jobs_in_order() {
        let queue: JobQueue<TestJob> = JobQueue::new("test", 0);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let seen = order.clone();
        queue.set_on_complete(Arc::new(move |job: &TestJob| {
            let seen = seen.clone();
            let id = job.header().id.clone();
            Box::pin(async move {
                seen.lock().push(id);
                Ok(())
            })
        }));

        for i in 0..3 {
            let (job, _) = TestJob::new(&format!("job-{}", i), 0, false);
            queue.add_job(job).await.unwrap();
        }

        wait_for(|| order.lock().len() == 3).await;
        assert_eq!(*order.lock(), vec!["job-0", "job-1", "job-2"]);

        let stats = queue.statistics();
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(stats.queue_size, 0);
        queue.stop(true).await;
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_completes() {
        let queue: JobQueue<TestJob> = JobQueue::new("test", 2);
        let completed = Arc::new(AtomicBool::new(false));

        let flag = completed.clone();
        queue.set_on_complete(Arc::new(move |job: &TestJob| {
            let flag = flag.clone();
            // A retried job carries only its most recent attempt times.
            assert_eq!(job.header().status, JobState::Completed);
            assert!(job.header().started_at.is_some());
            assert!(job.header().finished_at.is_some());
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        }));

        let (job, executions) = TestJob::new("retry-job", 1, false);
        queue.add_job(job).await.unwrap();

        wait_for(|| completed.load(Ordering::SeqCst)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 2);

        let stats = queue.statistics();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.total_failed, 0);
        queue.stop(true).await;
    }

    #[tokio::test]
    async fn test_retries_exhausted_marks_failed() {
        let queue: JobQueue<TestJob> = JobQueue::new("test", 2);
        let failed = Arc::new(AtomicBool::new(false));

        let flag = failed.clone();
        queue.set_on_failed(Arc::new(move |job: &TestJob| {
            assert_eq!(job.header().status, JobState::Failed);
            assert!(job.header().error_message.is_some());
            let flag = flag.clone();
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        }));

        let (job, executions) = TestJob::new("doomed", 10, false);
        queue.add_job(job).await.unwrap();

        wait_for(|| failed.load(Ordering::SeqCst)).await;
        // Initial attempt plus two retries.
        assert_eq!(executions.load(Ordering::SeqCst), 3);
        assert_eq!(queue.statistics().total_failed, 1);
        queue.stop(true).await;
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let queue: JobQueue<TestJob> = JobQueue::new("test", 3);
        let failed = Arc::new(AtomicBool::new(false));

        let flag = failed.clone();
        queue.set_on_failed(Arc::new(move |_job: &TestJob| {
            let flag = flag.clone();
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        }));

        let (job, executions) = TestJob::new("invalid", 10, true);
        queue.add_job(job).await.unwrap();

        wait_for(|| failed.load(Ordering::SeqCst)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        queue.stop(true).await;
    }

    #[tokio::test]
    async fn test_callback_errors_do_not_halt_worker() {
        let queue: JobQueue<TestJob> = JobQueue::new("test", 0);
        let completions = Arc::new(AtomicU32::new(0));

        let counter = completions.clone();
        queue.set_on_complete(Arc::new(move |_job: &TestJob| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("callback exploded"))
            })
        }));

        for i in 0..2 {
            let (job, _) = TestJob::new(&format!("cb-{}", i), 0, false);
            queue.add_job(job).await.unwrap();
        }

        wait_for(|| completions.load(Ordering::SeqCst) == 2).await;
        assert_eq!(queue.statistics().total_processed, 2);
        queue.stop(true).await;
    }

    #[tokio::test]
    async fn test_stop_waits_for_current_job_and_restart_works() {
        let queue: JobQueue<TestJob> = JobQueue::new("test", 0);
        let (job, executions) = TestJob::new("first", 0, false);
        queue.add_job(job).await.unwrap();

        wait_for(|| executions.load(Ordering::SeqCst) == 1).await;
        queue.stop(true).await;
        assert!(!queue.is_running());

        // Adding a job after stop restarts the worker.
        let (job, executions2) = TestJob::new("second", 0, false);
        queue.add_job(job).await.unwrap();
        wait_for(|| executions2.load(Ordering::SeqCst) == 1).await;
        queue.stop(true).await;
    }
}
