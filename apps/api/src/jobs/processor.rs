//! In-process priority queue for extraction jobs.
//!
//! One scheduler task pulls jobs off the queue while fewer than
//! `max_concurrent_jobs` are active and runs each in its own task. A second
//! task sweeps old finished jobs. All job state lives behind a single mutex
//! that is never held across an await.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{JobPriority, JobStatus, JobSubmission, ProcessingJob};
use crate::cache::ExtractionCache;
use crate::extraction::{ExtractionResult, FileInfo, TextExtractionService};
use crate::processing::TextProcessor;

/// Extra time the whole job gets on top of its extraction timeout, covering
/// hashing, cache I/O and text processing.
const PROCESSING_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_concurrent_jobs: usize,
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub job_retention: Duration,
    pub stop_grace_period: Duration,
    pub default_timeout_seconds: u64,
    pub default_max_retries: u32,
    pub default_retry_delay_seconds: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            poll_interval: Duration::from_millis(500),
            cleanup_interval: Duration::from_secs(3600),
            job_retention: Duration::from_secs(24 * 3600),
            stop_grace_period: Duration::from_secs(10),
            default_timeout_seconds: 300,
            default_max_retries: 3,
            default_retry_delay_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEvent {
    Started,
    Completed,
    Failed,
}

pub type JobCallback = Arc<dyn Fn(&ProcessingJob) + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProcessingStats {
    pub total_processed: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_retries: u64,
    pub total_processing_time_seconds: f64,
    pub average_processing_time_seconds: f64,
}

impl ProcessingStats {
    fn record(&mut self, job: &ProcessingJob) {
        self.total_processed += 1;
        if job.status == JobStatus::Completed {
            self.total_succeeded += 1;
        } else {
            self.total_failed += 1;
        }
        self.total_processing_time_seconds += job.processing_time_seconds().unwrap_or(0.0);
        self.average_processing_time_seconds =
            self.total_processing_time_seconds / self.total_processed as f64;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueStats {
    pub running: bool,
    pub max_concurrent_jobs: usize,
    pub queued_jobs: usize,
    pub active_jobs: usize,
    pub completed_jobs: usize,
    pub queued_by_priority: BTreeMap<&'static str, usize>,
    pub stats: ProcessingStats,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ProcessingJob>,
    active: HashMap<Uuid, ProcessingJob>,
    completed: HashMap<Uuid, ProcessingJob>,
    stats: ProcessingStats,
}

impl QueueState {
    /// Inserts behind every job of equal or higher priority.
    fn enqueue(&mut self, job: ProcessingJob) {
        let score = job.priority.score();
        match self.queue.iter().position(|j| j.priority.score() < score) {
            Some(idx) => self.queue.insert(idx, job),
            None => self.queue.push_back(job),
        }
    }
}

/// Why a job attempt did not produce a result.
struct JobFailure {
    message: String,
    details: Option<Value>,
    retryable: bool,
}

impl JobFailure {
    fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            retryable: false,
        }
    }
}

struct Inner {
    config: ProcessorConfig,
    state: Mutex<QueueState>,
    extraction: TextExtractionService,
    cache: Arc<ExtractionCache>,
    text_processor: TextProcessor,
    callbacks: RwLock<HashMap<JobEvent, Vec<JobCallback>>>,
    running: AtomicBool,
}

#[derive(Clone)]
pub struct BackgroundProcessor {
    inner: Arc<Inner>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundProcessor {
    pub fn new(
        config: ProcessorConfig,
        extraction: TextExtractionService,
        cache: Arc<ExtractionCache>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(QueueState::default()),
                extraction,
                cache,
                text_processor: TextProcessor::new(),
                callbacks: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawns the scheduler and cleanup tasks. Calling it twice is a no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = tokio::spawn(run_scheduler(self.inner.clone()));
        let cleanup = tokio::spawn(run_cleanup(self.inner.clone()));
        self.tasks.lock().extend([scheduler, cleanup]);
        info!(
            max_concurrent_jobs = self.inner.config.max_concurrent_jobs,
            "Background processor started"
        );
    }

    /// Stops taking new work and waits a bounded time for in-flight jobs.
    /// Jobs still running after the grace period are left to finish alone.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Background task ended abnormally: {e}");
                }
            }
        }

        let deadline = Instant::now() + self.inner.config.stop_grace_period;
        loop {
            let active = self.inner.state.lock().active.len();
            if active == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(active, "Stopping with jobs still in flight");
                break;
            }
            tokio::time::sleep(self.inner.config.poll_interval).await;
        }
        info!("Background processor stopped");
    }

    pub fn submit_job(&self, submission: JobSubmission) -> Uuid {
        let config = &self.inner.config;
        let timeout_seconds = submission
            .timeout_seconds
            .unwrap_or(config.default_timeout_seconds);
        let max_retries = submission.max_retries.unwrap_or(config.default_max_retries);
        let retry_delay_seconds = submission
            .retry_delay_seconds
            .unwrap_or(config.default_retry_delay_seconds);

        let job = ProcessingJob::new(submission, timeout_seconds, max_retries, retry_delay_seconds);
        let job_id = job.job_id;
        info!(
            job_id = %job_id,
            priority = job.priority.as_str(),
            file = %job.original_filename,
            "Job submitted"
        );
        self.inner.state.lock().enqueue(job);
        job_id
    }

    pub fn get_job_status(&self, job_id: Uuid) -> Option<ProcessingJob> {
        let state = self.inner.state.lock();
        state
            .active
            .get(&job_id)
            .or_else(|| state.completed.get(&job_id))
            .or_else(|| state.queue.iter().find(|j| j.job_id == job_id))
            .cloned()
    }

    /// Cancels a job that has not started yet. Returns false for unknown,
    /// running or finished jobs.
    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        let mut state = self.inner.state.lock();
        let Some(idx) = state.queue.iter().position(|j| j.job_id == job_id) else {
            return false;
        };
        let Some(mut job) = state.queue.remove(idx) else {
            return false;
        };
        job.mark_cancelled();
        state.stats.total_cancelled += 1;
        state.completed.insert(job_id, job);
        info!(job_id = %job_id, "Job cancelled");
        true
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let queued_by_priority = JobPriority::ALL
            .iter()
            .map(|p| {
                let depth = state.queue.iter().filter(|j| j.priority == *p).count();
                (p.as_str(), depth)
            })
            .collect();

        QueueStats {
            running: self.is_running(),
            max_concurrent_jobs: self.inner.config.max_concurrent_jobs,
            queued_jobs: state.queue.len(),
            active_jobs: state.active.len(),
            completed_jobs: state.completed.len(),
            queued_by_priority,
            stats: state.stats.clone(),
        }
    }

    pub fn on<F>(&self, event: JobEvent, callback: F)
    where
        F: Fn(&ProcessingJob) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .entry(event)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Drops finished jobs older than `max_age`; returns how many.
    #[cfg(test)]
    pub fn cleanup_completed_jobs(&self, max_age: Duration) -> usize {
        self.inner.cleanup_completed_jobs(max_age)
    }
}

impl Inner {
    fn fire(&self, event: JobEvent, job: &ProcessingJob) {
        let callbacks = self
            .callbacks
            .read()
            .get(&event)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(job)));
            if outcome.is_err() {
                error!(job_id = %job.job_id, ?event, "Job callback panicked");
            }
        }
    }

    fn cleanup_completed_jobs(&self, max_age: Duration) -> usize {
        let max_age = match chrono::Duration::from_std(max_age) {
            Ok(age) => age,
            Err(e) => {
                warn!("Invalid job retention ({e}); skipping sweep");
                return 0;
            }
        };
        let cutoff = chrono::Utc::now() - max_age;

        let mut state = self.state.lock();
        let before = state.completed.len();
        state
            .completed
            .retain(|_, job| job.completed_at.unwrap_or(job.created_at) >= cutoff);
        before - state.completed.len()
    }

    /// Cache lookup, extraction on miss, then text processing. The processed
    /// text and AI-ready projection ride along in the result metadata.
    async fn process(&self, job: &ProcessingJob) -> Result<ExtractionResult, JobFailure> {
        if !tokio::fs::try_exists(&job.file_path).await.unwrap_or(false) {
            return Err(JobFailure::permanent(format!(
                "File not found: {}",
                job.file_path.display()
            )));
        }

        let mut result = match self.cache.get(&job.file_path, &job.mime_type).await {
            Some(mut cached) => {
                debug!(job_id = %job.job_id, "Using cached extraction");
                cached.metadata.insert("cache_hit".into(), true.into());
                cached
            }
            None => {
                let file_size = tokio::fs::metadata(&job.file_path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                let info = FileInfo::new(job.mime_type.clone(), file_size);
                let timeout = Duration::from_secs(job.timeout_seconds);
                let extracted = self
                    .extraction
                    .extract_text_from_file(&job.file_path, &info, timeout)
                    .await;

                if !extracted.is_success() {
                    return Err(JobFailure {
                        message: extracted
                            .error_message
                            .clone()
                            .unwrap_or_else(|| "Extraction produced no text".into()),
                        details: Some(json!({
                            "extraction_status": extracted.status,
                            "processing_time_seconds": extracted.processing_time_seconds,
                        })),
                        retryable: !extracted.is_permanent_failure(),
                    });
                }

                self.cache
                    .store(&job.file_path, &job.mime_type, &extracted, None)
                    .await;
                let mut fresh = extracted;
                fresh.metadata.insert("cache_hit".into(), false.into());
                fresh
            }
        };

        let raw_text = result.extracted_text.clone().unwrap_or_default();
        let processed = self.text_processor.process_text(&raw_text);
        let ai_ready = self.text_processor.get_ai_ready_format(&processed);

        let to_value = |v: serde_json::Result<Value>| {
            v.map_err(|e| JobFailure {
                message: format!("Failed to serialize processed text: {e}"),
                details: None,
                retryable: false,
            })
        };
        result.metadata.insert(
            "processed_text".into(),
            to_value(serde_json::to_value(&processed))?,
        );
        result
            .metadata
            .insert("ai_ready_data".into(), to_value(serde_json::to_value(&ai_ready))?);

        Ok(result)
    }
}

async fn run_scheduler(inner: Arc<Inner>) {
    debug!("Scheduler loop running");
    while inner.running.load(Ordering::SeqCst) {
        let next = {
            let mut state = inner.state.lock();
            if state.active.len() < inner.config.max_concurrent_jobs {
                state.queue.pop_front().map(|mut job| {
                    job.mark_processing();
                    state.active.insert(job.job_id, job.clone());
                    job
                })
            } else {
                None
            }
        };

        match next {
            Some(job) => {
                tokio::spawn(run_job(inner.clone(), job));
            }
            None => tokio::time::sleep(inner.config.poll_interval).await,
        }
    }
}

async fn run_cleanup(inner: Arc<Inner>) {
    loop {
        tokio::time::sleep(inner.config.cleanup_interval).await;
        let removed = inner.cleanup_completed_jobs(inner.config.job_retention);
        if removed > 0 {
            info!(removed, "Swept finished jobs");
        }
    }
}

/// Runs one attempt of `job`. Whatever happens inside, the job leaves the
/// active map exactly once: back onto the queue for a retry, or into the
/// completed map with stats updated.
async fn run_job(inner: Arc<Inner>, mut job: ProcessingJob) {
    inner.fire(JobEvent::Started, &job);
    debug!(job_id = %job.job_id, attempt = job.retry_count + 1, "Job started");

    let limit = Duration::from_secs(job.timeout_seconds) + PROCESSING_TIMEOUT_MARGIN;
    let attempt = AssertUnwindSafe(tokio::time::timeout(limit, inner.process(&job)))
        .catch_unwind()
        .await;

    let retryable = match attempt {
        Ok(Ok(Ok(result))) => {
            job.mark_completed(result);
            false
        }
        Ok(Ok(Err(failure))) => {
            job.mark_failed(failure.message, failure.details);
            failure.retryable
        }
        Ok(Err(_elapsed)) => {
            job.mark_failed(
                "Processing timeout exceeded",
                Some(json!({ "limit_seconds": limit.as_secs() })),
            );
            false
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            job.mark_failed(
                format!("Unexpected error: {message}"),
                Some(json!({ "error_type": "panic", "message": message })),
            );
            true
        }
    };

    inner.state.lock().active.insert(job.job_id, job.clone());

    if job.status == JobStatus::Completed {
        info!(job_id = %job.job_id, "Job completed");
        inner.fire(JobEvent::Completed, &job);
    } else {
        warn!(
            job_id = %job.job_id,
            error = job.error_message.as_deref().unwrap_or(""),
            "Job failed"
        );
        inner.fire(JobEvent::Failed, &job);
    }

    if retryable && job.should_retry() {
        info!(
            job_id = %job.job_id,
            retry = job.retry_count + 1,
            max_retries = job.max_retries,
            "Retrying in {}s",
            job.retry_delay_seconds
        );
        tokio::time::sleep(Duration::from_secs(job.retry_delay_seconds)).await;
        job.prepare_retry();

        let mut state = inner.state.lock();
        state.active.remove(&job.job_id);
        state.stats.total_retries += 1;
        state.enqueue(job);
        return;
    }

    let mut state = inner.state.lock();
    state.active.remove(&job.job_id);
    state.stats.record(&job);
    state.completed.insert(job.job_id, job);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;
    use crate::extraction::test_support::{FlakyExtractor, PlainTextExtractor, SlowExtractor};
    use crate::extraction::{TextExtractor, MIME_PDF};

    const RESUME: &str = "Jane Doe\njane@example.com\n\nEXPERIENCE\nRust engineer at Acme\n";

    fn test_config() -> ProcessorConfig {
        ProcessorConfig {
            max_concurrent_jobs: 1,
            poll_interval: Duration::from_millis(10),
            stop_grace_period: Duration::from_secs(2),
            default_retry_delay_seconds: 0,
            ..ProcessorConfig::default()
        }
    }

    fn processor_with(extractor: Arc<dyn TextExtractor>) -> BackgroundProcessor {
        BackgroundProcessor::new(
            test_config(),
            TextExtractionService::with_extractors(vec![extractor]),
            Arc::new(ExtractionCache::in_memory(24)),
        )
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn submission(path: PathBuf, name: &str) -> JobSubmission {
        JobSubmission::new("user-1", Uuid::new_v4(), path, name, MIME_PDF)
    }

    /// Waits until the job has left the active map for good.
    async fn wait_finished(processor: &BackgroundProcessor, job_id: Uuid) -> ProcessingJob {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(job) = processor.inner.state.lock().completed.get(&job_id) {
                return job.clone();
            }
            assert!(Instant::now() < deadline, "job {job_id} never finished");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_queue_orders_by_priority_then_submission() {
        let processor = processor_with(Arc::new(PlainTextExtractor));
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "r.pdf", RESUME);

        let normal = processor.submit_job(
            submission(path.clone(), "normal").with_priority(JobPriority::Normal),
        );
        let urgent = processor.submit_job(
            submission(path.clone(), "urgent").with_priority(JobPriority::Urgent),
        );
        let low =
            processor.submit_job(submission(path.clone(), "low").with_priority(JobPriority::Low));
        let normal2 = processor.submit_job(
            submission(path.clone(), "normal2").with_priority(JobPriority::Normal),
        );

        let order: Vec<Uuid> = processor
            .inner
            .state
            .lock()
            .queue
            .iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(order, vec![urgent, normal, normal2, low]);

        let stats = processor.get_queue_stats();
        assert_eq!(stats.queued_jobs, 4);
        assert_eq!(stats.queued_by_priority["normal"], 2);
        assert_eq!(stats.queued_by_priority["high"], 0);
    }

    #[tokio::test]
    async fn test_jobs_start_in_priority_order() {
        let processor = processor_with(Arc::new(PlainTextExtractor));
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "r.pdf", RESUME);

        let started = Arc::new(Mutex::new(Vec::new()));
        let seen = started.clone();
        processor.on(JobEvent::Started, move |job| {
            seen.lock().push(job.original_filename.clone());
        });

        let ids: Vec<Uuid> = [
            ("normal", JobPriority::Normal),
            ("urgent", JobPriority::Urgent),
            ("low", JobPriority::Low),
        ]
        .into_iter()
        .map(|(name, p)| processor.submit_job(submission(path.clone(), name).with_priority(p)))
        .collect();

        processor.start();
        for id in &ids {
            wait_finished(&processor, *id).await;
        }
        processor.stop().await;

        assert_eq!(*started.lock(), vec!["urgent", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_successful_job_carries_processed_text() {
        let processor = processor_with(Arc::new(PlainTextExtractor));
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "r.pdf", RESUME);

        processor.start();
        let id = processor.submit_job(submission(path, "r.pdf"));
        let job = wait_finished(&processor, id).await;
        processor.stop().await;

        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        let result = job.extraction_result.unwrap();
        assert!(result.is_success());
        assert_eq!(result.metadata["cache_hit"], false);
        assert!(result.metadata.contains_key("processed_text"));
        assert_eq!(
            result.metadata["ai_ready_data"]["metadata"]["contact_info"]["emails"][0],
            "jane@example.com"
        );
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_then_completes() {
        let processor = processor_with(Arc::new(FlakyExtractor::new(1)));
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "r.pdf", RESUME);

        let failures = Arc::new(Mutex::new(0));
        let counter = failures.clone();
        processor.on(JobEvent::Failed, move |_| *counter.lock() += 1);

        processor.start();
        let id = processor.submit_job(submission(path, "r.pdf").with_retries(2, 0));
        let job = wait_finished(&processor, id).await;
        processor.stop().await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 1);
        assert!(job.last_retry_at.is_some());
        assert_eq!(*failures.lock(), 1);

        let stats = processor.get_queue_stats().stats;
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.total_succeeded, 1);
        assert_eq!(stats.total_retries, 1);
    }

    #[tokio::test]
    async fn test_extraction_timeout_fails_without_retry() {
        let processor = processor_with(Arc::new(SlowExtractor {
            delay: Duration::from_secs(3),
        }));
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "r.pdf", RESUME);

        processor.start();
        let id = processor.submit_job(
            submission(path, "r.pdf")
                .with_timeout(1)
                .with_retries(3, 0),
        );
        let job = wait_finished(&processor, id).await;
        processor.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.as_deref().unwrap().contains("timeout"));
        assert!(!job.should_retry());
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_retried() {
        let processor = processor_with(Arc::new(PlainTextExtractor));

        processor.start();
        let id = processor.submit_job(
            submission(PathBuf::from("/no/such/resume.pdf"), "gone.pdf").with_retries(3, 0),
        );
        let job = wait_finished(&processor, id).await;
        processor.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
        assert!(job.error_message.unwrap().contains("File not found"));
        assert_eq!(processor.get_queue_stats().stats.total_failed, 1);
    }

    #[tokio::test]
    async fn test_second_job_for_same_content_hits_cache() {
        let processor = processor_with(Arc::new(PlainTextExtractor));
        let dir = TempDir::new().unwrap();
        let first_path = write_file(&dir, "a.pdf", RESUME);
        let second_path = write_file(&dir, "b.pdf", RESUME);

        processor.start();
        let first = processor.submit_job(submission(first_path, "a.pdf"));
        wait_finished(&processor, first).await;
        let second = processor.submit_job(submission(second_path, "b.pdf"));
        let job = wait_finished(&processor, second).await;
        processor.stop().await;

        let result = job.extraction_result.unwrap();
        assert_eq!(result.metadata["cache_hit"], true);
        assert!(result.metadata.contains_key("ai_ready_data"));
    }

    #[tokio::test]
    async fn test_cancel_only_queued_jobs() {
        let processor = processor_with(Arc::new(PlainTextExtractor));
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "r.pdf", RESUME);

        let id = processor.submit_job(submission(path, "r.pdf"));
        assert!(processor.cancel_job(id));
        assert!(!processor.cancel_job(id));
        assert!(!processor.cancel_job(Uuid::new_v4()));

        let job = processor.get_job_status(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());
        assert!(job.started_at.is_none());
        assert_eq!(processor.get_queue_stats().queued_jobs, 0);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_affect_job() {
        let processor = processor_with(Arc::new(PlainTextExtractor));
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "r.pdf", RESUME);
        processor.on(JobEvent::Started, |_| panic!("callback bug"));

        processor.start();
        let id = processor.submit_job(submission(path, "r.pdf"));
        let job = wait_finished(&processor, id).await;
        processor.stop().await;

        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_finished_jobs() {
        let processor = processor_with(Arc::new(PlainTextExtractor));
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "r.pdf", RESUME);

        let old = processor.submit_job(submission(path.clone(), "old.pdf"));
        let recent = processor.submit_job(submission(path, "recent.pdf"));
        processor.cancel_job(old);
        processor.cancel_job(recent);

        if let Some(job) = processor.inner.state.lock().completed.get_mut(&old) {
            job.completed_at = Some(chrono::Utc::now() - chrono::Duration::hours(25));
        }

        let removed = processor.cleanup_completed_jobs(Duration::from_secs(24 * 3600));
        assert_eq!(removed, 1);
        assert!(processor.get_job_status(old).is_none());
        assert!(processor.get_job_status(recent).is_some());
    }

    #[tokio::test]
    async fn test_start_twice_and_stop() {
        let processor = processor_with(Arc::new(PlainTextExtractor));
        processor.start();
        processor.start();
        assert_eq!(processor.tasks.lock().len(), 2);
        assert!(processor.is_running());

        processor.stop().await;
        assert!(!processor.is_running());
        assert!(processor.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_returns_after_grace_period_with_job_in_flight() {
        let processor = BackgroundProcessor::new(
            ProcessorConfig {
                stop_grace_period: Duration::from_millis(100),
                ..test_config()
            },
            TextExtractionService::with_extractors(vec![Arc::new(SlowExtractor {
                delay: Duration::from_millis(1500),
            })]),
            Arc::new(ExtractionCache::in_memory(24)),
        );
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "r.pdf", RESUME);

        processor.start();
        let id = processor.submit_job(submission(path, "r.pdf"));
        let deadline = Instant::now() + Duration::from_secs(5);
        while processor.inner.state.lock().active.is_empty() {
            assert!(Instant::now() < deadline, "job never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let started = Instant::now();
        processor.stop().await;
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(!processor.is_running());
        assert_eq!(
            processor.get_job_status(id).unwrap().status,
            JobStatus::Processing
        );
    }
}
