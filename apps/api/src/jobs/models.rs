use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::extraction::ExtractionResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    pub const ALL: [JobPriority; 4] = [
        JobPriority::Urgent,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ];

    /// Queue rank; higher runs first.
    pub fn score(&self) -> u8 {
        match self {
            JobPriority::Low => 1,
            JobPriority::Normal => 2,
            JobPriority::High => 3,
            JobPriority::Urgent => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(JobPriority::Low),
            "normal" => Some(JobPriority::Normal),
            "high" => Some(JobPriority::High),
            "urgent" => Some(JobPriority::Urgent),
            _ => None,
        }
    }
}

/// What a caller hands to `BackgroundProcessor::submit_job`. Unset
/// scheduling fields take the processor's configured defaults.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub user_id: String,
    pub upload_id: Uuid,
    pub file_path: PathBuf,
    pub original_filename: String,
    pub mime_type: String,
    pub priority: JobPriority,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
}

impl JobSubmission {
    pub fn new(
        user_id: impl Into<String>,
        upload_id: Uuid,
        file_path: impl Into<PathBuf>,
        original_filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            upload_id,
            file_path: file_path.into(),
            original_filename: original_filename.into(),
            mime_type: mime_type.into(),
            priority: JobPriority::Normal,
            timeout_seconds: None,
            max_retries: None,
            retry_delay_seconds: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    #[cfg(test)]
    pub fn with_retries(mut self, max_retries: u32, retry_delay_seconds: u64) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay_seconds = Some(retry_delay_seconds);
        self
    }
}

/// One file's text extraction as tracked by the processor.
///
/// Timestamps follow the status: `started_at` is stamped the first time the
/// job enters `processing`, `completed_at` exists only while the status is
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingJob {
    pub job_id: Uuid,
    pub user_id: String,
    pub upload_id: Uuid,

    pub file_path: PathBuf,
    pub original_filename: String,
    pub mime_type: String,

    pub priority: JobPriority,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,

    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub extraction_result: Option<ExtractionResult>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,

    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    pub fn new(
        submission: JobSubmission,
        timeout_seconds: u64,
        max_retries: u32,
        retry_delay_seconds: u64,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            user_id: submission.user_id,
            upload_id: submission.upload_id,
            file_path: submission.file_path,
            original_filename: submission.original_filename,
            mime_type: submission.mime_type,
            priority: submission.priority,
            timeout_seconds,
            max_retries,
            retry_delay_seconds,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            extraction_result: None,
            error_message: None,
            error_details: None,
            retry_count: 0,
            last_retry_at: None,
        }
    }

    pub fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.started_at.get_or_insert_with(Utc::now);
        self.completed_at = None;
    }

    pub fn mark_completed(&mut self, result: ExtractionResult) {
        self.status = JobStatus::Completed;
        self.extraction_result = Some(result);
        self.error_message = None;
        self.error_details = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, details: Option<Value>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.error_details = details;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Puts a failed job back in line for another attempt.
    pub fn prepare_retry(&mut self) {
        self.status = JobStatus::Queued;
        self.retry_count += 1;
        self.last_retry_at = Some(Utc::now());
        self.completed_at = None;
    }

    /// Timeouts are never retried: they point at input size or resource
    /// limits rather than a passing fault.
    pub fn should_retry(&self) -> bool {
        self.status == JobStatus::Failed
            && self.retry_count < self.max_retries
            && !self
                .error_message
                .as_deref()
                .is_some_and(|m| m.to_lowercase().contains("timeout"))
    }

    /// Wall-clock seconds between first start and completion.
    pub fn processing_time_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
            }
            _ => None,
        }
    }
}
