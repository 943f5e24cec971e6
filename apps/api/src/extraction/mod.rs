//! Text extraction: turns uploaded resume bytes (PDF, DOCX, DOC) into plain text.
//!
//! Extractors implement `TextExtractor` and are scanned in registry order; the
//! first one whose `supports_file_type` accepts the declared MIME type wins.
//! Extraction failures never escape as errors: `TextExtractionService` always
//! returns an `ExtractionResult` describing what happened.

pub mod doc;
pub mod docx;
pub mod file_info;
pub mod pdf;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub use file_info::FileInfo;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";

const PERMANENT_FAILURE_KEY: &str = "permanent_failure";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No text content: {0}")]
    NoText(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Completed,
    Failed,
    Timeout,
}

/// Outcome of a single extraction attempt. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    pub status: ExtractionStatus,
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub error_message: Option<String>,
    pub processing_time_seconds: f64,
}

impl ExtractionResult {
    pub fn completed(text: String, metadata: Map<String, Value>, elapsed: Duration) -> Self {
        Self {
            status: ExtractionStatus::Completed,
            extracted_text: Some(text),
            metadata,
            error_message: None,
            processing_time_seconds: elapsed.as_secs_f64(),
        }
    }

    pub fn failed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: ExtractionStatus::Failed,
            extracted_text: None,
            metadata: Map::new(),
            error_message: Some(message.into()),
            processing_time_seconds: elapsed.as_secs_f64(),
        }
    }

    pub fn timed_out(timeout: Duration, elapsed: Duration) -> Self {
        Self {
            status: ExtractionStatus::Timeout,
            extracted_text: None,
            metadata: Map::new(),
            error_message: Some(format!(
                "Extraction timeout after {} seconds",
                timeout.as_secs()
            )),
            processing_time_seconds: elapsed.as_secs_f64(),
        }
    }

    /// Marks a failure that re-running cannot fix (missing file, unsupported
    /// format, empty content).
    pub fn permanent(mut self) -> Self {
        self.metadata.insert(PERMANENT_FAILURE_KEY.into(), true.into());
        self
    }

    pub fn is_permanent_failure(&self) -> bool {
        self.metadata
            .get(PERMANENT_FAILURE_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// True only for a completed extraction that produced non-blank text.
    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Completed
            && self
                .extracted_text
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
    }
}

/// Text produced by an extractor plus format-specific metadata.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub text: String,
    pub method: String,
    pub metadata: Map<String, Value>,
}

/// Uniform "bytes → text" contract implemented by every format extractor.
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports_file_type(&self, mime_type: &str) -> bool;
    fn supported_mime_types(&self) -> &'static [&'static str];
    fn extract_text(&self, data: &[u8]) -> Result<ExtractedText, ExtractionError>;
}

/// Dispatches files to the matching extractor and enforces a timeout.
#[derive(Clone)]
pub struct TextExtractionService {
    extractors: Vec<Arc<dyn TextExtractor>>,
}

impl Default for TextExtractionService {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractionService {
    /// Registry order: PDF, DOCX, DOC.
    pub fn new() -> Self {
        Self::with_extractors(vec![
            Arc::new(pdf::PdfExtractor),
            Arc::new(docx::DocxExtractor),
            Arc::new(doc::DocExtractor),
        ])
    }

    pub fn with_extractors(extractors: Vec<Arc<dyn TextExtractor>>) -> Self {
        Self { extractors }
    }

    pub fn supported_mime_types(&self) -> Vec<&'static str> {
        self.extractors
            .iter()
            .flat_map(|e| e.supported_mime_types().iter().copied())
            .collect()
    }

    fn extractor_for(&self, mime_type: &str) -> Option<Arc<dyn TextExtractor>> {
        self.extractors
            .iter()
            .find(|e| e.supports_file_type(mime_type))
            .cloned()
    }

    /// Extracts text from `file_path`. Always returns a result; never an error.
    pub async fn extract_text_from_file(
        &self,
        file_path: &Path,
        file_info: &FileInfo,
        timeout: Duration,
    ) -> ExtractionResult {
        let started = Instant::now();

        if !tokio::fs::try_exists(file_path).await.unwrap_or(false) {
            return ExtractionResult::failed(
                format!("File not found: {}", file_path.display()),
                started.elapsed(),
            )
            .permanent();
        }

        let Some(extractor) = self.extractor_for(&file_info.file_type) else {
            return ExtractionResult::failed(
                format!("No extractor available for file type: {}", file_info.file_type),
                started.elapsed(),
            )
            .permanent();
        };

        let data = match tokio::fs::read(file_path).await {
            Ok(d) => d,
            Err(e) => {
                return ExtractionResult::failed(
                    format!("Failed to read file: {e}"),
                    started.elapsed(),
                )
            }
        };

        if data.is_empty() {
            return ExtractionResult::failed("File is empty", started.elapsed()).permanent();
        }

        let file_size = data.len();
        let name = extractor.name();
        debug!(extractor = name, file = %file_path.display(), "Starting text extraction");

        // Extractors are CPU-bound; keep them off the async workers.
        let task = tokio::task::spawn_blocking(move || extractor.extract_text(&data));

        let outcome = match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    extractor = name,
                    file = %file_path.display(),
                    "Text extraction exceeded {}s",
                    timeout.as_secs()
                );
                return ExtractionResult::timed_out(timeout, started.elapsed());
            }
        };

        match outcome {
            Ok(Ok(extracted)) if !extracted.text.trim().is_empty() => {
                let mut metadata = extracted.metadata;
                metadata.insert("extraction_method".into(), extracted.method.into());
                metadata.insert(
                    "character_count".into(),
                    extracted.text.chars().count().into(),
                );
                metadata.insert(
                    "word_count".into(),
                    extracted.text.split_whitespace().count().into(),
                );
                metadata.insert("file_size".into(), file_size.into());
                metadata.insert("mime_type".into(), file_info.file_type.clone().into());
                ExtractionResult::completed(extracted.text, metadata, started.elapsed())
            }
            Ok(Ok(_)) => ExtractionResult::failed(
                "No text could be extracted from the document",
                started.elapsed(),
            )
            .permanent(),
            Ok(Err(e)) => {
                warn!(extractor = name, "Extraction failed: {e}");
                let result = ExtractionResult::failed(e.to_string(), started.elapsed());
                match e {
                    ExtractionError::UnsupportedFormat(_) | ExtractionError::NoText(_) => {
                        result.permanent()
                    }
                    ExtractionError::Parse(_) | ExtractionError::Io(_) => result,
                }
            }
            Err(join_err) => {
                warn!(extractor = name, "Extractor task aborted: {join_err}");
                ExtractionResult::failed(
                    format!("Extractor crashed: {join_err}"),
                    started.elapsed(),
                )
            }
        }
    }

    /// Extracts each file independently; one bad file never fails the batch.
    pub async fn extract_batch(
        &self,
        items: &[(PathBuf, FileInfo)],
        timeout: Duration,
    ) -> Vec<ExtractionResult> {
        let mut results = Vec::with_capacity(items.len());
        for (path, info) in items {
            results.push(self.extract_text_from_file(path, info, timeout).await);
        }
        results
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Accepts every MIME type and returns the file contents as UTF-8.
    pub struct PlainTextExtractor;

    impl TextExtractor for PlainTextExtractor {
        fn name(&self) -> &'static str {
            "plain"
        }
        fn supports_file_type(&self, _mime_type: &str) -> bool {
            true
        }
        fn supported_mime_types(&self) -> &'static [&'static str] {
            &["text/plain"]
        }
        fn extract_text(&self, data: &[u8]) -> Result<ExtractedText, ExtractionError> {
            Ok(ExtractedText {
                text: String::from_utf8_lossy(data).into_owned(),
                method: "plain".into(),
                metadata: Map::new(),
            })
        }
    }

    /// Fails the first `failures` calls, then behaves like `PlainTextExtractor`.
    pub struct FlakyExtractor {
        pub failures: usize,
        pub calls: AtomicUsize,
    }

    impl FlakyExtractor {
        pub fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TextExtractor for FlakyExtractor {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn supports_file_type(&self, _mime_type: &str) -> bool {
            true
        }
        fn supported_mime_types(&self) -> &'static [&'static str] {
            &[MIME_PDF]
        }
        fn extract_text(&self, data: &[u8]) -> Result<ExtractedText, ExtractionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ExtractionError::Parse("transient".into()));
            }
            PlainTextExtractor.extract_text(data)
        }
    }

    /// Blocks for `delay` before returning text.
    pub struct SlowExtractor {
        pub delay: Duration,
    }

    impl TextExtractor for SlowExtractor {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn supports_file_type(&self, _mime_type: &str) -> bool {
            true
        }
        fn supported_mime_types(&self) -> &'static [&'static str] {
            &[MIME_PDF]
        }
        fn extract_text(&self, data: &[u8]) -> Result<ExtractedText, ExtractionError> {
            std::thread::sleep(self.delay);
            PlainTextExtractor.extract_text(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::test_support::*;
    use super::*;

    fn info(mime: &str, size: u64) -> FileInfo {
        FileInfo {
            file_type: mime.to_string(),
            file_size: size,
            is_valid: true,
        }
    }

    #[test]
    fn test_is_success_requires_non_empty_text() {
        let ok = ExtractionResult::completed("text".into(), Map::new(), Duration::ZERO);
        assert!(ok.is_success());

        let blank = ExtractionResult::completed("   ".into(), Map::new(), Duration::ZERO);
        assert!(!blank.is_success());

        let failed = ExtractionResult::failed("boom", Duration::ZERO);
        assert!(!failed.is_success());
    }

    #[tokio::test]
    async fn test_missing_file_is_failed_result() {
        let service = TextExtractionService::new();
        let result = service
            .extract_text_from_file(
                Path::new("/definitely/not/here.pdf"),
                &info(MIME_PDF, 10),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(result.status, ExtractionStatus::Failed);
        assert!(result.is_permanent_failure());
        assert!(result.error_message.unwrap().contains("File not found"));
    }

    #[tokio::test]
    async fn test_unknown_mime_reports_no_extractor() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "hello").unwrap();

        let service = TextExtractionService::new();
        let result = service
            .extract_text_from_file(file.path(), &info("image/png", 5), Duration::from_secs(5))
            .await;
        assert_eq!(result.status, ExtractionStatus::Failed);
        assert!(result
            .error_message
            .unwrap()
            .contains("No extractor available"));
    }

    #[tokio::test]
    async fn test_zero_byte_file_fails() {
        let file = NamedTempFile::new().unwrap();
        let service = TextExtractionService::new();
        let result = service
            .extract_text_from_file(file.path(), &info(MIME_PDF, 0), Duration::from_secs(5))
            .await;
        assert_eq!(result.status, ExtractionStatus::Failed);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_successful_extraction_records_metadata() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "Jane Doe\nRust engineer").unwrap();

        let service = TextExtractionService::with_extractors(vec![Arc::new(PlainTextExtractor)]);
        let result = service
            .extract_text_from_file(file.path(), &info("text/plain", 22), Duration::from_secs(5))
            .await;

        assert!(result.is_success());
        assert_eq!(result.metadata["extraction_method"], "plain");
        assert_eq!(result.metadata["word_count"], 4);
        assert_eq!(result.metadata["mime_type"], "text/plain");
    }

    #[tokio::test]
    async fn test_extractor_error_becomes_failed_result() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "content").unwrap();

        let service =
            TextExtractionService::with_extractors(vec![Arc::new(FlakyExtractor::new(1))]);
        let result = service
            .extract_text_from_file(file.path(), &info(MIME_PDF, 7), Duration::from_secs(5))
            .await;
        assert_eq!(result.status, ExtractionStatus::Failed);
        assert!(!result.is_permanent_failure());
        assert!(result.error_message.unwrap().contains("transient"));
    }

    #[tokio::test]
    async fn test_slow_extractor_times_out() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "content").unwrap();

        let service = TextExtractionService::with_extractors(vec![Arc::new(SlowExtractor {
            delay: Duration::from_millis(1500),
        })]);
        let result = service
            .extract_text_from_file(file.path(), &info(MIME_PDF, 7), Duration::from_millis(200))
            .await;
        assert_eq!(result.status, ExtractionStatus::Timeout);
        assert!(result.error_message.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_batch_reports_each_item() {
        let mut good = NamedTempFile::new().unwrap();
        write!(good, "some text").unwrap();
        let empty = NamedTempFile::new().unwrap();

        let service = TextExtractionService::with_extractors(vec![Arc::new(PlainTextExtractor)]);
        let items = vec![
            (good.path().to_path_buf(), info("text/plain", 9)),
            (empty.path().to_path_buf(), info("text/plain", 0)),
        ];
        let results = service.extract_batch(&items, Duration::from_secs(5)).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert_eq!(results[1].status, ExtractionStatus::Failed);
    }

    #[test]
    fn test_default_registry_mime_types() {
        let types = TextExtractionService::new().supported_mime_types();
        assert!(types.contains(&MIME_PDF));
        assert!(types.contains(&MIME_DOCX));
        assert!(types.contains(&MIME_DOC));
    }
}
