//! Batch validation engine
//!
//! File reads are async; schema compilation and libxml2 validation are CPU-bound and run
//! on the blocking pool. A semaphore bounds the number of files in flight and every file
//! gets its own timeout.

use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::cache::{SchemaContextCache, ValidationContext};
use crate::error::{Result, ValidationError};
use crate::file_discovery::FileDiscovery;
use crate::namespace::NamespaceRegistry;
use crate::policy::{Action, ValidationOutcomePolicy};
use crate::receipt::{ReceiptOutcome, ReceiptValidator};

/// Validation configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    /// Number of files validated concurrently
    pub max_concurrent_validations: usize,
    /// Timeout for one file
    pub validation_timeout: Duration,
    /// Schema group for whole-document validation
    pub context: ValidationContext,
    /// Run the receipt check instead of whole-document validation
    pub receipt: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_validations: num_cpus::get(),
            validation_timeout: Duration::from_secs(30),
            context: ValidationContext::SignalMessage,
            receipt: false,
        }
    }
}

/// Status of a single file validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Passed every check that ran
    Valid,
    /// Not well-formed or not schema-valid
    Invalid { error_count: usize },
    /// Schema-valid but breaks a receipt profile rule
    NonConformant { ebms_code: String, message: String },
    /// The validator itself failed on this file
    Error { message: String },
    /// Nothing was checked
    Skipped { reason: String },
}

impl ValidationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationStatus::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationStatus::Invalid { .. })
    }

    pub fn is_non_conformant(&self) -> bool {
        matches!(self, ValidationStatus::NonConformant { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationStatus::Error { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ValidationStatus::Skipped { .. })
    }
}

/// Result of validating a single file
#[derive(Debug, Clone, Serialize)]
pub struct FileValidationResult {
    pub path: PathBuf,
    pub status: ValidationStatus,
    /// What the outcome policy decided for this file
    pub action: Action,
    pub duration: Duration,
    /// Rendered diagnostics or the failure message
    pub error_details: Vec<String>,
}

impl FileValidationResult {
    pub fn valid(path: PathBuf, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Valid,
            action: Action::Continue,
            duration,
            error_details: Vec::new(),
        }
    }

    pub fn error(path: PathBuf, error: ValidationError, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Error {
                message: error.to_string(),
            },
            action: Action::Continue,
            duration,
            error_details: vec![error.to_string()],
        }
    }

    pub fn skipped(path: PathBuf, reason: impl Into<String>, duration: Duration) -> Self {
        let reason = reason.into();
        Self {
            path,
            status: ValidationStatus::Skipped {
                reason: reason.clone(),
            },
            action: Action::Continue,
            duration,
            error_details: vec![reason],
        }
    }

    /// Result for a finding about the message, with the decided action
    pub fn failed(path: PathBuf, error: &ValidationError, action: Action, duration: Duration) -> Self {
        let (status, error_details) = match error {
            ValidationError::StructuralValidationFailure { errors, .. } => (
                ValidationStatus::Invalid {
                    error_count: errors.len(),
                },
                errors.iter().map(ToString::to_string).collect(),
            ),
            ValidationError::Document(err) => (
                ValidationStatus::Invalid { error_count: 1 },
                vec![err.to_string()],
            ),
            other => (
                ValidationStatus::NonConformant {
                    ebms_code: other.ebms_code().unwrap_or_default().to_string(),
                    message: other.to_string(),
                },
                vec![other.to_string()],
            ),
        };

        Self {
            path,
            status,
            action,
            duration,
            error_details,
        }
    }
}

/// Aggregated results of validating multiple files
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResults {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub non_conformant_files: usize,
    pub error_files: usize,
    pub skipped_files: usize,
    /// Files whose failure the policy decided to abort on
    pub aborted_files: usize,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub file_results: Vec<FileValidationResult>,
}

impl ValidationResults {
    /// Aggregate individual file results into summary
    pub fn aggregate(file_results: Vec<FileValidationResult>) -> Self {
        let total_files = file_results.len();
        let mut results = Self {
            total_files,
            valid_files: 0,
            invalid_files: 0,
            non_conformant_files: 0,
            error_files: 0,
            skipped_files: 0,
            aborted_files: 0,
            total_duration: Duration::ZERO,
            average_duration: Duration::ZERO,
            file_results: Vec::new(),
        };

        for result in &file_results {
            match result.status {
                ValidationStatus::Valid => results.valid_files += 1,
                ValidationStatus::Invalid { .. } => results.invalid_files += 1,
                ValidationStatus::NonConformant { .. } => results.non_conformant_files += 1,
                ValidationStatus::Error { .. } => results.error_files += 1,
                ValidationStatus::Skipped { .. } => results.skipped_files += 1,
            }
            if result.action == Action::Abort {
                results.aborted_files += 1;
            }
            results.total_duration += result.duration;
        }

        if total_files > 0 {
            results.average_duration = results.total_duration / total_files as u32;
        }
        results.file_results = file_results;
        results
    }

    /// Any message finding, whatever the policy decided
    pub fn has_failures(&self) -> bool {
        self.invalid_files > 0 || self.non_conformant_files > 0
    }

    pub fn has_errors(&self) -> bool {
        self.error_files > 0
    }

    /// 1 when a file was aborted on or errored, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.aborted_files > 0 || self.has_errors() {
            1
        } else {
            0
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.valid_files as f64 / self.total_files as f64) * 100.0
        }
    }
}

/// Concurrent validation of message files
pub struct ValidationEngine {
    cache: Arc<SchemaContextCache>,
    receipts: Arc<ReceiptValidator>,
    policy: ValidationOutcomePolicy,
    config: ValidationConfig,
}

impl ValidationEngine {
    pub fn new(
        cache: Arc<SchemaContextCache>,
        namespaces: Arc<NamespaceRegistry>,
        policy: ValidationOutcomePolicy,
        config: ValidationConfig,
    ) -> Self {
        let receipts = Arc::new(ReceiptValidator::new(
            Arc::clone(&cache),
            namespaces,
            policy,
        ));

        Self {
            cache,
            receipts,
            policy,
            config,
        }
    }

    /// Discover and validate every matching file below `path`
    pub async fn validate_path(
        &self,
        path: &Path,
        file_discovery: &FileDiscovery,
    ) -> Result<ValidationResults> {
        let files = file_discovery.discover_files(path).await?;
        debug!(files = files.len(), path = %path.display(), "discovered files");

        let results = self.validate_files(files).await?;
        Ok(ValidationResults::aggregate(results))
    }

    /// Validate a list of files concurrently, preserving their order
    pub async fn validate_files(&self, files: Vec<PathBuf>) -> Result<Vec<FileValidationResult>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_validations,
        ));

        let validation_tasks: Vec<_> = files
            .into_iter()
            .map(|file_path| {
                let semaphore = Arc::clone(&semaphore);
                let worker = self.worker();
                let timeout = self.config.validation_timeout;

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.map_err(|_| {
                        ValidationError::Concurrency {
                            details: "Failed to acquire validation semaphore".to_string(),
                        }
                    })?;

                    let result =
                        tokio::time::timeout(timeout, worker.validate(file_path.clone())).await;

                    Ok::<FileValidationResult, ValidationError>(match result {
                        Ok(validation_result) => validation_result,
                        Err(_) => FileValidationResult::error(
                            file_path,
                            ValidationError::Concurrency {
                                details: format!("Validation timeout after {:?}", timeout),
                            },
                            timeout,
                        ),
                    })
                })
            })
            .collect();

        let task_results =
            try_join_all(validation_tasks)
                .await
                .map_err(|e| ValidationError::Concurrency {
                    details: format!("Task join error: {}", e),
                })?;

        task_results.into_iter().collect()
    }

    /// Validate one file
    pub async fn validate_single_file(&self, file_path: &Path) -> FileValidationResult {
        self.worker().validate(file_path.to_path_buf()).await
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SchemaContextCache> {
        &self.cache
    }

    fn worker(&self) -> FileWorker {
        FileWorker {
            cache: Arc::clone(&self.cache),
            receipts: Arc::clone(&self.receipts),
            policy: self.policy,
            context: self.config.context,
            receipt: self.config.receipt,
        }
    }
}

/// Owned per-task handle on the shared validation state
struct FileWorker {
    cache: Arc<SchemaContextCache>,
    receipts: Arc<ReceiptValidator>,
    policy: ValidationOutcomePolicy,
    context: ValidationContext,
    receipt: bool,
}

impl FileWorker {
    async fn validate(self, file_path: PathBuf) -> FileValidationResult {
        let start_time = Instant::now();

        if !self.policy.should_validate() {
            return FileValidationResult::skipped(
                file_path,
                "validation disabled",
                start_time.elapsed(),
            );
        }

        let content = match tokio::fs::read(&file_path).await {
            Ok(content) => content,
            Err(e) => {
                return FileValidationResult::error(file_path, e.into(), start_time.elapsed());
            }
        };

        let path = file_path.clone();
        let joined = tokio::task::spawn_blocking(move || self.check(path, content, start_time)).await;

        match joined {
            Ok(result) => result,
            Err(e) => FileValidationResult::error(
                file_path,
                ValidationError::Concurrency {
                    details: format!("Join error: {}", e),
                },
                start_time.elapsed(),
            ),
        }
    }

    fn check(&self, path: PathBuf, content: Vec<u8>, start_time: Instant) -> FileValidationResult {
        if self.receipt {
            return self.check_receipt(path, content, start_time);
        }

        let outcome = self
            .cache
            .session_for(self.context)
            .and_then(|session| session.check(&content));

        match outcome {
            Ok(_warnings) => FileValidationResult::valid(path, start_time.elapsed()),
            Err(error @ ValidationError::StructuralValidationFailure { .. }) => {
                let action = self.policy.decide(&error);
                FileValidationResult::failed(path, &error, action, start_time.elapsed())
            }
            Err(error) => FileValidationResult::error(path, error, start_time.elapsed()),
        }
    }

    fn check_receipt(
        &self,
        path: PathBuf,
        content: Vec<u8>,
        start_time: Instant,
    ) -> FileValidationResult {
        let xml = match String::from_utf8(content) {
            Ok(xml) => xml,
            Err(e) => {
                let error = ValidationError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e,
                ));
                return FileValidationResult::error(path, error, start_time.elapsed());
            }
        };

        match self.receipts.inspect(&xml) {
            Ok(ReceiptOutcome::Valid) => FileValidationResult::valid(path, start_time.elapsed()),
            Ok(ReceiptOutcome::NotReceipt) => {
                FileValidationResult::skipped(path, "no receipt in message", start_time.elapsed())
            }
            Ok(ReceiptOutcome::Skipped) => {
                FileValidationResult::skipped(path, "validation disabled", start_time.elapsed())
            }
            Ok(ReceiptOutcome::Failed { error, action }) => {
                FileValidationResult::failed(path, &error, action, start_time.elapsed())
            }
            Err(error) => FileValidationResult::error(path, error, start_time.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Diagnostic, Severity};
    use crate::error::{ConformanceCode, ConformanceError};
    use crate::policy::ValidationMode;
    use crate::resource::MemoryStore;
    use tempfile::TempDir;

    fn engine(mode: ValidationMode, receipt: bool) -> ValidationEngine {
        let cache = Arc::new(SchemaContextCache::from_store(Arc::new(MemoryStore::new())));
        ValidationEngine::new(
            cache,
            Arc::new(NamespaceRegistry::as4()),
            ValidationOutcomePolicy::new(mode),
            ValidationConfig {
                max_concurrent_validations: 2,
                validation_timeout: Duration::from_secs(5),
                receipt,
                ..ValidationConfig::default()
            },
        )
    }

    #[test]
    fn test_failed_result_mapping() {
        let structural = ValidationError::StructuralValidationFailure {
            errors: vec![Diagnostic::new(Severity::Error, 3, 7, "bad element")],
            warnings: vec![],
        };
        let result = FileValidationResult::failed(
            PathBuf::from("a.xml"),
            &structural,
            Action::Abort,
            Duration::ZERO,
        );
        assert_eq!(result.status, ValidationStatus::Invalid { error_count: 1 });
        assert_eq!(result.error_details, vec!["Line 3, Column 7: bad element"]);

        let conformance: ValidationError =
            ConformanceError::new(ConformanceCode::MissingDigestReference, "no digest").into();
        let result = FileValidationResult::failed(
            PathBuf::from("b.xml"),
            &conformance,
            Action::Continue,
            Duration::ZERO,
        );
        assert_eq!(
            result.status,
            ValidationStatus::NonConformant {
                ebms_code: "EBMS:0302".to_string(),
                message: "no digest".to_string(),
            }
        );
    }

    #[test]
    fn test_validation_results_aggregation() {
        let error = ValidationError::ReceiptAbsent;
        let results = ValidationResults::aggregate(vec![
            FileValidationResult::valid(PathBuf::from("1.xml"), Duration::from_millis(10)),
            FileValidationResult::failed(
                PathBuf::from("2.xml"),
                &error,
                Action::Continue,
                Duration::from_millis(20),
            ),
            FileValidationResult::skipped(PathBuf::from("3.xml"), "no receipt", Duration::ZERO),
        ]);

        assert_eq!(results.total_files, 3);
        assert_eq!(results.valid_files, 1);
        assert_eq!(results.non_conformant_files, 1);
        assert_eq!(results.skipped_files, 1);
        assert_eq!(results.aborted_files, 0);
        assert_eq!(results.total_duration, Duration::from_millis(30));
        assert_eq!(results.average_duration, Duration::from_millis(10));
        assert!(results.has_failures());
        assert_eq!(results.exit_code(), 0);
    }

    #[test]
    fn test_abort_and_errors_set_exit_code() {
        let error = ValidationError::ReceiptAbsent;
        let aborted = ValidationResults::aggregate(vec![FileValidationResult::failed(
            PathBuf::from("a.xml"),
            &error,
            Action::Abort,
            Duration::ZERO,
        )]);
        assert_eq!(aborted.exit_code(), 1);

        let errored = ValidationResults::aggregate(vec![FileValidationResult::error(
            PathBuf::from("b.xml"),
            ValidationError::Config("x".to_string()),
            Duration::ZERO,
        )]);
        assert_eq!(errored.exit_code(), 1);

        let empty = ValidationResults::aggregate(Vec::new());
        assert_eq!(empty.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_validate_files_empty_list() {
        let results = engine(ValidationMode::Advisory, false)
            .validate_files(Vec::new())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_mode_skips_files() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("message.xml");
        std::fs::write(&file, "<not-even-checked").unwrap();

        let result = engine(ValidationMode::Disabled, false)
            .validate_single_file(&file)
            .await;
        assert!(result.status.is_skipped());
    }

    #[tokio::test]
    async fn test_missing_schemas_are_reported_as_errors() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("message.xml");
        std::fs::write(&file, "<Envelope/>").unwrap();

        let results = engine(ValidationMode::Enforcing, false)
            .validate_files(vec![file.clone(), file])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        for result in results {
            assert!(result.status.is_error());
            assert_eq!(result.action, Action::Continue);
        }
    }

    #[tokio::test]
    async fn test_receipt_mode_skips_non_receipts() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("user.xml");
        std::fs::write(&file, "<Envelope><Body/></Envelope>").unwrap();

        let result = engine(ValidationMode::Enforcing, true)
            .validate_single_file(&file)
            .await;
        assert_eq!(
            result.status,
            ValidationStatus::Skipped {
                reason: "no receipt in message".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unreadable_file() {
        let result = engine(ValidationMode::Advisory, false)
            .validate_single_file(Path::new("/nonexistent/message.xml"))
            .await;
        assert!(result.status.is_error());
    }
}
