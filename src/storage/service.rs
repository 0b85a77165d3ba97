//! Storage service: adapter selection, initialization, opportunistic
//! filesystem fallback, and the public façade the CLI talks to.
//!
//! The service holds one primary adapter selected from the resolved storage
//! options. When a primary operation fails in a way that could succeed
//! against the filesystem and a filesystem location is available, the
//! service retries that one operation through a filesystem adapter and
//! records a typed [`StorageEvent`], inspectable by tests without any
//! logging dependency. Programmer errors (validation, configuration) are
//! never masked by the fallback.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::core::config::{AdapterTypeChoice, StorageOptions};
use crate::core::errors::{HeimdallError, Result};
use crate::core::history::HistoryDocument;
use crate::core::telemetry::StepSample;
use crate::storage::contract::{
    AdapterKind, AggregatedResults, HealthStatus, JobRecord, JobStatus, RunDocument,
    StorageAdapter, WaitOptions, WaitOutcome,
};
use crate::storage::document::DocumentStorageAdapter;
use crate::storage::filesystem::FilesystemAdapter;
use crate::storage::object::ObjectStorageAdapter;
use crate::storage::retention::{CleanupReport, RetentionPolicy};

/// Typed events emitted by the service.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    /// A primary-adapter failure was retried through the filesystem.
    FallbackEngaged {
        /// The operation that fell back
        operation: String,
        /// The primary failure that triggered the fallback
        reason: String,
    },
}

/// Public storage façade holding one primary adapter.
pub struct StorageService {
    adapter: Arc<dyn StorageAdapter>,
    fallback: Option<Arc<FilesystemAdapter>>,
    events: Mutex<Vec<StorageEvent>>,
}

impl StorageService {
    /// Instantiate the adapter selected by the resolved storage options.
    pub fn from_options(options: &StorageOptions) -> Result<Self> {
        let adapter: Arc<dyn StorageAdapter> = match options.resolved_adapter() {
            AdapterTypeChoice::Filesystem | AdapterTypeChoice::Auto => {
                Arc::new(filesystem_adapter(options))
            }
            AdapterTypeChoice::Database => {
                let connection = options.connection.as_deref().ok_or_else(|| {
                    HeimdallError::config_field(
                        "a connection string is required for the database adapter",
                        "storage.database.connection",
                    )
                })?;
                Arc::new(DocumentStorageAdapter::new(
                    connection,
                    options.database_name.clone(),
                ))
            }
            AdapterTypeChoice::S3 => {
                let bucket = options.bucket_name.as_deref().ok_or_else(|| {
                    HeimdallError::config_field(
                        "a bucket name is required for the s3 adapter",
                        "storage.s3.bucket_name",
                    )
                })?;
                Arc::new(ObjectStorageAdapter::new(
                    bucket,
                    options.region.as_deref(),
                    &options.prefix,
                )?)
            }
        };

        // The filesystem remains available as a per-operation fallback for
        // the remote backends.
        let fallback = match adapter.adapter_type() {
            AdapterKind::Filesystem => None,
            _ => Some(Arc::new(filesystem_adapter(options))),
        };

        Ok(Self {
            adapter,
            fallback,
            events: Mutex::new(Vec::new()),
        })
    }

    /// Wrap an explicit adapter (test support and embedding).
    pub fn with_adapter(
        adapter: Arc<dyn StorageAdapter>,
        fallback: Option<Arc<FilesystemAdapter>>,
    ) -> Self {
        Self {
            adapter,
            fallback,
            events: Mutex::new(Vec::new()),
        }
    }

    /// The primary adapter kind.
    pub fn adapter_type(&self) -> AdapterKind {
        self.adapter.adapter_type()
    }

    /// Drain the recorded events.
    pub fn take_events(&self) -> Vec<StorageEvent> {
        std::mem::take(&mut self.events.lock())
    }

    /// Initialize the primary adapter.
    pub async fn initialize(&self) -> Result<()> {
        self.adapter.initialize().await
    }

    /// Release adapter resources.
    pub async fn close(&self) -> Result<()> {
        self.adapter.close().await
    }

    fn record_fallback(&self, operation: &str, reason: &HeimdallError) {
        tracing::warn!(operation, error = %reason, "primary storage failed, falling back to filesystem");
        self.events.lock().push(StorageEvent::FallbackEngaged {
            operation: operation.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Run `operation` against the primary adapter, retrying once through
    /// the filesystem fallback when the failure is eligible.
    async fn with_fallback<'a, T, F>(&'a self, operation: &str, run: F) -> Result<T>
    where
        F: Fn(
            &'a dyn StorageAdapter,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<T>> + Send + 'a>>,
    {
        match run(self.adapter.as_ref()).await {
            Ok(value) => Ok(value),
            Err(primary_error) => {
                let Some(fallback) = &self.fallback else {
                    return Err(primary_error);
                };
                if !primary_error.is_fallback_eligible() {
                    return Err(primary_error);
                }
                self.record_fallback(operation, &primary_error);
                fallback.initialize().await?;
                run(fallback.as_ref()).await
            }
        }
    }

    /// Read the project's history document; empty when absent.
    pub async fn get_history(&self, project_id: &str) -> Result<HistoryDocument> {
        self.with_fallback("get_history", |adapter| {
            Box::pin(adapter.get_history(project_id))
        })
        .await
    }

    /// Atomically replace the project's history document.
    pub async fn save_history(&self, project_id: &str, history: &HistoryDocument) -> Result<()> {
        self.with_fallback("save_history", |adapter| {
            Box::pin(adapter.save_history(project_id, history))
        })
        .await
    }

    /// Rebuild the baseline from aggregated durations.
    pub async fn seed_history(
        &self,
        project_id: &str,
        aggregated: &IndexMap<String, Vec<f64>>,
    ) -> Result<()> {
        self.with_fallback("seed_history", |adapter| {
            Box::pin(adapter.seed_history(project_id, aggregated))
        })
        .await
    }

    /// Archive one run append-only; returns the run id used.
    pub async fn save_run(
        &self,
        project_id: &str,
        run_data: &[StepSample],
        metadata: serde_json::Value,
    ) -> Result<String> {
        let metadata_ref = &metadata;
        self.with_fallback("save_run", move |adapter| {
            Box::pin(adapter.save_run(project_id, run_data, metadata_ref.clone()))
        })
        .await
    }

    /// Read archived runs, most recent first.
    pub async fn get_runs(&self, project_id: &str, limit: usize) -> Result<Vec<RunDocument>> {
        self.with_fallback("get_runs", |adapter| {
            Box::pin(adapter.get_runs(project_id, limit))
        })
        .await
    }

    /// Concatenate samples across archived runs under a job filter.
    pub async fn aggregate_results(
        &self,
        project_id: &str,
        job_ids: &[String],
    ) -> Result<AggregatedResults> {
        self.with_fallback("aggregate_results", |adapter| {
            Box::pin(adapter.aggregate_results(project_id, job_ids))
        })
        .await
    }

    /// Register a job for coordination.
    pub async fn register_job(
        &self,
        project_id: &str,
        job_id: &str,
        info: serde_json::Value,
    ) -> Result<()> {
        let info_ref = &info;
        self.with_fallback("register_job", move |adapter| {
            Box::pin(adapter.register_job(project_id, job_id, info_ref.clone()))
        })
        .await
    }

    /// Update a job's lifecycle state.
    pub async fn update_job_status(
        &self,
        project_id: &str,
        job_id: &str,
        status: JobStatus,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let metadata_ref = &metadata;
        self.with_fallback("update_job_status", move |adapter| {
            Box::pin(adapter.update_job_status(project_id, job_id, status, metadata_ref.clone()))
        })
        .await
    }

    /// Read a job's coordination record.
    pub async fn job_info(&self, project_id: &str, job_id: &str) -> Result<Option<JobRecord>> {
        self.with_fallback("job_info", |adapter| {
            Box::pin(adapter.job_info(project_id, job_id))
        })
        .await
    }

    /// Wait until every listed job reaches a terminal state. Timeouts are
    /// data, not failures; no fallback applies.
    pub async fn wait_for_jobs(
        &self,
        project_id: &str,
        job_ids: &[String],
        options: &WaitOptions,
    ) -> Result<WaitOutcome> {
        self.adapter.wait_for_jobs(project_id, job_ids, options).await
    }

    /// Apply a retention policy through the primary adapter.
    pub async fn cleanup(
        &self,
        project_id: &str,
        policy: &RetentionPolicy,
    ) -> Result<CleanupReport> {
        self.adapter.cleanup(project_id, policy).await
    }

    /// Probe the primary adapter's health.
    pub async fn health_status(&self) -> HealthStatus {
        self.adapter.health_status().await
    }
}

fn filesystem_adapter(options: &StorageOptions) -> FilesystemAdapter {
    let adapter = FilesystemAdapter::new(options.base_directory.clone());
    match &options.history_file {
        Some(history_file) => adapter.with_history_file(history_file.clone()),
        None => adapter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    use crate::storage::contract::{HealthState, JobStatus};

    /// A primary adapter that fails every operation with a chosen error.
    struct FailingAdapter {
        transient: bool,
    }

    #[async_trait]
    impl StorageAdapter for FailingAdapter {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn adapter_type(&self) -> AdapterKind {
            AdapterKind::S3
        }

        async fn get_history(&self, _project_id: &str) -> Result<HistoryDocument> {
            Err(self.error())
        }

        async fn save_history(
            &self,
            _project_id: &str,
            _history: &HistoryDocument,
        ) -> Result<()> {
            Err(self.error())
        }

        async fn seed_history(
            &self,
            _project_id: &str,
            _aggregated: &IndexMap<String, Vec<f64>>,
        ) -> Result<()> {
            Err(self.error())
        }

        async fn save_run(
            &self,
            _project_id: &str,
            _run_data: &[StepSample],
            _metadata: serde_json::Value,
        ) -> Result<String> {
            Err(self.error())
        }

        async fn get_runs(&self, _project_id: &str, _limit: usize) -> Result<Vec<RunDocument>> {
            Err(self.error())
        }

        async fn aggregate_results(
            &self,
            _project_id: &str,
            _job_ids: &[String],
        ) -> Result<AggregatedResults> {
            Err(self.error())
        }

        async fn register_job(
            &self,
            _project_id: &str,
            _job_id: &str,
            _info: serde_json::Value,
        ) -> Result<()> {
            Err(self.error())
        }

        async fn update_job_status(
            &self,
            _project_id: &str,
            _job_id: &str,
            _status: JobStatus,
            _metadata: serde_json::Value,
        ) -> Result<()> {
            Err(self.error())
        }

        async fn job_info(&self, _project_id: &str, _job_id: &str) -> Result<Option<JobRecord>> {
            Err(self.error())
        }

        async fn cleanup(
            &self,
            _project_id: &str,
            _policy: &RetentionPolicy,
        ) -> Result<CleanupReport> {
            Err(self.error())
        }

        async fn health_status(&self) -> HealthStatus {
            HealthStatus {
                kind: AdapterKind::S3,
                status: HealthState::Unhealthy,
                details: "always failing".to_string(),
                error: None,
            }
        }
    }

    impl FailingAdapter {
        fn error(&self) -> HeimdallError {
            if self.transient {
                HeimdallError::storage_transient("simulated outage")
            } else {
                HeimdallError::validation("simulated programmer error")
            }
        }
    }

    fn service_with_failing_primary(temp: &TempDir, transient: bool) -> StorageService {
        StorageService::with_adapter(
            Arc::new(FailingAdapter { transient }),
            Some(Arc::new(FilesystemAdapter::new(temp.path()))),
        )
    }

    #[tokio::test]
    async fn test_fallback_engages_on_storage_failure() {
        let temp = TempDir::new().unwrap();
        let service = service_with_failing_primary(&temp, true);

        let mut history = HistoryDocument::default();
        history.steps.insert(
            "step".to_string(),
            crate::core::history::HistoryEntry::from_durations(vec![1.0, 2.0], Utc::now()),
        );

        service.save_history("web", &history).await.unwrap();
        assert_eq!(service.get_history("web").await.unwrap(), history);

        let events = service.take_events();
        assert!(events
            .iter()
            .all(|event| matches!(event, StorageEvent::FallbackEngaged { .. })));
        assert_eq!(events.len(), 2);
        assert!(service.take_events().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_never_masks_programmer_errors() {
        let temp = TempDir::new().unwrap();
        let service = service_with_failing_primary(&temp, false);

        let err = service.get_history("web").await.unwrap_err();
        assert!(matches!(err, HeimdallError::Validation { .. }));
        assert!(service.take_events().is_empty());
    }

    #[tokio::test]
    async fn test_no_fallback_without_filesystem_location() {
        let service = StorageService::with_adapter(
            Arc::new(FailingAdapter { transient: true }),
            None,
        );
        let err = service.get_history("web").await.unwrap_err();
        assert!(matches!(err, HeimdallError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_filesystem_service_from_options() {
        let temp = TempDir::new().unwrap();
        let mut options = crate::core::config::HeimdallConfig::default().storage_options();
        options.base_directory = temp.path().to_path_buf();

        let service = StorageService::from_options(&options).unwrap();
        assert_eq!(service.adapter_type(), AdapterKind::Filesystem);
        service.initialize().await.unwrap();
        assert!(service.get_history("web").await.unwrap().is_empty());
    }
}
