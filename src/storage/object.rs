//! Object-store adapter: prefix-keyed whole-object documents.
//!
//! Key scheme under the configured prefix:
//!
//! ```text
//! <prefix>/<projectId>/history.json
//! <prefix>/<projectId>/runs/<runId>.json
//! <prefix>/<projectId>/jobs/<jobId>.json
//! ```
//!
//! Writes are whole-object PUTs; the history document uses a
//! write-then-verify pattern instead of in-place mutation. Transient
//! failures are retried three times with exponential backoff and otherwise
//! propagate to the storage service, which may fall back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{StreamExt, TryStreamExt};
use indexmap::IndexMap;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::core::errors::{HeimdallError, Result};
use crate::core::history::{HistoryDocument, HistoryEntry};
use crate::core::telemetry::StepSample;
use crate::storage::contract::{
    aggregate_run_documents, AdapterKind, AggregatedResults, HealthState, HealthStatus, JobRecord,
    JobStatus, RunDocument, StorageAdapter,
};
use crate::storage::retention::{CleanupReport, RetentionPolicy};

/// Retry attempts for transient backend failures.
const RETRY_ATTEMPTS: usize = 3;

/// Initial backoff; doubled per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Bounded concurrency for listing-based aggregation fetches.
const AGGREGATION_CONCURRENCY: usize = 8;

/// Upper bound on run objects considered by one aggregation.
const MAX_AGGREGATED_RUNS: usize = 1000;

/// Object-store-backed storage adapter.
pub struct ObjectStorageAdapter {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStorageAdapter {
    /// Create an adapter over an S3 bucket, with credentials drawn from the
    /// ambient environment.
    pub fn new(bucket: &str, region: Option<&str>, prefix: &str) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        let store = builder.build().map_err(HeimdallError::from)?;
        Ok(Self::with_store(Arc::new(store), prefix))
    }

    /// Create an adapter over an arbitrary object store. Tests use the
    /// in-memory store through this constructor.
    pub fn with_store(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Create an adapter over an in-memory store (test support).
    pub fn in_memory(prefix: &str) -> Self {
        Self::with_store(Arc::new(InMemory::new()), prefix)
    }

    fn history_key(&self, project_id: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}/history.json", self.prefix, project_id))
    }

    fn runs_prefix(&self, project_id: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}/runs", self.prefix, project_id))
    }

    fn run_key(&self, project_id: &str, run_id: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}/runs/{}.json", self.prefix, project_id, run_id))
    }

    fn jobs_prefix(&self, project_id: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}/jobs", self.prefix, project_id))
    }

    fn job_key(&self, project_id: &str, job_id: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}/jobs/{}.json", self.prefix, project_id, job_id))
    }

    async fn put_with_retry(&self, path: &ObjectPath, bytes: Vec<u8>) -> Result<()> {
        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.store.put(path, PutPayload::from(bytes.clone())).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let error = HeimdallError::from(e).with_operation("put");
                    if !error.is_transient() || attempt == RETRY_ATTEMPTS {
                        return Err(error);
                    }
                    tracing::warn!(attempt, path = %path, "transient put failure, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }

    async fn get_with_retry(&self, path: &ObjectPath) -> Result<Option<Vec<u8>>> {
        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.store.get(path).await {
                Ok(result) => {
                    let bytes = result.bytes().await.map_err(HeimdallError::from)?;
                    return Ok(Some(bytes.to_vec()));
                }
                Err(object_store::Error::NotFound { .. }) => return Ok(None),
                Err(e) => {
                    let error = HeimdallError::from(e).with_operation("get");
                    if !error.is_transient() || attempt == RETRY_ATTEMPTS {
                        return Err(error);
                    }
                    tracing::warn!(attempt, path = %path, "transient get failure, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }

    async fn delete_with_retry(&self, path: &ObjectPath) -> Result<()> {
        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.store.delete(path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => return Ok(()),
                Err(e) => {
                    let error = HeimdallError::from(e).with_operation("delete");
                    if !error.is_transient() || attempt == RETRY_ATTEMPTS {
                        return Err(error);
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }

    async fn list_meta(&self, prefix: &ObjectPath) -> Result<Vec<ObjectMeta>> {
        self.store
            .list(Some(prefix))
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| HeimdallError::from(e).with_operation("list"))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &ObjectPath) -> Result<Option<T>> {
        match self.get_with_retry(path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| HeimdallError::from(e).with_context(path.to_string())),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(&self, path: &ObjectPath, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.put_with_retry(path, bytes).await
    }

    async fn fetch_runs(&self, metas: Vec<ObjectMeta>) -> Result<Vec<RunDocument>> {
        let mut runs: Vec<RunDocument> = futures::stream::iter(metas)
            .map(|meta| async move { self.get_json::<RunDocument>(&meta.location).await })
            .buffer_unordered(AGGREGATION_CONCURRENCY)
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .flatten()
            .collect();
        runs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(runs)
    }
}

#[async_trait]
impl StorageAdapter for ObjectStorageAdapter {
    async fn initialize(&self) -> Result<()> {
        // One cheap list verifies reachability and authorization.
        self.list_meta(&ObjectPath::from(self.prefix.clone()))
            .await
            .map(|_| ())
            .map_err(|e| e.with_operation("initialize"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn adapter_type(&self) -> AdapterKind {
        AdapterKind::S3
    }

    async fn get_history(&self, project_id: &str) -> Result<HistoryDocument> {
        Ok(self
            .get_json(&self.history_key(project_id))
            .await?
            .unwrap_or_default())
    }

    async fn save_history(&self, project_id: &str, history: &HistoryDocument) -> Result<()> {
        let key = self.history_key(project_id);
        let bytes = serde_json::to_vec_pretty(history)?;
        self.put_with_retry(&key, bytes.clone()).await?;

        // Write-then-verify: a whole-object PUT either lands or it does
        // not. A mismatch on read-back means a concurrent writer won the
        // last-write race; the surviving document is a valid successor, so
        // the conflict is logged rather than raised.
        let stored = self.get_with_retry(&key).await?;
        if stored.as_deref() != Some(bytes.as_slice()) {
            let conflict = HeimdallError::conflict(format!(
                "history at {key} was replaced by a concurrent writer"
            ));
            tracing::warn!(error = %conflict, "history write lost a last-write race");
        }
        Ok(())
    }

    async fn seed_history(
        &self,
        project_id: &str,
        aggregated: &IndexMap<String, Vec<f64>>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut document = HistoryDocument::default();
        for (step_text, durations) in aggregated {
            document.steps.insert(
                step_text.clone(),
                HistoryEntry::from_durations(durations.clone(), now),
            );
        }
        self.save_history(project_id, &document).await
    }

    async fn save_run(
        &self,
        project_id: &str,
        run_data: &[StepSample],
        metadata: serde_json::Value,
    ) -> Result<String> {
        let timestamp = Utc::now();
        let run_id = metadata
            .get("runId")
            .and_then(serde_json::Value::as_str)
            .map_or_else(
                || {
                    format!(
                        "run-{}-{}",
                        timestamp.format("%Y%m%dT%H%M%S%3f"),
                        &Uuid::new_v4().simple().to_string()[..8]
                    )
                },
                str::to_string,
            );

        let document = RunDocument {
            run_id: run_id.clone(),
            project_id: project_id.to_string(),
            run_data: run_data.to_vec(),
            timestamp,
            metadata,
        };
        self.put_json(&self.run_key(project_id, &run_id), &document)
            .await?;
        Ok(run_id)
    }

    async fn get_runs(&self, project_id: &str, limit: usize) -> Result<Vec<RunDocument>> {
        let metas = self.list_meta(&self.runs_prefix(project_id)).await?;
        let mut runs = self.fetch_runs(metas).await?;
        runs.reverse();
        runs.truncate(limit);
        Ok(runs)
    }

    async fn aggregate_results(
        &self,
        project_id: &str,
        job_ids: &[String],
    ) -> Result<AggregatedResults> {
        let mut metas = self.list_meta(&self.runs_prefix(project_id)).await?;
        metas.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        metas.truncate(MAX_AGGREGATED_RUNS);

        let runs = self.fetch_runs(metas).await?;
        Ok(aggregate_run_documents(runs, job_ids, Utc::now()))
    }

    async fn register_job(
        &self,
        project_id: &str,
        job_id: &str,
        info: serde_json::Value,
    ) -> Result<()> {
        let now = Utc::now();
        let record = JobRecord {
            project_id: project_id.to_string(),
            job_id: job_id.to_string(),
            status: JobStatus::Registered,
            registered_at: now,
            last_updated: now,
            metadata: info,
        };
        self.put_json(&self.job_key(project_id, job_id), &record).await
    }

    async fn update_job_status(
        &self,
        project_id: &str,
        job_id: &str,
        status: JobStatus,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let key = self.job_key(project_id, job_id);
        let mut record: JobRecord = self.get_json(&key).await?.ok_or_else(|| {
            HeimdallError::validation_field(format!("job '{job_id}' is not registered"), "jobId")
        })?;
        record.status = status;
        record.last_updated = Utc::now();
        if !metadata.is_null() {
            record.metadata = metadata;
        }
        self.put_json(&key, &record).await
    }

    async fn job_info(&self, project_id: &str, job_id: &str) -> Result<Option<JobRecord>> {
        self.get_json(&self.job_key(project_id, job_id)).await
    }

    async fn cleanup(&self, project_id: &str, policy: &RetentionPolicy) -> Result<CleanupReport> {
        let now = Utc::now();
        let mut report = CleanupReport {
            dry_run: policy.dry_run,
            ..CleanupReport::default()
        };

        // Run objects age by their listing timestamp; fetching each archive
        // just to read its embedded timestamp would defeat the point of a
        // cleanup pass.
        let runs_cutoff = policy.runs_cutoff(now);
        for meta in self.list_meta(&self.runs_prefix(project_id)).await? {
            if meta.last_modified >= runs_cutoff {
                continue;
            }
            report.runs_removed += 1;
            report.bytes_reclaimed += meta.size;
            if !policy.dry_run {
                self.delete_with_retry(&meta.location).await?;
            }
        }

        for meta in self.list_meta(&self.jobs_prefix(project_id)).await? {
            let record = self.get_json::<JobRecord>(&meta.location).await?;
            let (timestamp, finished) = record.map_or((meta.last_modified, false), |record| {
                (record.last_updated, record.status.is_finished())
            });
            if timestamp >= policy.jobs_cutoff(now, finished) {
                continue;
            }
            report.jobs_removed += 1;
            report.bytes_reclaimed += meta.size;
            if !policy.dry_run {
                self.delete_with_retry(&meta.location).await?;
            }
        }

        Ok(report)
    }

    async fn health_status(&self) -> HealthStatus {
        match self.list_meta(&ObjectPath::from(self.prefix.clone())).await {
            Ok(_) => HealthStatus {
                kind: AdapterKind::S3,
                status: HealthState::Healthy,
                details: format!("prefix '{}' is listable", self.prefix),
                error: None,
            },
            Err(e) => HealthStatus {
                kind: AdapterKind::S3,
                status: HealthState::Error,
                details: format!("prefix '{}' is not listable", self.prefix),
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telemetry::StepContext;

    fn sample(step: &str, job_id: &str) -> StepSample {
        StepSample {
            step_text: step.to_string(),
            duration: 100.0,
            timestamp: Utc::now(),
            context: Some(StepContext {
                job_id: job_id.to_string(),
                ..StepContext::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_history_write_then_verify_round_trip() {
        let adapter = ObjectStorageAdapter::in_memory("perf");
        adapter.initialize().await.unwrap();

        let mut history = HistoryDocument::default();
        history.steps.insert(
            "I log in".to_string(),
            HistoryEntry::from_durations(vec![540.0, 545.0], Utc::now()),
        );
        adapter.save_history("web", &history).await.unwrap();
        assert_eq!(adapter.get_history("web").await.unwrap(), history);
    }

    #[tokio::test]
    async fn test_missing_history_reads_empty() {
        let adapter = ObjectStorageAdapter::in_memory("perf");
        assert!(adapter.get_history("web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runs_are_prefix_isolated_per_project() {
        let adapter = ObjectStorageAdapter::in_memory("perf");
        adapter
            .save_run("web", &[sample("a", "A")], serde_json::Value::Null)
            .await
            .unwrap();
        adapter
            .save_run("api", &[sample("b", "B")], serde_json::Value::Null)
            .await
            .unwrap();

        let web_runs = adapter.get_runs("web", 10).await.unwrap();
        assert_eq!(web_runs.len(), 1);
        assert_eq!(web_runs[0].run_data[0].step_text, "a");
    }

    #[tokio::test]
    async fn test_aggregate_filters_by_job_id() {
        let adapter = ObjectStorageAdapter::in_memory("perf");
        adapter
            .save_run("web", &[sample("a", "A"), sample("b", "A")], serde_json::Value::Null)
            .await
            .unwrap();
        adapter
            .save_run("web", &[sample("c", "B")], serde_json::Value::Null)
            .await
            .unwrap();

        let all = adapter.aggregate_results("web", &[]).await.unwrap();
        assert_eq!(all.aggregated_steps.len(), 3);
        assert_eq!(all.run_count, 2);
        assert_eq!(all.job_count, 2);

        let only_a = adapter
            .aggregate_results("web", &["A".to_string()])
            .await
            .unwrap();
        assert_eq!(only_a.aggregated_steps.len(), 2);
        assert_eq!(only_a.run_count, 1);
        assert_eq!(only_a.job_count, 1);
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let adapter = ObjectStorageAdapter::in_memory("perf");
        adapter
            .register_job("web", "job-1", serde_json::Value::Null)
            .await
            .unwrap();
        adapter
            .update_job_status("web", "job-1", JobStatus::Running, serde_json::Value::Null)
            .await
            .unwrap();

        let record = adapter.job_info("web", "job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_health_probe_on_memory_store() {
        let adapter = ObjectStorageAdapter::in_memory("perf");
        let health = adapter.health_status().await;
        assert_eq!(health.status, HealthState::Healthy);
        assert_eq!(health.kind, AdapterKind::S3);
    }
}
