//! Filesystem storage adapter: atomic JSON files under a project-rooted
//! directory tree.
//!
//! Layout under `base_directory/<projectId>/`:
//!
//! ```text
//! history/performance-history.json
//! runs/<runId>.json
//! jobs/<jobId>.json
//! temp/
//! ```
//!
//! Writes go to a `.tmp` sibling and are renamed into place, so readers
//! observe either the previous or the next document, never a torn one.
//! Missing files read as empty documents.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::core::errors::{HeimdallError, Result};
use crate::core::history::{HistoryDocument, HistoryEntry};
use crate::core::telemetry::StepSample;
use crate::storage::contract::{
    aggregate_run_documents, AdapterKind, AggregatedResults, HealthState, HealthStatus, JobRecord,
    JobStatus, RunDocument, StorageAdapter,
};
use crate::storage::retention::{CleanupReport, RetentionPolicy};

/// Upper bound on run files considered by one aggregation.
const MAX_AGGREGATED_RUNS: usize = 1000;

/// History file name inside a project's `history/` directory.
const HISTORY_FILE: &str = "performance-history.json";

/// Filesystem-backed storage adapter.
#[derive(Debug, Clone)]
pub struct FilesystemAdapter {
    base: PathBuf,
    history_override: Option<PathBuf>,
}

impl FilesystemAdapter {
    /// Create an adapter rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            history_override: None,
        }
    }

    /// Pin the history document to an explicit file instead of the
    /// project-tree location (legacy single-file surface).
    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_override = Some(path.into());
        self
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.base.join(project_id)
    }

    fn history_path(&self, project_id: &str) -> PathBuf {
        self.history_override.clone().unwrap_or_else(|| {
            self.project_dir(project_id).join("history").join(HISTORY_FILE)
        })
    }

    fn runs_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("runs")
    }

    fn jobs_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("jobs")
    }

    fn temp_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("temp")
    }

    async fn ensure_project_dirs(&self, project_id: &str) -> Result<()> {
        if let Some(history) = &self.history_override {
            if let Some(parent) = history.parent() {
                create_dir_all(parent).await?;
            }
        } else if let Some(parent) = self.history_path(project_id).parent() {
            create_dir_all(parent).await?;
        }
        create_dir_all(&self.runs_dir(project_id)).await?;
        create_dir_all(&self.jobs_dir(project_id)).await?;
        create_dir_all(&self.temp_dir(project_id)).await?;
        Ok(())
    }

    async fn list_json_files(&self, dir: &Path) -> Result<Vec<(PathBuf, DateTime<Utc>)>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HeimdallError::io(
                    format!("failed to list {}", dir.display()),
                    e,
                ))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HeimdallError::io(format!("failed to list {}", dir.display()), e))?
        {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .ok()
                .and_then(|meta| meta.modified().ok())
                .map_or_else(Utc::now, DateTime::<Utc>::from);
            files.push((path, modified));
        }
        Ok(files)
    }
}

#[async_trait]
impl StorageAdapter for FilesystemAdapter {
    async fn initialize(&self) -> Result<()> {
        create_dir_all(&self.base).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn adapter_type(&self) -> AdapterKind {
        AdapterKind::Filesystem
    }

    async fn get_history(&self, project_id: &str) -> Result<HistoryDocument> {
        read_json_or_default(&self.history_path(project_id)).await
    }

    async fn save_history(&self, project_id: &str, history: &HistoryDocument) -> Result<()> {
        self.ensure_project_dirs(project_id).await?;
        write_json_atomic(&self.history_path(project_id), history).await
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
        self.ensure_project_dirs(project_id).await?;

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
        let path = self.runs_dir(project_id).join(format!("{run_id}.json"));
        write_json_atomic(&path, &document).await?;
        tracing::debug!(run_id = %run_id, samples = run_data.len(), "archived run");
        Ok(run_id)
    }

    async fn get_runs(&self, project_id: &str, limit: usize) -> Result<Vec<RunDocument>> {
        let files = self.list_json_files(&self.runs_dir(project_id)).await?;
        let mut runs = Vec::with_capacity(files.len());
        for (path, _) in files {
            if let Some(run) = read_json_lenient::<RunDocument>(&path).await? {
                runs.push(run);
            }
        }
        runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn aggregate_results(
        &self,
        project_id: &str,
        job_ids: &[String],
    ) -> Result<AggregatedResults> {
        let mut files = self.list_json_files(&self.runs_dir(project_id)).await?;
        files.sort_by(|a, b| b.1.cmp(&a.1));
        files.truncate(MAX_AGGREGATED_RUNS);

        let mut runs = Vec::with_capacity(files.len());
        for (path, _) in files {
            if let Some(run) = read_json_lenient::<RunDocument>(&path).await? {
                runs.push(run);
            }
        }
        runs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(aggregate_run_documents(runs, job_ids, Utc::now()))
    }

    async fn register_job(
        &self,
        project_id: &str,
        job_id: &str,
        info: serde_json::Value,
    ) -> Result<()> {
        self.ensure_project_dirs(project_id).await?;
        let now = Utc::now();
        let record = JobRecord {
            project_id: project_id.to_string(),
            job_id: job_id.to_string(),
            status: JobStatus::Registered,
            registered_at: now,
            last_updated: now,
            metadata: info,
        };
        let path = self.jobs_dir(project_id).join(format!("{job_id}.json"));
        write_json_atomic(&path, &record).await
    }

    async fn update_job_status(
        &self,
        project_id: &str,
        job_id: &str,
        status: JobStatus,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let path = self.jobs_dir(project_id).join(format!("{job_id}.json"));
        let mut record = read_json_lenient::<JobRecord>(&path)
            .await?
            .ok_or_else(|| {
                HeimdallError::validation_field(
                    format!("job '{job_id}' is not registered"),
                    "jobId",
                )
            })?;
        record.status = status;
        record.last_updated = Utc::now();
        if !metadata.is_null() {
            record.metadata = metadata;
        }
        write_json_atomic(&path, &record).await
    }

    async fn job_info(&self, project_id: &str, job_id: &str) -> Result<Option<JobRecord>> {
        let path = self.jobs_dir(project_id).join(format!("{job_id}.json"));
        read_json_lenient(&path).await
    }

    async fn cleanup(&self, project_id: &str, policy: &RetentionPolicy) -> Result<CleanupReport> {
        let now = Utc::now();
        let mut report = CleanupReport {
            dry_run: policy.dry_run,
            ..CleanupReport::default()
        };

        let runs_cutoff = policy.runs_cutoff(now);
        for (path, modified) in self.list_json_files(&self.runs_dir(project_id)).await? {
            let timestamp = read_json_lenient::<RunDocument>(&path)
                .await?
                .map_or(modified, |run| run.timestamp);
            if timestamp >= runs_cutoff {
                continue;
            }
            report.runs_removed += 1;
            report.bytes_reclaimed += file_size(&path).await;
            if !policy.dry_run {
                remove_file(&path).await?;
            }
        }

        for (path, modified) in self.list_json_files(&self.jobs_dir(project_id)).await? {
            let record = read_json_lenient::<JobRecord>(&path).await?;
            let (timestamp, finished) = record.map_or((modified, false), |record| {
                (record.last_updated, record.status.is_finished())
            });
            if timestamp >= policy.jobs_cutoff(now, finished) {
                continue;
            }
            report.jobs_removed += 1;
            report.bytes_reclaimed += file_size(&path).await;
            if !policy.dry_run {
                remove_file(&path).await?;
            }
        }

        Ok(report)
    }

    async fn health_status(&self) -> HealthStatus {
        let probe = async {
            create_dir_all(&self.base).await?;
            let probe_path = self.base.join(".health-probe");
            fs::write(&probe_path, b"ok")
                .await
                .map_err(|e| HeimdallError::io("health probe write failed", e))?;
            fs::remove_file(&probe_path)
                .await
                .map_err(|e| HeimdallError::io("health probe cleanup failed", e))?;
            Ok::<(), HeimdallError>(())
        };

        match probe.await {
            Ok(()) => HealthStatus {
                kind: AdapterKind::Filesystem,
                status: HealthState::Healthy,
                details: format!("base directory {} is writable", self.base.display()),
                error: None,
            },
            Err(e) => HealthStatus {
                kind: AdapterKind::Filesystem,
                status: HealthState::Error,
                details: format!("base directory {} is not writable", self.base.display()),
                error: Some(e.to_string()),
            },
        }
    }
}

async fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| HeimdallError::io(format!("failed to create {}", path.display()), e))
}

async fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .await
        .map_err(|e| HeimdallError::io(format!("failed to remove {}", path.display()), e))
}

async fn file_size(path: &Path) -> u64 {
    fs::metadata(path).await.map_or(0, |meta| meta.len())
}

/// Write a JSON document atomically: serialize to `<path>.tmp`, then rename
/// into place.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &content)
        .await
        .map_err(|e| HeimdallError::io(format!("failed to write {}", tmp_path.display()), e))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| HeimdallError::io(format!("failed to commit {}", path.display()), e))
}

/// Read a JSON document, treating a missing file as a default value.
async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    Ok(read_json_lenient(path).await?.unwrap_or_default())
}

/// Read a JSON document, treating a missing file as `None`.
async fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(HeimdallError::io(
                format!("failed to read {}", path.display()),
                e,
            ))
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| HeimdallError::from(e).with_context(path.display().to_string()))
}
