//! The storage adapter contract shared by every backend.
//!
//! Adapters own the persisted documents for a project: the history
//! document, the append-only run archive, and the job records used for
//! multi-job coordination. Every public operation must be preceded by a
//! successful [`StorageAdapter::initialize`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::core::history::HistoryDocument;
use crate::core::telemetry::StepSample;
use crate::storage::retention::{CleanupReport, RetentionPolicy};

/// Concrete backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Atomic JSON files under a project-rooted directory tree
    Filesystem,
    /// Document database
    Database,
    /// S3-style object store
    S3,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filesystem => write!(f, "filesystem"),
            Self::Database => write!(f, "database"),
            Self::S3 => write!(f, "s3"),
        }
    }
}

/// One archived execution, persisted append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDocument {
    /// Archive key, unique per run
    pub run_id: String,
    /// Project namespace
    pub project_id: String,
    /// The run's samples in execution order
    pub run_data: Vec<StepSample>,
    /// Archival instant
    pub timestamp: DateTime<Utc>,
    /// Free-form caller metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Lifecycle states of a coordination job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered but not yet running
    Registered,
    /// Actively producing samples
    Running,
    /// Finished successfully
    Completed,
    /// Finished with a failure
    Failed,
    /// No record found for the job
    Unknown,
}

impl JobStatus {
    /// Whether the job has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Coordination record for one parallel job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Project namespace
    pub project_id: String,
    /// Job identity within the build
    pub job_id: String,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Registration instant
    pub registered_at: DateTime<Utc>,
    /// Instant of the latest status update
    pub last_updated: DateTime<Utc>,
    /// Free-form caller metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The product of cross-run aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResults {
    /// Concatenated samples across the matched runs
    pub aggregated_steps: Vec<StepSample>,
    /// Number of runs that contributed samples
    pub run_count: usize,
    /// Number of distinct job ids among the contributed samples
    pub job_count: usize,
    /// Aggregation instant
    pub aggregation_timestamp: DateTime<Utc>,
}

/// Parameters of a bounded multi-job wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitOptions {
    /// Total wait bound
    pub timeout: Duration,
    /// Delay between polls
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// The final status observed for one awaited job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusSnapshot {
    /// Job identity
    pub job_id: String,
    /// Status at the last poll
    pub status: JobStatus,
}

/// The outcome of a bounded multi-job wait. Partial results are always
/// delivered: on timeout the final observed statuses are returned.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitOutcome {
    /// Whether every awaited job reached a terminal state
    pub all_completed: bool,
    /// Final observed status per job
    pub job_statuses: Vec<JobStatusSnapshot>,
    /// Time spent waiting
    pub wait_time: Duration,
    /// Whether the wait ended on the timeout
    pub timed_out: bool,
}

/// Health states a backend can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Fully operational
    Healthy,
    /// Operational with reduced guarantees
    Degraded,
    /// Not operational
    Unhealthy,
    /// The health probe itself failed
    Error,
}

/// Result of a backend health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Backend kind
    #[serde(rename = "type")]
    pub kind: AdapterKind,
    /// Probe outcome
    pub status: HealthState,
    /// Human-readable probe details
    pub details: String,
    /// Probe error, when one occurred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Uniform contract implemented by every storage backend.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Acquire backend resources. Must succeed before any other operation.
    async fn initialize(&self) -> Result<()>;

    /// Release backend resources.
    async fn close(&self) -> Result<()>;

    /// The backend kind.
    fn adapter_type(&self) -> AdapterKind;

    /// Read the project's history document; empty when absent.
    async fn get_history(&self, project_id: &str) -> Result<HistoryDocument>;

    /// Atomically replace the project's history document.
    async fn save_history(&self, project_id: &str, history: &HistoryDocument) -> Result<()>;

    /// Rebuild the baseline from aggregated durations, computing the
    /// derived statistics once per step before persisting.
    async fn seed_history(
        &self,
        project_id: &str,
        aggregated: &IndexMap<String, Vec<f64>>,
    ) -> Result<()>;

    /// Archive one run append-only; returns the run id used.
    async fn save_run(
        &self,
        project_id: &str,
        run_data: &[StepSample],
        metadata: serde_json::Value,
    ) -> Result<String>;

    /// Read archived runs, most recent first.
    async fn get_runs(&self, project_id: &str, limit: usize) -> Result<Vec<RunDocument>>;

    /// Concatenate samples across archived runs. An empty `job_ids` set
    /// aggregates all accessible runs; otherwise only samples whose
    /// context job id is listed are included.
    async fn aggregate_results(
        &self,
        project_id: &str,
        job_ids: &[String],
    ) -> Result<AggregatedResults>;

    /// Register a job for coordination.
    async fn register_job(
        &self,
        project_id: &str,
        job_id: &str,
        info: serde_json::Value,
    ) -> Result<()>;

    /// Update a job's lifecycle state.
    async fn update_job_status(
        &self,
        project_id: &str,
        job_id: &str,
        status: JobStatus,
        metadata: serde_json::Value,
    ) -> Result<()>;

    /// Read a job's coordination record.
    async fn job_info(&self, project_id: &str, job_id: &str) -> Result<Option<JobRecord>>;

    /// Wait until every listed job reaches a terminal state, polling at
    /// `poll_interval`, returning within `timeout` plus one poll interval.
    async fn wait_for_jobs(
        &self,
        project_id: &str,
        job_ids: &[String],
        options: &WaitOptions,
    ) -> Result<WaitOutcome> {
        let start = std::time::Instant::now();
        loop {
            let mut job_statuses = Vec::with_capacity(job_ids.len());
            for job_id in job_ids {
                let status = self
                    .job_info(project_id, job_id)
                    .await?
                    .map_or(JobStatus::Unknown, |record| record.status);
                job_statuses.push(JobStatusSnapshot {
                    job_id: job_id.clone(),
                    status,
                });
            }

            let all_completed = job_statuses
                .iter()
                .all(|snapshot| snapshot.status.is_finished());
            if all_completed {
                return Ok(WaitOutcome {
                    all_completed: true,
                    job_statuses,
                    wait_time: start.elapsed(),
                    timed_out: false,
                });
            }
            if start.elapsed() >= options.timeout {
                return Ok(WaitOutcome {
                    all_completed: false,
                    job_statuses,
                    wait_time: start.elapsed(),
                    timed_out: true,
                });
            }
            tokio::time::sleep(options.poll_interval).await;
        }
    }

    /// Apply a retention policy; never touches the active history document.
    async fn cleanup(&self, project_id: &str, policy: &RetentionPolicy) -> Result<CleanupReport>;

    /// Probe backend health.
    async fn health_status(&self) -> HealthStatus;
}

/// Filter and count aggregation helper shared by adapters: keeps the runs
/// that contribute samples under the job filter and concatenates them.
pub(crate) fn aggregate_run_documents(
    runs: Vec<RunDocument>,
    job_ids: &[String],
    now: DateTime<Utc>,
) -> AggregatedResults {
    let mut aggregated_steps = Vec::new();
    let mut run_count = 0;
    let mut jobs = std::collections::BTreeSet::new();

    for run in runs {
        let mut contributed = false;
        for sample in run.run_data {
            let context = sample.normalized_context();
            if !job_ids.is_empty() && !job_ids.contains(&context.job_id) {
                continue;
            }
            jobs.insert(context.job_id);
            aggregated_steps.push(sample);
            contributed = true;
        }
        if contributed {
            run_count += 1;
        }
    }

    AggregatedResults {
        aggregated_steps,
        run_count,
        job_count: jobs.len(),
        aggregation_timestamp: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telemetry::StepContext;

    fn run_with_job(run_id: &str, job_id: &str, steps: usize) -> RunDocument {
        let run_data = (0..steps)
            .map(|i| StepSample {
                step_text: format!("step {i}"),
                duration: 100.0,
                timestamp: Utc::now(),
                context: Some(StepContext {
                    job_id: job_id.to_string(),
                    ..StepContext::default()
                }),
            })
            .collect();
        RunDocument {
            run_id: run_id.to_string(),
            project_id: "p".to_string(),
            run_data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_empty_job_filter_includes_everything() {
        let runs = vec![run_with_job("r1", "A", 2), run_with_job("r2", "B", 3)];
        let results = aggregate_run_documents(runs, &[], Utc::now());
        assert_eq!(results.aggregated_steps.len(), 5);
        assert_eq!(results.run_count, 2);
        assert_eq!(results.job_count, 2);
    }

    #[test]
    fn test_job_filter_excludes_other_jobs() {
        let runs = vec![run_with_job("r1", "A", 2), run_with_job("r2", "B", 3)];
        let results = aggregate_run_documents(runs, &["A".to_string()], Utc::now());
        assert_eq!(results.aggregated_steps.len(), 2);
        assert_eq!(results.run_count, 1);
        assert_eq!(results.job_count, 1);
    }

    #[test]
    fn test_job_status_terminal_states() {
        assert!(JobStatus::Completed.is_finished());
        assert!(JobStatus::Failed.is_finished());
        assert!(!JobStatus::Registered.is_finished());
        assert!(!JobStatus::Running.is_finished());
        assert!(!JobStatus::Unknown.is_finished());
    }
}
