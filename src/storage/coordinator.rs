//! Multi-job aggregation coordinator.
//!
//! Waits for a set of job ids to reach terminal states, then gathers and
//! concatenates their stored runs into one synthetic input for the analysis
//! engine. The coordinator never mutates history; a timed-out wait degrades
//! to partial aggregation and the caller is told so.

use std::time::Duration;

use crate::core::errors::Result;
use crate::storage::contract::{AggregatedResults, WaitOptions, WaitOutcome};
use crate::storage::service::StorageService;

/// Parameters of one aggregation request.
#[derive(Debug, Clone)]
pub struct AggregationRequest {
    /// Jobs whose samples should be gathered; empty gathers everything
    pub job_ids: Vec<String>,
    /// Whether to wait for the jobs before aggregating
    pub wait_for_jobs: bool,
    /// Wait bounds
    pub wait: WaitOptions,
}

impl Default for AggregationRequest {
    fn default() -> Self {
        Self {
            job_ids: Vec::new(),
            wait_for_jobs: true,
            wait: WaitOptions::default(),
        }
    }
}

impl AggregationRequest {
    /// Request aggregation of the given jobs with a wait bound in seconds.
    pub fn for_jobs(job_ids: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            job_ids,
            wait_for_jobs: true,
            wait: WaitOptions {
                timeout: Duration::from_secs(timeout_secs),
                ..WaitOptions::default()
            },
        }
    }
}

/// The aggregated samples plus the wait outcome when a wait ran.
#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    /// Concatenated samples and counts
    pub results: AggregatedResults,
    /// Wait outcome; `None` when no wait was requested
    pub wait: Option<WaitOutcome>,
}

impl AggregationOutcome {
    /// Whether the aggregation proceeded on partial results after a timeout.
    pub fn is_partial(&self) -> bool {
        self.wait.as_ref().is_some_and(|wait| wait.timed_out)
    }
}

/// Coordinator over one storage service.
pub struct JobCoordinator<'a> {
    service: &'a StorageService,
}

impl<'a> JobCoordinator<'a> {
    /// Create a coordinator over a storage service.
    pub fn new(service: &'a StorageService) -> Self {
        Self { service }
    }

    /// Wait (optionally) for the requested jobs, then aggregate their runs.
    pub async fn aggregate(
        &self,
        project_id: &str,
        request: &AggregationRequest,
    ) -> Result<AggregationOutcome> {
        let wait = if request.wait_for_jobs && !request.job_ids.is_empty() {
            let outcome = self
                .service
                .wait_for_jobs(project_id, &request.job_ids, &request.wait)
                .await?;
            if outcome.timed_out {
                tracing::warn!(
                    project_id,
                    waited_ms = outcome.wait_time.as_millis() as u64,
                    "job wait timed out; aggregating partial results"
                );
            }
            Some(outcome)
        } else {
            None
        };

        let results = self
            .service
            .aggregate_results(project_id, &request.job_ids)
            .await?;

        Ok(AggregationOutcome { results, wait })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tempfile::TempDir;

    use crate::core::telemetry::{StepContext, StepSample};
    use crate::storage::contract::JobStatus;
    use crate::storage::filesystem::FilesystemAdapter;

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

    async fn service(temp: &TempDir) -> StorageService {
        let service = StorageService::with_adapter(
            Arc::new(FilesystemAdapter::new(temp.path())),
            None,
        );
        service.initialize().await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_aggregate_completed_jobs() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;

        for job in ["A", "B"] {
            service
                .register_job("web", job, serde_json::Value::Null)
                .await
                .unwrap();
            service
                .save_run("web", &[sample("step", job)], serde_json::Value::Null)
                .await
                .unwrap();
            service
                .update_job_status("web", job, JobStatus::Completed, serde_json::Value::Null)
                .await
                .unwrap();
        }

        let coordinator = JobCoordinator::new(&service);
        let request = AggregationRequest::for_jobs(vec!["A".to_string(), "B".to_string()], 5);
        let outcome = coordinator.aggregate("web", &request).await.unwrap();

        assert!(!outcome.is_partial());
        assert!(outcome.wait.as_ref().unwrap().all_completed);
        assert_eq!(outcome.results.run_count, 2);
        assert_eq!(outcome.results.job_count, 2);
        assert_eq!(outcome.results.aggregated_steps.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_partial_aggregation() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;

        service
            .register_job("web", "A", serde_json::Value::Null)
            .await
            .unwrap();
        service
            .save_run("web", &[sample("step", "A")], serde_json::Value::Null)
            .await
            .unwrap();

        let coordinator = JobCoordinator::new(&service);
        let request = AggregationRequest {
            job_ids: vec!["A".to_string()],
            wait_for_jobs: true,
            wait: WaitOptions {
                timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(50),
            },
        };
        let outcome = coordinator.aggregate("web", &request).await.unwrap();

        assert!(outcome.is_partial());
        let wait = outcome.wait.unwrap();
        assert!(!wait.all_completed);
        assert!(wait.wait_time >= Duration::from_millis(200));
        assert_eq!(wait.job_statuses[0].status, JobStatus::Registered);
        // Partial results are still delivered.
        assert_eq!(outcome.results.aggregated_steps.len(), 1);
    }

    #[tokio::test]
    async fn test_no_wait_when_disabled() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp).await;
        let coordinator = JobCoordinator::new(&service);

        let request = AggregationRequest {
            job_ids: vec![],
            wait_for_jobs: false,
            wait: WaitOptions::default(),
        };
        let outcome = coordinator.aggregate("web", &request).await.unwrap();
        assert!(outcome.wait.is_none());
        assert_eq!(outcome.results.run_count, 0);
    }
}
