//! Document-store adapter backed by MongoDB.
//!
//! Three collections per configured database:
//!
//! - `performance_history`: one document per project, replaced upsert-style
//!   with `{projectId, history, lastUpdated}`.
//! - `performance_runs`: append-only, indexed by `(projectId, timestamp desc)`.
//! - `performance_jobs`: coordination records, unique per `(projectId, jobId)`.
//!
//! The connection is established lazily with bounded timeouts. Index
//! creation failures do not fail initialization when the collections
//! already exist.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use indexmap::IndexMap;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, FindOptions, IndexOptions, ReplaceOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::core::errors::{HeimdallError, Result};
use crate::core::history::{HistoryDocument, HistoryEntry};
use crate::core::telemetry::StepSample;
use crate::storage::contract::{
    aggregate_run_documents, AdapterKind, AggregatedResults, HealthState, HealthStatus, JobRecord,
    JobStatus, RunDocument, StorageAdapter,
};
use crate::storage::retention::{CleanupReport, RetentionPolicy};

const HISTORY_COLLECTION: &str = "performance_history";
const RUNS_COLLECTION: &str = "performance_runs";
const JOBS_COLLECTION: &str = "performance_jobs";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(3);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on runs considered by one aggregation.
const MAX_AGGREGATED_RUNS: i64 = 1000;

/// The per-project history wrapper stored in `performance_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    project_id: String,
    history: HistoryDocument,
    last_updated: DateTime<Utc>,
}

/// MongoDB-backed storage adapter.
pub struct DocumentStorageAdapter {
    uri: String,
    database_name: String,
    client: OnceCell<Client>,
}

impl DocumentStorageAdapter {
    /// Create an adapter over a connection string and database name. The
    /// connection itself is established lazily.
    pub fn new(uri: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database_name: database_name.into(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                let mut options = ClientOptions::parse(&self.uri).await?;
                options.connect_timeout = Some(CONNECT_TIMEOUT);
                options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
                Client::with_options(options).map_err(HeimdallError::from)
            })
            .await
    }

    async fn database(&self) -> Result<Database> {
        Ok(self.client().await?.database(&self.database_name))
    }

    async fn history_collection(&self) -> Result<Collection<HistoryRecord>> {
        Ok(self.database().await?.collection(HISTORY_COLLECTION))
    }

    async fn runs_collection(&self) -> Result<Collection<RunDocument>> {
        Ok(self.database().await?.collection(RUNS_COLLECTION))
    }

    async fn jobs_collection(&self) -> Result<Collection<JobRecord>> {
        Ok(self.database().await?.collection(JOBS_COLLECTION))
    }

    async fn ensure_indexes(&self, db: &Database) -> Result<()> {
        let runs_index = IndexModel::builder()
            .keys(doc! {"projectId": 1, "timestamp": -1})
            .build();
        db.collection::<RunDocument>(RUNS_COLLECTION)
            .create_index(runs_index, None)
            .await?;

        let history_index = IndexModel::builder()
            .keys(doc! {"projectId": 1})
            .options(IndexOptions::builder().unique(true).build())
            .build();
        db.collection::<HistoryRecord>(HISTORY_COLLECTION)
            .create_index(history_index, None)
            .await?;

        let jobs_index = IndexModel::builder()
            .keys(doc! {"projectId": 1, "jobId": 1})
            .options(IndexOptions::builder().unique(true).build())
            .build();
        db.collection::<JobRecord>(JOBS_COLLECTION)
            .create_index(jobs_index, None)
            .await?;

        Ok(())
    }
}

/// Bound a backend operation by the per-operation timeout.
async fn with_op_timeout<T>(
    operation: &str,
    future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(OPERATION_TIMEOUT, future).await {
        Ok(result) => result,
        Err(_) => Err(HeimdallError::timeout(
            format!("document store operation '{operation}' timed out"),
            OPERATION_TIMEOUT.as_millis() as u64,
        )),
    }
}

#[async_trait]
impl StorageAdapter for DocumentStorageAdapter {
    async fn initialize(&self) -> Result<()> {
        let db = self.database().await?;
        if let Err(index_error) = with_op_timeout("create_indexes", self.ensure_indexes(&db)).await
        {
            let collections = db.list_collection_names(None).await.unwrap_or_default();
            let present = collections.iter().any(|name| name == HISTORY_COLLECTION)
                && collections.iter().any(|name| name == RUNS_COLLECTION);
            if present {
                tracing::warn!(error = %index_error, "index creation failed; collections exist, continuing");
            } else {
                return Err(index_error.with_operation("initialize"));
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(client) = self.client.get() {
            client.clone().shutdown().await;
        }
        Ok(())
    }

    fn adapter_type(&self) -> AdapterKind {
        AdapterKind::Database
    }

    async fn get_history(&self, project_id: &str) -> Result<HistoryDocument> {
        let collection = self.history_collection().await?;
        let record = with_op_timeout("get_history", async {
            collection
                .find_one(doc! {"projectId": project_id}, None)
                .await
                .map_err(HeimdallError::from)
        })
        .await?;
        Ok(record.map(|record| record.history).unwrap_or_default())
    }

    async fn save_history(&self, project_id: &str, history: &HistoryDocument) -> Result<()> {
        let collection = self.history_collection().await?;
        let record = HistoryRecord {
            project_id: project_id.to_string(),
            history: history.clone(),
            last_updated: Utc::now(),
        };
        with_op_timeout("save_history", async {
            collection
                .replace_one(
                    doc! {"projectId": project_id},
                    &record,
                    ReplaceOptions::builder().upsert(true).build(),
                )
                .await
                .map_err(HeimdallError::from)
        })
        .await?;
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
        let collection = self.runs_collection().await?;
        with_op_timeout("save_run", async {
            collection
                .insert_one(&document, None)
                .await
                .map_err(HeimdallError::from)
        })
        .await?;
        Ok(run_id)
    }

    async fn get_runs(&self, project_id: &str, limit: usize) -> Result<Vec<RunDocument>> {
        let collection = self.runs_collection().await?;
        let options = FindOptions::builder()
            .sort(doc! {"timestamp": -1})
            .limit(limit as i64)
            .build();
        with_op_timeout("get_runs", async {
            collection
                .find(doc! {"projectId": project_id}, options)
                .await
                .map_err(HeimdallError::from)?
                .try_collect()
                .await
                .map_err(HeimdallError::from)
        })
        .await
    }

    async fn aggregate_results(
        &self,
        project_id: &str,
        job_ids: &[String],
    ) -> Result<AggregatedResults> {
        let collection = self.runs_collection().await?;
        let options = FindOptions::builder()
            .sort(doc! {"timestamp": -1})
            .limit(MAX_AGGREGATED_RUNS)
            .build();
        let mut runs: Vec<RunDocument> = with_op_timeout("aggregate_results", async {
            collection
                .find(doc! {"projectId": project_id}, options)
                .await
                .map_err(HeimdallError::from)?
                .try_collect()
                .await
                .map_err(HeimdallError::from)
        })
        .await?;
        runs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
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
        let collection = self.jobs_collection().await?;
        with_op_timeout("register_job", async {
            collection
                .replace_one(
                    doc! {"projectId": project_id, "jobId": job_id},
                    &record,
                    ReplaceOptions::builder().upsert(true).build(),
                )
                .await
                .map_err(HeimdallError::from)
        })
        .await?;
        Ok(())
    }

    async fn update_job_status(
        &self,
        project_id: &str,
        job_id: &str,
        status: JobStatus,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let collection = self.jobs_collection().await?;
        let filter = doc! {"projectId": project_id, "jobId": job_id};
        let mut record = with_op_timeout("update_job_status", async {
            collection
                .find_one(filter.clone(), None)
                .await
                .map_err(HeimdallError::from)
        })
        .await?
        .ok_or_else(|| {
            HeimdallError::validation_field(format!("job '{job_id}' is not registered"), "jobId")
        })?;

        record.status = status;
        record.last_updated = Utc::now();
        if !metadata.is_null() {
            record.metadata = metadata;
        }
        with_op_timeout("update_job_status", async {
            collection
                .replace_one(filter, &record, None)
                .await
                .map_err(HeimdallError::from)
        })
        .await?;
        Ok(())
    }

    async fn job_info(&self, project_id: &str, job_id: &str) -> Result<Option<JobRecord>> {
        let collection = self.jobs_collection().await?;
        with_op_timeout("job_info", async {
            collection
                .find_one(doc! {"projectId": project_id, "jobId": job_id}, None)
                .await
                .map_err(HeimdallError::from)
        })
        .await
    }

    async fn cleanup(&self, project_id: &str, policy: &RetentionPolicy) -> Result<CleanupReport> {
        let now = Utc::now();
        let runs = self.runs_collection().await?;
        let jobs = self.jobs_collection().await?;

        let runs_filter = doc! {
            "projectId": project_id,
            "timestamp": {"$lt": policy.runs_cutoff(now).to_rfc3339()},
        };
        let finished_filter = doc! {
            "projectId": project_id,
            "status": {"$in": ["completed", "failed"]},
            "lastUpdated": {"$lt": policy.jobs_cutoff(now, true).to_rfc3339()},
        };
        let unfinished_filter = doc! {
            "projectId": project_id,
            "status": {"$nin": ["completed", "failed"]},
            "lastUpdated": {"$lt": policy.jobs_cutoff(now, false).to_rfc3339()},
        };

        let report = with_op_timeout("cleanup", async {
            if policy.dry_run {
                let runs_removed = runs.count_documents(runs_filter, None).await?;
                let jobs_removed = jobs.count_documents(finished_filter, None).await?
                    + jobs.count_documents(unfinished_filter, None).await?;
                Ok(CleanupReport {
                    runs_removed: runs_removed as usize,
                    jobs_removed: jobs_removed as usize,
                    bytes_reclaimed: 0,
                    dry_run: true,
                })
            } else {
                let runs_removed = runs.delete_many(runs_filter, None).await?.deleted_count;
                let jobs_removed = jobs.delete_many(finished_filter, None).await?.deleted_count
                    + jobs.delete_many(unfinished_filter, None).await?.deleted_count;
                Ok(CleanupReport {
                    runs_removed: runs_removed as usize,
                    jobs_removed: jobs_removed as usize,
                    bytes_reclaimed: 0,
                    dry_run: false,
                })
            }
        })
        .await?;

        Ok(report)
    }

    async fn health_status(&self) -> HealthStatus {
        let probe = async {
            let db = self.database().await?;
            with_op_timeout("ping", async {
                db.run_command(doc! {"ping": 1}, None)
                    .await
                    .map_err(HeimdallError::from)
            })
            .await
        };

        match probe.await {
            Ok(_) => HealthStatus {
                kind: AdapterKind::Database,
                status: HealthState::Healthy,
                details: format!("database '{}' answered ping", self.database_name),
                error: None,
            },
            Err(e) => HealthStatus {
                kind: AdapterKind::Database,
                status: HealthState::Error,
                details: format!("database '{}' is unreachable", self.database_name),
                error: Some(e.to_string()),
            },
        }
    }
}
