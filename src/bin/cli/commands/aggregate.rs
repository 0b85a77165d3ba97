//! The `aggregate` command: wait for parallel jobs, gather their stored
//! runs, and analyze the combined samples as one synthetic run.

use anyhow::Context;
use chrono::Utc;

use heimdall_rs::storage::coordinator::{AggregationRequest, JobCoordinator};
use heimdall_rs::AnalysisEngine;

use crate::cli::args::AggregateArgs;
use crate::cli::commands::{open_storage, resolve_config};
use crate::cli::output;

pub async fn aggregate_command(args: AggregateArgs) -> anyhow::Result<()> {
    let (resolved, options) = resolve_config(&args.storage, None, None, &args.reporters)?;
    let project_id = resolved.config.project.id.clone();

    let service = open_storage(&options).await?;
    let coordinator = JobCoordinator::new(&service);

    let mut request = AggregationRequest::for_jobs(args.job_ids.clone(), args.timeout);
    request.wait_for_jobs = args.wait_for_jobs;

    let outcome = coordinator.aggregate(&project_id, &request).await?;
    output::print_wait_outcome(outcome.wait.as_ref());
    tracing::info!(
        project_id,
        runs = outcome.results.run_count,
        jobs = outcome.results.job_count,
        samples = outcome.results.aggregated_steps.len(),
        "aggregated stored runs"
    );

    if let Some(output_file) = &args.output_file {
        let content = serde_json::to_string_pretty(&outcome.results)?;
        std::fs::write(output_file, content)
            .with_context(|| format!("failed to write {}", output_file.display()))?;
        println!("Wrote aggregated samples to {}", output_file.display());
    }

    // Feed the concatenated samples back through the engine.
    let history = service.get_history(&project_id).await?;
    let engine = AnalysisEngine::new(&resolved.config);
    let analysis = engine.analyze(&outcome.results.aggregated_steps, &history, Utc::now());
    service.save_history(&project_id, &analysis.history).await?;
    output::print_storage_events(&service.take_events());

    let reporters = if args.reporters.is_empty() {
        resolved.config.reporting.default_reporters.clone()
    } else {
        args.reporters.clone()
    };
    output::emit_report(&analysis.report, &reporters)?;

    service.close().await?;
    Ok(())
}
