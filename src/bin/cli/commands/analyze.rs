//! The `analyze` command: classify one run against the project baseline.

use anyhow::Context;
use chrono::Utc;

use heimdall_rs::core::telemetry;
use heimdall_rs::AnalysisEngine;

use crate::cli::args::AnalyzeArgs;
use crate::cli::commands::{open_storage, resolve_config};
use crate::cli::output;

pub async fn analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let (resolved, options) = resolve_config(
        &args.storage,
        args.threshold,
        args.max_history,
        &args.reporters,
    )?;
    let project_id = resolved.config.project.id.clone();

    let content = std::fs::read_to_string(&args.run_file)
        .with_context(|| format!("failed to read run file {}", args.run_file.display()))?;
    let samples = telemetry::parse_run(&content)?;
    tracing::info!(
        project_id,
        samples = samples.len(),
        "analyzing run {}",
        args.run_file.display()
    );

    let service = open_storage(&options).await?;
    let history = service.get_history(&project_id).await?;

    let engine = AnalysisEngine::new(&resolved.config);
    let outcome = engine.analyze(&samples, &history, Utc::now());

    service.save_history(&project_id, &outcome.history).await?;
    service
        .save_run(&project_id, &samples, serde_json::Value::Null)
        .await?;
    output::print_storage_events(&service.take_events());

    let reporters = if args.reporters.is_empty() {
        resolved.config.reporting.default_reporters.clone()
    } else {
        args.reporters.clone()
    };
    output::emit_report(&outcome.report, &reporters)?;

    service.close().await?;
    // Regressions are findings, not failures; reporting them is success.
    Ok(())
}
