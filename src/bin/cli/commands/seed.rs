//! The `seed` command: initialize the baseline from archived run files.

use anyhow::{bail, Context};
use indexmap::IndexMap;

use heimdall_rs::core::telemetry;

use crate::cli::args::SeedArgs;
use crate::cli::commands::{open_storage, resolve_config};
use crate::cli::output;

pub async fn seed_command(args: SeedArgs) -> anyhow::Result<()> {
    let (resolved, options) = resolve_config(&args.storage, None, args.max_history, &[])?;
    let project_id = resolved.config.project.id.clone();
    let max_history = resolved.config.analysis.max_history;

    let paths: Vec<_> = glob::glob(&args.run_files)
        .with_context(|| format!("invalid glob '{}'", args.run_files))?
        .collect::<Result<_, _>>()
        .context("failed to expand run file glob")?;
    if paths.is_empty() {
        bail!("no run files matched '{}'", args.run_files);
    }

    let mut aggregated: IndexMap<String, Vec<f64>> = IndexMap::new();
    let mut sample_count = 0usize;
    for path in &paths {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run file {}", path.display()))?;
        for sample in telemetry::parse_run(&content)? {
            aggregated
                .entry(sample.step_text)
                .or_default()
                .push(sample.duration);
            sample_count += 1;
        }
    }

    // The baseline keeps only the most recent window per step.
    for durations in aggregated.values_mut() {
        if durations.len() > max_history {
            let excess = durations.len() - max_history;
            durations.drain(..excess);
        }
    }

    let service = open_storage(&options).await?;
    service.seed_history(&project_id, &aggregated).await?;
    output::print_storage_events(&service.take_events());
    service.close().await?;

    println!(
        "Seeded {} step baseline(s) from {} sample(s) across {} run file(s)",
        aggregated.len(),
        sample_count,
        paths.len()
    );
    Ok(())
}
