//! The `cleanup` command: apply retention policies through the adapter.

use anyhow::bail;
use dialoguer::Confirm;

use heimdall_rs::storage::retention::{parse_older_than, RetentionPolicy};

use crate::cli::args::CleanupArgs;
use crate::cli::commands::{open_storage, resolve_config};

pub async fn cleanup_command(args: CleanupArgs) -> anyhow::Result<()> {
    let (resolved, options) = resolve_config(&args.storage, None, None, &[])?;
    let project_id = resolved.config.project.id.clone();

    let max_age = parse_older_than(&args.older_than)?;
    let mut policy = RetentionPolicy::from_config(&options.retention).with_older_than(max_age);
    if args.dry_run {
        policy = policy.dry_run();
    }

    if !args.dry_run && !args.force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Remove archived runs and job records for '{project_id}' older than {}?",
                args.older_than.trim()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            bail!("cleanup aborted");
        }
    }

    let service = open_storage(&options).await?;
    let report = service.cleanup(&project_id, &policy).await?;
    service.close().await?;

    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    println!(
        "{verb} {} run(s) and {} job record(s) ({} bytes)",
        report.runs_removed, report.jobs_removed, report.bytes_reclaimed
    );
    Ok(())
}
