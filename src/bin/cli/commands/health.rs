//! The `health-check` command: configuration and backend probes.

use anyhow::bail;
use console::style;

use heimdall_rs::storage::HealthState;

use crate::cli::args::HealthCheckArgs;
use crate::cli::commands::{open_storage, resolve_config};

pub async fn health_check_command(args: HealthCheckArgs) -> anyhow::Result<()> {
    // Configuration resolution and validation are the first check.
    let (resolved, options) = resolve_config(&args.storage, None, None, &[])?;
    println!(
        "{} configuration valid (project '{}')",
        style("ok").green(),
        resolved.config.project.id
    );

    let service = open_storage(&options).await?;
    let health = service.health_status().await;
    service.close().await?;

    match health.status {
        HealthState::Healthy => {
            println!(
                "{} {} adapter healthy: {}",
                style("ok").green(),
                health.kind,
                health.details
            );
            Ok(())
        }
        HealthState::Degraded => {
            println!(
                "{} {} adapter degraded: {}",
                style("warn").yellow(),
                health.kind,
                health.details
            );
            Ok(())
        }
        HealthState::Unhealthy | HealthState::Error => {
            let detail = health.error.unwrap_or_else(|| health.details.clone());
            bail!("{} adapter unhealthy: {detail}", health.kind);
        }
    }
}
