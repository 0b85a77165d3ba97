//! Command implementations for the heimdall CLI.

mod aggregate;
mod analyze;
mod cleanup;
mod config;
mod health;
mod seed;

pub use aggregate::aggregate_command;
pub use analyze::analyze_command;
pub use cleanup::cleanup_command;
pub use config::{init_config, print_default_config, validate_config};
pub use health::health_check_command;
pub use seed::seed_command;

use anyhow::bail;

use heimdall_rs::core::config::{CliOverrides, ConfigLoader, ResolvedConfig, StorageOptions};
use heimdall_rs::StorageService;

use crate::cli::args::StorageArgs;

/// Resolve the layered configuration for a data command.
///
/// Exactly one of `--config`, `--db-connection`, `--bucket-name`, or
/// `--history-file` must identify the storage target; more than one
/// explicit target is a configuration conflict, none is an error.
pub(crate) fn resolve_config(
    storage: &StorageArgs,
    threshold: Option<f64>,
    max_history: Option<usize>,
    reporters: &[String],
) -> anyhow::Result<(ResolvedConfig, StorageOptions)> {
    let explicit_targets = [
        storage.db_connection.is_some(),
        storage.bucket_name.is_some(),
        storage.history_file.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();

    if explicit_targets > 1 {
        bail!(
            "conflicting storage targets: pass only one of --db-connection, \
             --bucket-name, or --history-file"
        );
    }
    if explicit_targets == 0 && storage.config.is_none() {
        bail!(
            "no storage target: pass one of --config, --db-connection, \
             --bucket-name, or --history-file"
        );
    }

    let resolved = ConfigLoader::new()
        .with_file(storage.config.clone())
        .with_environment(storage.environment.clone())
        .with_profile(storage.profile.clone())
        .with_overrides(CliOverrides {
            threshold,
            max_history,
            project_id: storage.project_id.clone(),
            db_connection: storage.db_connection.clone(),
            bucket_name: storage.bucket_name.clone(),
            reporters: reporters.to_vec(),
        })
        .with_history_file(storage.history_file.clone())
        .load()?;

    let options = resolved
        .config
        .storage_options()
        .with_history_file(resolved.history_file.clone());

    Ok((resolved, options))
}

/// Build and initialize the storage service for resolved options.
pub(crate) async fn open_storage(options: &StorageOptions) -> anyhow::Result<StorageService> {
    let service = StorageService::from_options(options)?;
    service.initialize().await?;
    Ok(service)
}
