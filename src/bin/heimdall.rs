//! Heimdall CLI - performance-regression sentinel for CI test telemetry.

use clap::Parser;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    // Execute command
    match cli.command {
        Commands::Analyze(args) => {
            cli::analyze_command(args).await?;
        }
        Commands::Seed(args) => {
            cli::seed_command(args).await?;
        }
        Commands::Aggregate(args) => {
            cli::aggregate_command(args).await?;
        }
        Commands::Cleanup(args) => {
            cli::cleanup_command(args).await?;
        }
        Commands::HealthCheck(args) => {
            cli::health_check_command(args).await?;
        }
        Commands::InitConfig(args) => {
            cli::init_config(args).await?;
        }
        Commands::PrintDefaultConfig => {
            cli::print_default_config().await?;
        }
        Commands::ValidateConfig(args) => {
            cli::validate_config(args).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_cli_parsing_analyze() {
        let cli = Cli::parse_from([
            "heimdall",
            "analyze",
            "--run-file",
            "run.json",
            "--history-file",
            "history.json",
            "--threshold",
            "2.5",
            "--reporter",
            "console",
            "--reporter",
            "json",
        ]);
        assert!(!cli.verbose);
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.run_file, PathBuf::from("run.json"));
                assert_eq!(args.storage.history_file, Some(PathBuf::from("history.json")));
                assert_eq!(args.threshold, Some(2.5));
                assert_eq!(args.reporters, vec!["console", "json"]);
            }
            _ => panic!("expected analyze command"),
        }
    }

    #[test]
    fn test_cli_parsing_analyze_with_config_and_profile() {
        let cli = Cli::parse_from([
            "heimdall",
            "--verbose",
            "analyze",
            "--run-file",
            "run.json",
            "--config",
            "heimdall.yml",
            "--environment",
            "ci",
            "--profile",
            "strict",
            "--project-id",
            "checkout",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.storage.config, Some(PathBuf::from("heimdall.yml")));
                assert_eq!(args.storage.environment.as_deref(), Some("ci"));
                assert_eq!(args.storage.profile.as_deref(), Some("strict"));
                assert_eq!(args.storage.project_id.as_deref(), Some("checkout"));
            }
            _ => panic!("expected analyze command"),
        }
    }

    #[test]
    fn test_cli_parsing_aggregate_job_ids() {
        let cli = Cli::parse_from([
            "heimdall",
            "aggregate",
            "--job-ids",
            "job-1,job-2,job-3",
            "--wait-for-jobs",
            "false",
            "--timeout",
            "120",
            "--bucket-name",
            "perf-results",
        ]);
        match cli.command {
            Commands::Aggregate(args) => {
                assert_eq!(args.job_ids, vec!["job-1", "job-2", "job-3"]);
                assert!(!args.wait_for_jobs);
                assert_eq!(args.timeout, 120);
                assert_eq!(args.storage.bucket_name.as_deref(), Some("perf-results"));
            }
            _ => panic!("expected aggregate command"),
        }
    }

    #[test]
    fn test_cli_parsing_seed() {
        let cli = Cli::parse_from([
            "heimdall",
            "seed",
            "--run-files",
            "runs/*.json",
            "--db-connection",
            "mongodb://localhost:27017",
        ]);
        match cli.command {
            Commands::Seed(args) => {
                assert_eq!(args.run_files, "runs/*.json");
                assert_eq!(
                    args.storage.db_connection.as_deref(),
                    Some("mongodb://localhost:27017")
                );
            }
            _ => panic!("expected seed command"),
        }
    }

    #[test]
    fn test_cli_parsing_cleanup() {
        let cli = Cli::parse_from([
            "heimdall",
            "cleanup",
            "--older-than",
            "30d",
            "--dry-run",
            "--history-file",
            "history.json",
        ]);
        match cli.command {
            Commands::Cleanup(args) => {
                assert_eq!(args.older_than, "30d");
                assert!(args.dry_run);
                assert!(!args.force);
            }
            _ => panic!("expected cleanup command"),
        }
    }

    #[test]
    fn test_cli_parsing_config_commands() {
        let cli = Cli::parse_from(["heimdall", "init-config", "--output", "custom.yml", "--force"]);
        match cli.command {
            Commands::InitConfig(args) => {
                assert_eq!(args.output, PathBuf::from("custom.yml"));
                assert!(args.force);
            }
            _ => panic!("expected init-config command"),
        }

        let cli = Cli::parse_from(["heimdall", "print-default-config"]);
        assert!(matches!(cli.command, Commands::PrintDefaultConfig));

        let cli = Cli::parse_from(["heimdall", "validate-config", "--config", "heimdall.yml"]);
        match cli.command {
            Commands::ValidateConfig(args) => {
                assert_eq!(args.config, PathBuf::from("heimdall.yml"));
            }
            _ => panic!("expected validate-config command"),
        }
    }

    #[test]
    fn test_cli_parsing_health_check() {
        let cli = Cli::parse_from(["heimdall", "health-check", "--bucket-name", "perf"]);
        match cli.command {
            Commands::HealthCheck(args) => {
                assert_eq!(args.storage.bucket_name.as_deref(), Some("perf"));
            }
            _ => panic!("expected health-check command"),
        }
    }
}
