//! Configuration helper commands: init, print, validate.

use anyhow::{bail, Context};

use heimdall_rs::core::config::layering::default_config_yaml;
use heimdall_rs::core::config::ConfigLoader;

use crate::cli::args::{InitConfigArgs, ValidateConfigArgs};

pub async fn init_config(args: InitConfigArgs) -> anyhow::Result<()> {
    if args.output.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            args.output.display()
        );
    }
    let yaml = default_config_yaml()?;
    std::fs::write(&args.output, yaml)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("Wrote default configuration to {}", args.output.display());
    Ok(())
}

pub async fn print_default_config() -> anyhow::Result<()> {
    print!("{}", default_config_yaml()?);
    Ok(())
}

pub async fn validate_config(args: ValidateConfigArgs) -> anyhow::Result<()> {
    let resolved = ConfigLoader::new()
        .with_file(Some(args.config.clone()))
        .load()
        .with_context(|| format!("{} failed validation", args.config.display()))?;

    println!("{} is valid", args.config.display());
    if args.show_resolved {
        print!("{}", serde_yaml::to_string(&resolved.config)?);
    }
    Ok(())
}
