//! Project setup and configuration commands.

use anyhow::Result;
use roadworks::roadworks::models::ActivityStatus;
use roadworks::roadworks_config::RoadworksConfig;
use tracing::info;

use super::super::{Cli, ConfigCommands};

/// Write a default config file when none exists and create the database.
pub fn cmd_init(cli: &Cli, config: &RoadworksConfig) -> Result<()> {
    if cli.config.exists() {
        println!("Config file already exists: {}", cli.config.display());
    } else {
        RoadworksConfig::default().save(&cli.config)?;
        println!("Created {}", cli.config.display());
    }
    config.validate()?;
    super::open_db(config)?;
    info!(path = %config.database.path.display(), "Database ready");
    println!("Database ready: {}", config.database.path.display());
    Ok(())
}

pub fn cmd_config(
    cli: &Cli,
    config: &RoadworksConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            if cli.config.exists() {
                println!("# Config file: {}", cli.config.display());
            } else {
                println!("# No config file at {}; using defaults", cli.config.display());
            }
            println!("# Effective values (with env/CLI overrides):");
            print!("{}", toml::to_string_pretty(config)?);
        }
        Some(ConfigCommands::Validate) => match config.validate() {
            Ok(()) => println!("Configuration is valid"),
            Err(err) => anyhow::bail!("Configuration is invalid: {:#}", err),
        },
        Some(ConfigCommands::Init) => {
            if cli.config.exists() {
                anyhow::bail!("Config file already exists: {}", cli.config.display());
            }
            RoadworksConfig::default().save(&cli.config)?;
            println!("Created {}", cli.config.display());
        }
    }
    Ok(())
}

/// One row per source status listing the accepted targets.
pub fn cmd_transitions() {
    println!("{:<12} allowed targets", "from");
    for from in ActivityStatus::ALL {
        let targets: Vec<&str> = ActivityStatus::ALL
            .into_iter()
            .filter(|to| from.can_transition_to(*to))
            .map(|to| to.as_str())
            .collect();
        let targets = if targets.is_empty() {
            "(terminal)".to_string()
        } else {
            targets.join(", ")
        };
        println!("{:<12} {}", from.as_str(), targets);
    }
}
