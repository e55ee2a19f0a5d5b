//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module         | Commands handled                         |
//! |----------------|------------------------------------------|
//! | `config`       | `Init`, `Config`, `Transitions`          |
//! | `directory`    | `User`, `Address`, `Area`                |
//! | `activity`     | `Activity`                               |
//! | `need`         | `Need`                                   |
//! | `consultation` | `Consultation`                           |
//!
//! Results are printed as JSON on stdout. A rejected input is printed with
//! its `error_code` and the process exits non-zero.

pub mod activity;
pub mod config;
pub mod consultation;
pub mod directory;
pub mod need;

pub use activity::cmd_activity;
pub use config::{cmd_config, cmd_init, cmd_transitions};
pub use consultation::cmd_consultation;
pub use directory::{cmd_address, cmd_area, cmd_user};
pub use need::cmd_need;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use roadworks::common::PlanarGeometry;
use roadworks::errors::{Rejection, RoadworksError};
use roadworks::roadworks::{Caller, DbHandle, RoadworksDb, RoadworksService};
use roadworks::roadworks_config::RoadworksConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::Cli;

/// File, then environment, then CLI flags.
pub fn load_config(cli: &Cli) -> Result<RoadworksConfig> {
    let mut config = RoadworksConfig::load_or_default(&cli.config)?.with_env()?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    Ok(config)
}

pub fn open_db(config: &RoadworksConfig) -> Result<DbHandle> {
    let db = RoadworksDb::new(&config.database.path).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database.path.display()
        )
    })?;
    Ok(DbHandle::new(db))
}

pub fn open_service(config: &RoadworksConfig) -> Result<RoadworksService> {
    config.validate()?;
    Ok(RoadworksService::new(
        open_db(config)?,
        Arc::new(PlanarGeometry),
        Arc::new(config.clone()),
    ))
}

pub async fn acting_caller(cli: &Cli, service: &RoadworksService) -> Result<Caller> {
    let uuid = cli
        .user
        .context("This command needs an acting user: pass --user or set ROADWORKS_USER")?;
    Ok(service.resolve_caller(uuid).await?)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Print the accepted entity, or the input tagged with its validation code.
pub fn report<I: Serialize, T: Serialize>(input: I, result: Result<T, RoadworksError>) -> Result<()> {
    match result {
        Ok(value) => print_json(&value),
        Err(err) => {
            let rejection = Rejection::from_error(input, err)?;
            print_json(&rejection)?;
            anyhow::bail!("Rejected: {}", rejection.error_code)
        }
    }
}
