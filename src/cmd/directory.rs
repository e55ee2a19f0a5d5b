//! Reference data: users, addresses and management areas.
//!
//! These commands maintain the directory the core reads from; they act
//! without an authenticated caller.

use std::str::FromStr;

use anyhow::{Context, Result};
use roadworks::common::Polygon;
use roadworks::roadworks::Role;
use roadworks::roadworks::models::{Address, ManagementArea, User};
use roadworks::roadworks_config::RoadworksConfig;
use uuid::Uuid;

use super::super::{AddressCommands, AreaCommands, UserCommands};

pub async fn cmd_user(config: &RoadworksConfig, command: UserCommands) -> Result<()> {
    let db = super::open_db(config)?;
    match command {
        UserCommands::Add {
            display_name,
            roles,
            org_unit,
            uuid,
            inactive,
        } => {
            let roles = roles
                .iter()
                .map(|r| Role::from_str(r).map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?;
            let user = User {
                uuid: uuid.unwrap_or_else(Uuid::new_v4),
                display_name,
                org_unit,
                roles,
                active: !inactive,
            };
            let stored = user.clone();
            db.call(move |db| Ok(db.store().upsert_user(&stored)?))
                .await?;
            super::print_json(&user)
        }
        UserCommands::List => {
            let users = db.call(|db| Ok(db.store().list_users()?)).await?;
            super::print_json(&users)
        }
    }
}

pub async fn cmd_address(config: &RoadworksConfig, command: AddressCommands) -> Result<()> {
    let db = super::open_db(config)?;
    match command {
        AddressCommands::Add {
            street,
            x,
            y,
            number,
        } => {
            let address = Address {
                street,
                house_number: number,
                x,
                y,
            };
            let stored = address.clone();
            db.call(move |db| Ok(db.store().insert_address(&stored)?))
                .await?;
            super::print_json(&address)
        }
    }
}

pub async fn cmd_area(config: &RoadworksConfig, command: AreaCommands) -> Result<()> {
    let db = super::open_db(config)?;
    match command {
        AreaCommands::Add {
            manager,
            name,
            file,
        } => {
            let geometry: Polygon = super::read_json(&file)
                .with_context(|| format!("{} must hold a polygon", file.display()))?;
            let area = ManagementArea {
                uuid: Uuid::new_v4(),
                manager,
                name,
                geometry,
            };
            let stored = area.clone();
            db.call(move |db| Ok(db.store().insert_management_area(&stored)?))
                .await?;
            super::print_json(&area)
        }
    }
}
