use anyhow::Result;
use roadworks::roadworks::models::{NeedFilter, NeedInput};
use roadworks::roadworks_config::RoadworksConfig;

use super::super::{Cli, NeedCommands};

pub async fn cmd_need(cli: &Cli, config: &RoadworksConfig, command: NeedCommands) -> Result<()> {
    let service = super::open_service(config)?;
    let caller = super::acting_caller(cli, &service).await?;

    match command {
        NeedCommands::List {
            uuids,
            activity,
            status,
            mine,
            area_manager,
            intersects,
        } => {
            let filter = NeedFilter {
                uuids,
                activity_uuid: activity,
                status,
                only_mine: mine,
                area_manager,
                intersects_activity: intersects,
            };
            let needs = service.list_needs(&caller, filter).await?;
            super::print_json(&needs)
        }
        NeedCommands::Create { file } => {
            let input: NeedInput = super::read_json(&file)?;
            let result = service.create_need(&caller, input.clone()).await;
            super::report(input, result)
        }
        NeedCommands::Update { file } => {
            let input: NeedInput = super::read_json(&file)?;
            let result = service.update_need(&caller, input.clone()).await;
            super::report(input, result)
        }
        NeedCommands::Delete { uuid, release_only } => {
            let result = service.delete_need(&caller, uuid, release_only).await;
            super::report(
                serde_json::json!({ "uuid": uuid, "release_only": release_only }),
                result.map(|()| serde_json::json!({ "deleted": uuid, "released": release_only })),
            )
        }
    }
}
