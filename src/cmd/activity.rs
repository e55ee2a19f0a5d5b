use anyhow::Result;
use roadworks::roadworks::models::{ActivityFilter, ActivityInput};
use roadworks::roadworks_config::RoadworksConfig;
use tracing::debug;

use super::super::{ActivityCommands, Cli};

pub async fn cmd_activity(
    cli: &Cli,
    config: &RoadworksConfig,
    command: ActivityCommands,
) -> Result<()> {
    let service = super::open_service(config)?;
    let caller = super::acting_caller(cli, &service).await?;
    debug!(caller = %caller.uuid, "Resolved acting user");

    match command {
        ActivityCommands::List {
            uuid,
            statuses,
            summary,
        } => {
            let filter = ActivityFilter {
                uuid,
                statuses,
                summary,
            };
            let activities = service.list_activities(&caller, filter).await?;
            super::print_json(&activities)
        }
        ActivityCommands::Show { uuid } => {
            let activity = service.get_activity(&caller, uuid).await?;
            super::print_json(&activity)
        }
        ActivityCommands::History { uuid } => {
            let history = service.activity_history(&caller, uuid).await?;
            super::print_json(&history)
        }
        ActivityCommands::Create { file } => {
            let input: ActivityInput = super::read_json(&file)?;
            let result = service.create_activity(&caller, input.clone()).await;
            super::report(input, result)
        }
        ActivityCommands::Update { file } => {
            let input: ActivityInput = super::read_json(&file)?;
            let result = service.update_activity(&caller, input.clone()).await;
            super::report(input, result)
        }
        ActivityCommands::Delete { uuid, reason } => {
            let result = service.delete_activity(&caller, uuid, reason.clone()).await;
            super::report(
                serde_json::json!({ "uuid": uuid, "delete_reason": reason }),
                result.map(|()| serde_json::json!({ "deleted": uuid })),
            )
        }
    }
}
