use anyhow::Result;
use roadworks::roadworks::models::ConsultationRequest;
use roadworks::roadworks_config::RoadworksConfig;

use super::super::{Cli, ConsultationCommands};

pub async fn cmd_consultation(
    cli: &Cli,
    config: &RoadworksConfig,
    command: ConsultationCommands,
) -> Result<()> {
    let service = super::open_service(config)?;
    let caller = super::acting_caller(cli, &service).await?;

    match command {
        ConsultationCommands::List { activity } => {
            let records = service.list_consultations(&caller, activity).await?;
            super::print_json(&records)
        }
        ConsultationCommands::Create { file } => {
            let request: ConsultationRequest = super::read_json(&file)?;
            let result = service.create_consultation(&caller, request.clone()).await;
            super::report(request, result)
        }
        ConsultationCommands::Update { file } => {
            let request: ConsultationRequest = super::read_json(&file)?;
            let result = service.update_consultation(&caller, request.clone()).await;
            super::report(request, result)
        }
    }
}
