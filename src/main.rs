use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use roadworks::roadworks::models::{ActivityStatus, NeedStatus};

mod cmd;

#[derive(Parser)]
#[command(name = "roadworks")]
#[command(version, about = "Roadwork needs and activities through their approval lifecycle")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to roadworks.toml
    #[arg(long, global = true, env = "ROADWORKS_CONFIG", default_value = "roadworks.toml")]
    pub config: PathBuf,

    /// SQLite database path. Overrides the config file and ROADWORKS_DB_PATH.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Acting user, looked up in the user directory
    #[arg(long, global = true, env = "ROADWORKS_USER")]
    pub user: Option<Uuid>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default roadworks.toml (if missing) and create the database
    Init,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Manage the user directory
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage address reference data used to name activities
    Address {
        #[command(subcommand)]
        command: AddressCommands,
    },
    /// Manage territory managers' areas
    Area {
        #[command(subcommand)]
        command: AreaCommands,
    },
    /// Roadwork activities
    Activity {
        #[command(subcommand)]
        command: ActivityCommands,
    },
    /// Roadwork needs
    Need {
        #[command(subcommand)]
        command: NeedCommands,
    },
    /// Consultation feedback on activities
    Consultation {
        #[command(subcommand)]
        command: ConsultationCommands,
    },
    /// Print the activity status transition table
    Transitions,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration
    Validate,
    /// Initialize a default roadworks.toml file
    Init,
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// Add or replace a user
    Add {
        display_name: String,
        /// Role: administrator, territory_manager, orderer, viewer (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,
        #[arg(long, default_value = "")]
        org_unit: String,
        /// Reuse an existing uuid instead of generating one
        #[arg(long)]
        uuid: Option<Uuid>,
        /// Store the user as deactivated
        #[arg(long)]
        inactive: bool,
    },
    /// List all users
    List,
}

#[derive(Subcommand, Clone)]
pub enum AddressCommands {
    Add {
        street: String,
        x: f64,
        y: f64,
        #[arg(long)]
        number: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum AreaCommands {
    /// Add a management area from a polygon JSON file
    Add {
        #[arg(long)]
        manager: Uuid,
        #[arg(long, default_value = "")]
        name: String,
        file: PathBuf,
    },
}

#[derive(Subcommand, Clone)]
pub enum ActivityCommands {
    List {
        #[arg(long)]
        uuid: Option<Uuid>,
        /// Only these statuses (repeatable)
        #[arg(long = "status")]
        statuses: Vec<ActivityStatus>,
        /// Omit history and linked needs
        #[arg(long)]
        summary: bool,
    },
    Show {
        uuid: Uuid,
    },
    History {
        uuid: Uuid,
    },
    /// Create a draft from an activity JSON file
    Create {
        file: PathBuf,
    },
    /// Update from a full activity JSON file
    Update {
        file: PathBuf,
    },
    Delete {
        uuid: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum NeedCommands {
    List {
        #[arg(long = "uuid")]
        uuids: Vec<Uuid>,
        #[arg(long)]
        activity: Option<Uuid>,
        #[arg(long)]
        status: Option<NeedStatus>,
        /// Only needs ordered by the acting user
        #[arg(long)]
        mine: bool,
        #[arg(long)]
        area_manager: Option<Uuid>,
        #[arg(long)]
        intersects: Option<Uuid>,
    },
    Create {
        file: PathBuf,
    },
    Update {
        file: PathBuf,
    },
    Delete {
        uuid: Uuid,
        /// Only detach the need from its activity
        #[arg(long)]
        release_only: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConsultationCommands {
    List {
        activity: Uuid,
    },
    Create {
        file: PathBuf,
    },
    Update {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = cmd::load_config(&cli)?;
    roadworks::logging::init(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&cli, &config)?,
        Commands::Config { command } => cmd::cmd_config(&cli, &config, command.clone())?,
        Commands::Transitions => cmd::cmd_transitions(),
        Commands::User { command } => cmd::cmd_user(&config, command.clone()).await?,
        Commands::Address { command } => cmd::cmd_address(&config, command.clone()).await?,
        Commands::Area { command } => cmd::cmd_area(&config, command.clone()).await?,
        Commands::Activity { command } => cmd::cmd_activity(&cli, &config, command.clone()).await?,
        Commands::Need { command } => cmd::cmd_need(&cli, &config, command.clone()).await?,
        Commands::Consultation { command } => {
            cmd::cmd_consultation(&cli, &config, command.clone()).await?
        }
    }

    Ok(())
}
