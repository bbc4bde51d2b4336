//! Autostart flag management and the start-enabled sweep

use anyhow::Result;
use clap::{Args, Subcommand};
use warden_core::Supervisor;

use crate::render;

#[derive(Args, Debug)]
pub struct AutostartArgs {
    #[command(subcommand)]
    pub command: AutostartCommands,
}

#[derive(Subcommand, Debug)]
pub enum AutostartCommands {
    /// Start this daemon on every start-enabled sweep
    Enable {
        /// Application the daemon belongs to
        app: String,
        /// Daemon id within the application
        daemon: String,
    },
    /// Leave this daemon alone on start-enabled sweeps
    Disable {
        /// Application the daemon belongs to
        app: String,
        /// Daemon id within the application
        daemon: String,
    },
}

pub fn run(supervisor: &Supervisor, args: AutostartArgs, json: bool) -> Result<()> {
    let result = match args.command {
        AutostartCommands::Enable { app, daemon } => supervisor.enable_autostart(&app, &daemon)?,
        AutostartCommands::Disable { app, daemon } => {
            supervisor.disable_autostart(&app, &daemon)?
        }
    };
    render::finish(&result, json)
}

pub async fn start_enabled(supervisor: &Supervisor, json: bool) -> Result<()> {
    let results = supervisor.start_enabled().await?;
    render::finish_all(&results, json, "No autostart-enabled daemons")
}
