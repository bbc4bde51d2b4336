use anyhow::Result;
use clap::{Parser, Subcommand};
use warden_core::{Profile, Supervisor};

mod commands;
mod render;

#[derive(Parser)]
#[command(name = "warden", about = "Stateless supervision for app daemons")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit results as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List every known daemon and its current state
    List,
    /// Start a daemon
    Start(commands::control::TargetArgs),
    /// Stop a daemon (SIGTERM, then SIGKILL after the grace period)
    Stop(commands::control::TargetArgs),
    /// Restart a daemon
    Restart(commands::control::TargetArgs),
    /// Show the current state of a daemon
    Status(commands::control::TargetArgs),
    /// Show the tail of a daemon's log
    Logs(commands::logs::LogsArgs),
    /// Stop every running daemon
    KillAll,
    /// Manage the autostart flag of a daemon
    Autostart(commands::autostart::AutostartArgs),
    /// Start every autostart-enabled daemon that is not running
    StartEnabled,
    /// Probe every recorded daemon and correct stale state
    Reconcile,
    /// Remove the stored record of a stopped or crashed daemon
    Clear(commands::control::TargetArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let profile = Profile::from_env();
    tracing::debug!("Using manifests at {:?}", profile.manifest_dir);
    let supervisor = Supervisor::open(&profile)?;
    let json = cli.json;

    match cli.command {
        Commands::List => commands::list::run(&supervisor, json),
        Commands::Start(args) => commands::control::start(&supervisor, args, json).await,
        Commands::Stop(args) => commands::control::stop(&supervisor, args, json).await,
        Commands::Restart(args) => commands::control::restart(&supervisor, args, json).await,
        Commands::Status(args) => commands::control::status(&supervisor, args, json),
        Commands::Logs(args) => commands::logs::run(&supervisor, args),
        Commands::KillAll => commands::control::kill_all(&supervisor, json).await,
        Commands::Autostart(args) => commands::autostart::run(&supervisor, args, json),
        Commands::StartEnabled => commands::autostart::start_enabled(&supervisor, json).await,
        Commands::Reconcile => commands::control::reconcile(&supervisor, json),
        Commands::Clear(args) => commands::control::clear(&supervisor, args, json),
    }
}
