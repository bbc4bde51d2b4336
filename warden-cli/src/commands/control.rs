//! Lifecycle commands: start, stop, restart, status, kill-all,
//! reconcile, clear

use anyhow::Result;
use clap::Args;
use warden_core::Supervisor;

use crate::render;

/// Arguments naming one daemon.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Application the daemon belongs to
    pub app: String,
    /// Daemon id within the application
    pub daemon: String,
}

pub async fn start(supervisor: &Supervisor, args: TargetArgs, json: bool) -> Result<()> {
    let result = supervisor.start(&args.app, &args.daemon).await?;
    render::finish(&result, json)
}

pub async fn stop(supervisor: &Supervisor, args: TargetArgs, json: bool) -> Result<()> {
    let result = supervisor.stop(&args.app, &args.daemon).await?;
    render::finish(&result, json)
}

pub async fn restart(supervisor: &Supervisor, args: TargetArgs, json: bool) -> Result<()> {
    let result = supervisor.restart(&args.app, &args.daemon).await?;
    render::finish(&result, json)
}

pub fn status(supervisor: &Supervisor, args: TargetArgs, json: bool) -> Result<()> {
    let result = supervisor.status(&args.app, &args.daemon)?;
    render::finish(&result, json)
}

pub async fn kill_all(supervisor: &Supervisor, json: bool) -> Result<()> {
    let results = supervisor.kill_all().await?;
    render::finish_all(&results, json, "No running daemons")
}

pub fn reconcile(supervisor: &Supervisor, json: bool) -> Result<()> {
    let results = supervisor.reconcile_all()?;
    render::finish_all(&results, json, "All records match observed state")
}

pub fn clear(supervisor: &Supervisor, args: TargetArgs, json: bool) -> Result<()> {
    let result = supervisor.clear(&args.app, &args.daemon)?;
    render::finish(&result, json)
}
