//! Show the tail of a daemon's log

use anyhow::Result;
use clap::Args;
use warden_core::Supervisor;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Application the daemon belongs to
    pub app: String,
    /// Daemon id within the application
    pub daemon: String,
    /// Number of trailing lines to show
    #[arg(long, default_value_t = 50)]
    pub lines: usize,
}

pub fn run(supervisor: &Supervisor, args: LogsArgs) -> Result<()> {
    let lines = supervisor.logs(&args.app, &args.daemon, args.lines)?;
    if lines.is_empty() {
        println!("No log output for {}:{}", args.app, args.daemon);
        return Ok(());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
