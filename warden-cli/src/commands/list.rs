//! List every known daemon

use anyhow::Result;
use warden_core::Supervisor;

use crate::render;

pub fn run(supervisor: &Supervisor, json: bool) -> Result<()> {
    let results = supervisor.list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No daemons declared or recorded");
        return Ok(());
    }
    println!("{}", render::daemon_table(&results));
    Ok(())
}
