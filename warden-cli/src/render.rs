//! Output rendering for command results

use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use warden_core::{DaemonStatus, OpResult};

/// Print one result and translate `ok: false` into a nonzero exit.
pub fn finish(result: &OpResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}: {}", result.key, result.message);
    }
    if result.ok {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Print a batch of results; any failed entry makes the exit nonzero.
pub fn finish_all(results: &[OpResult], json: bool, empty_note: &str) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
    } else if results.is_empty() {
        println!("{empty_note}");
    } else {
        for result in results {
            println!("{}: {}", result.key, result.message);
        }
    }
    if results.iter().all(|r| r.ok) {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

pub fn daemon_table(results: &[OpResult]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("App").fg(Color::Cyan),
        Cell::new("Daemon").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Cyan),
        Cell::new("PID").fg(Color::Cyan),
        Cell::new("Uptime").fg(Color::Cyan),
        Cell::new("Restarts").fg(Color::Cyan),
    ]);

    let now = Utc::now();
    for result in results {
        let state = &result.state;
        table.add_row(vec![
            Cell::new(&result.key.app),
            Cell::new(&result.key.daemon),
            status_cell(state.status),
            Cell::new(state.pid.map(|p| p.to_string()).unwrap_or_default()),
            Cell::new(
                state
                    .uptime(now)
                    .map(humanize_duration)
                    .unwrap_or_default(),
            ),
            Cell::new(if state.restart_count() > 0 {
                state.restart_count().to_string()
            } else {
                String::new()
            }),
        ]);
    }
    table
}

fn status_cell(status: DaemonStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        DaemonStatus::Running => cell.fg(Color::Green),
        DaemonStatus::Starting | DaemonStatus::Stopping => cell.fg(Color::Yellow),
        DaemonStatus::Crashed | DaemonStatus::Failed => cell.fg(Color::Red),
        DaemonStatus::Stopped => cell,
    }
}

fn humanize_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
