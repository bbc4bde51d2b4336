//! Process liveness probing
//!
//! A bare PID is not enough: the OS recycles identifiers, so a recorded
//! PID may point at an unrelated process by the time a later invocation
//! looks. Each spawn records the OS-reported process start time (clock
//! ticks since boot, field 22 of `/proc/<pid>/stat`) as a start token,
//! and the probe only reports `Alive` when the token still matches.

use crate::state::DaemonKey;
use tracing::warn;

/// What the prober could establish about a recorded process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The PID exists and its start token matches the recorded one.
    Alive,
    /// The PID is gone, or it now belongs to a different process.
    Dead,
    /// The PID exists but identity could not be corroborated. Callers
    /// treat this as dead, with a logged warning.
    Indeterminate,
}

/// Probe a recorded process.
///
/// `start_token` is the token minted by [`read_start_token`] at spawn
/// time; `None` means the spawn never captured one, which leaves the
/// probe unable to corroborate.
#[cfg(unix)]
pub fn probe(pid: u32, start_token: Option<u64>) -> Liveness {
    if !pid_exists(pid) {
        return Liveness::Dead;
    }
    match (start_token, read_start_token(pid)) {
        (Some(recorded), Some(current)) if recorded == current => Liveness::Alive,
        (Some(_), Some(_)) => Liveness::Dead, // PID recycled
        _ => Liveness::Indeterminate,
    }
}

#[cfg(not(unix))]
pub fn probe(_pid: u32, _start_token: Option<u64>) -> Liveness {
    Liveness::Indeterminate
}

/// `kill(pid, 0)` existence check. `EPERM` means the process exists but
/// belongs to someone else, which still counts as existing.
#[cfg(unix)]
fn pid_exists(pid: u32) -> bool {
    // SAFETY: signal 0 performs error checking only, nothing is sent.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Read the start token for a live process: the `starttime` field of
/// `/proc/<pid>/stat`, in clock ticks since boot.
///
/// Returns `None` where `/proc` is unavailable (non-Linux unix) or the
/// process vanished mid-read.
#[cfg(unix)]
pub fn read_start_token(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The comm field may contain spaces and parens; fields are stable
    // only after the last ')'. starttime is field 22, i.e. index 19
    // after the three fields consumed by pid/comm/state.
    let rparen = stat.rfind(')')?;
    let after = stat.get(rparen + 2..)?;
    after.split_whitespace().nth(19)?.parse().ok()
}

#[cfg(not(unix))]
pub fn read_start_token(_pid: u32) -> Option<u64> {
    None
}

/// Collapse a probe result to a yes/no for callers that favor
/// availability: `Indeterminate` counts as dead, loudly.
pub fn is_alive(key: &DaemonKey, pid: u32, start_token: Option<u64>) -> bool {
    match probe(pid, start_token) {
        Liveness::Alive => true,
        Liveness::Dead => false,
        Liveness::Indeterminate => {
            warn!(
                "Liveness of {} (pid {}) could not be corroborated; treating as dead",
                key, pid
            );
            false
        }
    }
}
