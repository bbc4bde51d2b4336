//! Persisted runtime state for supervised daemons
//!
//! One record per `(app, daemon)` pair, owned by the supervisor and
//! mutated only through compare-and-swap writes in the state store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a supervised daemon: which app it belongs to and its id
/// within that app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DaemonKey {
    pub app: String,
    pub daemon: String,
}

impl DaemonKey {
    pub fn new(app: impl Into<String>, daemon: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            daemon: daemon.into(),
        }
    }
}

impl fmt::Display for DaemonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app, self.daemon)
    }
}

/// Lifecycle status of a daemon.
///
/// `Failed` is terminal until a manual start or restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
    Failed,
}

impl DaemonStatus {
    /// True for states that claim an associated live process.
    pub fn claims_process(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed | Self::Failed)
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of the most recent health check command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResult {
    pub passed: bool,
    pub checked_at: DateTime<Utc>,
}

/// Durable runtime record for one daemon.
///
/// `version` is the compare-and-swap fence: every successful write bumps
/// it, and writers must present the version they read. An absent record
/// is version 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonRuntimeState {
    pub status: DaemonStatus,
    /// OS process id while a process is associated.
    pub pid: Option<u32>,
    /// OS-reported process start time (clock ticks since boot), recorded
    /// at spawn. Corroborates the pid against reuse.
    pub start_token: Option<u64>,
    /// Command actually launched, for display.
    pub command: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_seen_alive: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Exit code, when the spawning invocation was able to collect it.
    pub exit_code: Option<i32>,
    /// Restart attempts inside the crash-loop guard's rolling window.
    #[serde(default)]
    pub restart_attempts: Vec<DateTime<Utc>>,
    pub health: Option<HealthResult>,
    #[serde(default)]
    pub version: u64,
}

impl DaemonRuntimeState {
    /// A fresh record for a daemon that has never been started.
    pub fn stopped() -> Self {
        Self {
            status: DaemonStatus::Stopped,
            pid: None,
            start_token: None,
            command: None,
            started_at: None,
            last_seen_alive: None,
            ended_at: None,
            exit_code: None,
            restart_attempts: Vec::new(),
            health: None,
            version: 0,
        }
    }

    /// Consecutive restart attempts currently in the guard window.
    pub fn restart_count(&self) -> usize {
        self.restart_attempts.len()
    }

    /// Move into a terminal state, clearing the process association.
    pub fn into_terminal(mut self, status: DaemonStatus, now: DateTime<Utc>) -> Self {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.pid = None;
        self.start_token = None;
        self.ended_at = Some(now);
        self
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if self.status != DaemonStatus::Running {
            return None;
        }
        self.started_at.map(|t| now - t)
    }
}
