//! Supervisor configuration
//!
//! Every tunable of the supervisor, guard, and log manager, with
//! defaults in code and an optional one-layer TOML overlay at
//! `<config_dir>/config.toml`:
//!
//! ```toml
//! health-grace-secs = 10
//! stop-grace-secs = 10
//! max-restart-attempts = 5
//! restart-window-secs = 60
//! backoff-schedule-secs = [0, 1, 5, 15, 30]
//! stability-secs = 30
//! log-max-size-bytes = 10485760
//! log-keep-segments = 3
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ManifestError;

/// Tunables for the supervisor and its collaborators.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long `start` waits for the process to be observed alive and
    /// pass its first health check.
    pub health_grace_period: Duration,
    /// Poll interval while waiting inside a grace period.
    pub poll_interval: Duration,
    /// How long `stop` waits after SIGTERM before escalating.
    pub stop_grace_period: Duration,
    /// How long `stop` waits after SIGKILL before giving up.
    pub kill_timeout: Duration,
    /// Restart attempts allowed inside the rolling window before the
    /// guard trips.
    pub max_restart_attempts: u32,
    /// Width of the rolling restart window.
    pub restart_window: Duration,
    /// Backoff delays indexed by in-window attempt count, capped at the
    /// last entry.
    pub backoff_schedule: Vec<Duration>,
    /// Continuous running time after which the restart window is
    /// forgiven.
    pub stability_period: Duration,
    /// Live log segment size that triggers rotation.
    pub log_max_size: u64,
    /// Live log segment age that triggers rotation.
    pub log_max_age: Duration,
    /// Rotated segments to keep per daemon.
    pub log_keep_segments: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_grace_period: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            stop_grace_period: Duration::from_secs(10),
            kill_timeout: Duration::from_secs(5),
            max_restart_attempts: 5,
            restart_window: Duration::from_secs(60),
            backoff_schedule: vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(30),
            ],
            stability_period: Duration::from_secs(30),
            log_max_size: 10 * 1024 * 1024,
            log_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            log_keep_segments: 3,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    health_grace_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    stop_grace_secs: Option<u64>,
    kill_timeout_secs: Option<u64>,
    max_restart_attempts: Option<u32>,
    restart_window_secs: Option<u64>,
    backoff_schedule_secs: Option<Vec<u64>>,
    stability_secs: Option<u64>,
    log_max_size_bytes: Option<u64>,
    log_max_age_secs: Option<u64>,
    log_keep_segments: Option<u32>,
}

impl SupervisorConfig {
    /// Load from a TOML file; absent file or absent keys fall back to
    /// defaults.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let raw: RawConfig = toml::from_str(&content)?;
        Ok(Self::finalize(raw))
    }

    fn finalize(raw: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            health_grace_period: raw
                .health_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_grace_period),
            poll_interval: raw
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            stop_grace_period: raw
                .stop_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_grace_period),
            kill_timeout: raw
                .kill_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.kill_timeout),
            max_restart_attempts: raw
                .max_restart_attempts
                .unwrap_or(defaults.max_restart_attempts),
            restart_window: raw
                .restart_window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.restart_window),
            backoff_schedule: raw
                .backoff_schedule_secs
                .map(|s| s.into_iter().map(Duration::from_secs).collect())
                .unwrap_or(defaults.backoff_schedule),
            stability_period: raw
                .stability_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stability_period),
            log_max_size: raw.log_max_size_bytes.unwrap_or(defaults.log_max_size),
            log_max_age: raw
                .log_max_age_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.log_max_age),
            log_keep_segments: raw.log_keep_segments.unwrap_or(defaults.log_keep_segments),
        }
    }
}
