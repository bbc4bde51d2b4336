//! Crash-loop guard
//!
//! Tracks restart attempts in a rolling wall-clock window and decides
//! whether the next `starting` transition may proceed, must back off, or
//! trips the daemon into the terminal `failed` state. The window lives
//! in the persisted runtime record because invocations are stateless;
//! in-process clocks would forget everything between invocations.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::SupervisorConfig;

/// Decision for one restart attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Start immediately.
    Allow,
    /// Start, but only after this delay.
    Backoff(Duration),
    /// Too many attempts in the window; the daemon goes to `failed`.
    Trip,
}

/// Rolling-window restart guard with a capped backoff schedule.
#[derive(Debug, Clone)]
pub struct RestartGuard {
    max_attempts: u32,
    window: Duration,
    backoff: Vec<Duration>,
    stability_period: Duration,
}

impl RestartGuard {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            max_attempts: config.max_restart_attempts,
            window: config.restart_window,
            backoff: config.backoff_schedule.clone(),
            stability_period: config.stability_period,
        }
    }

    /// Drop attempts that have aged out of the window.
    pub fn prune(&self, attempts: &[DateTime<Utc>], now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        attempts
            .iter()
            .copied()
            .filter(|t| now.signed_duration_since(*t) < window)
            .collect()
    }

    /// Decide whether another attempt may be recorded now, given the
    /// attempts already in the record.
    pub fn decide(&self, attempts: &[DateTime<Utc>], now: DateTime<Utc>) -> GuardDecision {
        let in_window = self.prune(attempts, now).len();
        if in_window >= self.max_attempts as usize {
            return GuardDecision::Trip;
        }
        let delay = self
            .backoff
            .get(in_window)
            .or(self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO);
        if delay.is_zero() {
            GuardDecision::Allow
        } else {
            GuardDecision::Backoff(delay)
        }
    }

    /// True once a daemon has stayed up long enough for its window to be
    /// forgiven.
    pub fn survived_stability_period(
        &self,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        match chrono::Duration::from_std(self.stability_period) {
            Ok(period) => now.signed_duration_since(started_at) >= period,
            Err(_) => false,
        }
    }
}
