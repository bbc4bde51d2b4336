//! Process supervisor: the control surface over daemon lifecycles
//!
//! There is no resident supervisor process. Every operation here runs
//! inside a short-lived control invocation that reconstructs truth from
//! the state store, corrects drift via the liveness prober, performs the
//! requested transition through compare-and-swap writes, and exits. The
//! supervised daemons themselves run detached (own session via
//! `setsid`), so they outlive whichever invocation spawned them.
//!
//! Concurrency: the store's per-key compare-and-swap is the only
//! serialization point. A lost swap is retried once after re-reading;
//! losing twice is reported as a concurrent modification, never
//! silently overwritten.

use std::process::Stdio;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::{StoreError, SuperviseError, WardenError};
use crate::guard::{GuardDecision, RestartGuard};
use crate::logs::LogManager;
use crate::manifest::{DaemonDefinition, ManifestSource, RestartPolicy};
use crate::probe;
use crate::profile::Profile;
use crate::state::{DaemonKey, DaemonRuntimeState, DaemonStatus, HealthResult};
use crate::store::StateStore;

/// Structured result of one control operation on one daemon.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpResult {
    pub ok: bool,
    pub key: DaemonKey,
    pub state: DaemonRuntimeState,
    pub message: String,
}

impl OpResult {
    fn ok(key: DaemonKey, state: DaemonRuntimeState, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            key,
            state,
            message: message.into(),
        }
    }

    fn failed(key: DaemonKey, state: DaemonRuntimeState, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            key,
            state,
            message: message.into(),
        }
    }
}

/// The supervisor handle. Cheap to construct; holds no process-wide
/// state, so one per profile is the norm.
pub struct Supervisor {
    manifests: ManifestSource,
    store: StateStore,
    logs: LogManager,
    guard: RestartGuard,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(profile: &Profile, config: SupervisorConfig) -> Self {
        Self {
            manifests: ManifestSource::new(&profile.manifest_dir),
            store: StateStore::new(&profile.state_dir),
            logs: LogManager::new(&profile.log_dir, &config),
            guard: RestartGuard::from_config(&config),
            config,
        }
    }

    /// Construct with the config file of the profile applied over
    /// defaults.
    pub fn open(profile: &Profile) -> Result<Self, WardenError> {
        let config = SupervisorConfig::load(&profile.config_path).map_err(WardenError::from)?;
        Ok(Self::new(profile, config))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn manifests(&self) -> &ManifestSource {
        &self.manifests
    }

    // ---- queries ----------------------------------------------------

    /// Current state of one daemon, with drift reconciled. Never spawns
    /// and never blocks beyond the store write.
    pub fn status(&self, app: &str, id: &str) -> Result<OpResult, WardenError> {
        let key = DaemonKey::new(app, id);
        let state = self.reconciled(&key)?;
        let message = match state.status {
            DaemonStatus::Running => match state.pid {
                Some(pid) => format!("running (pid {pid})"),
                None => "running".to_string(),
            },
            DaemonStatus::Failed => "failed: crash loop tripped; restart manually".to_string(),
            other => other.to_string(),
        };
        Ok(OpResult::ok(key, state, message))
    }

    /// Every known daemon: the union of manifest declarations and stored
    /// records, each reconciled. A malformed manifest skips that app's
    /// declarations with a warning; it never aborts the listing.
    pub fn list(&self) -> Result<Vec<OpResult>, WardenError> {
        let mut keys: Vec<DaemonKey> = self
            .store
            .list_all()?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        match self.manifests.apps() {
            Ok(apps) => {
                for app in apps {
                    match self.manifests.list(&app) {
                        Ok(defs) => {
                            keys.extend(defs.into_iter().map(|d| DaemonKey::new(d.app, d.id)));
                        }
                        Err(e) => warn!("Skipping manifest for app '{}': {}", app, e),
                    }
                }
            }
            Err(e) => warn!("Could not enumerate app manifests: {}", e),
        }

        keys.sort();
        keys.dedup();

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.status(&key.app, &key.daemon)?);
        }
        Ok(results)
    }

    /// Tail of the daemon's log file.
    pub fn logs(&self, app: &str, id: &str, lines: usize) -> Result<Vec<String>, WardenError> {
        let key = DaemonKey::new(app, id);
        self.logs
            .tail(&key, lines)
            .map_err(|e| WardenError::Store(StoreError::Io(e)))
    }

    // ---- mutations --------------------------------------------------

    /// Start a daemon. Idempotent on an already-running daemon; a manual
    /// start from `failed` is allowed and counts toward the guard window
    /// without tripping on it.
    pub async fn start(&self, app: &str, id: &str) -> Result<OpResult, WardenError> {
        let key = DaemonKey::new(app, id);
        let Some(def) = self.manifests.find(app, id)? else {
            let state = self.reconciled(&key)?;
            let message = SuperviseError::UnknownDaemon { key: key.clone() }.to_string();
            return Ok(OpResult::failed(key, state, message));
        };

        let state = self.reconciled(&key)?;
        match state.status {
            DaemonStatus::Running => {
                let pid = state.pid.unwrap_or(0);
                return Ok(OpResult::ok(
                    key,
                    state,
                    format!("already running (pid {pid})"),
                ));
            }
            DaemonStatus::Starting => {
                let message = SuperviseError::AlreadyStarting { key: key.clone() }.to_string();
                return Ok(OpResult::failed(key, state, message));
            }
            DaemonStatus::Stopping => {
                return Ok(OpResult::failed(
                    key,
                    state,
                    "stop in progress; try again once it finishes",
                ));
            }
            DaemonStatus::Stopped | DaemonStatus::Crashed | DaemonStatus::Failed => {}
        }

        // Manual starts bypass a tripped guard but still pay backoff and
        // still count toward the window.
        let now = Utc::now();
        let attempts = self.guard.prune(&state.restart_attempts, now);
        if let GuardDecision::Backoff(delay) = self.guard.decide(&attempts, now) {
            debug!("Backing off {:?} before starting {}", delay, key);
            tokio::time::sleep(delay).await;
        }

        self.launch(&key, &def, state).await
    }

    /// Stop a daemon: SIGTERM the process group, wait out the grace
    /// period, escalate to SIGKILL. Stopping a non-running daemon
    /// succeeds as a no-op.
    pub async fn stop(&self, app: &str, id: &str) -> Result<OpResult, WardenError> {
        let key = DaemonKey::new(app, id);
        let state = self.reconciled(&key)?;

        let Some(pid) = state.pid.filter(|_| state.status.claims_process()) else {
            return Ok(OpResult::ok(key, state, "not running"));
        };

        let mut stopping = state.clone();
        stopping.status = DaemonStatus::Stopping;
        let stopping = match self.swap_with_retry(&key, state.version, stopping)? {
            Ok(written) => written,
            Err(_) => return Err(SuperviseError::ConcurrentModification { key }.into()),
        };

        let (dead, forced) = self.terminate(&key, pid, stopping.start_token).await;
        if !dead {
            return Ok(OpResult::failed(
                key,
                stopping,
                format!("process {pid} survived SIGKILL; giving up"),
            ));
        }

        let mut next = stopping.clone().into_terminal(DaemonStatus::Stopped, Utc::now());
        // A clean stop forgives the restart window.
        next.restart_attempts.clear();
        // This invocation killed the process, so it owns the outcome; a
        // concurrent reconcile bumping the version in between is adopted
        // over, not deferred to.
        let state = self.adopt_on_conflict(&key, stopping.version, next)?;

        info!("Stopped daemon {}", key);
        let message = if forced {
            "stopped (forced after grace period)"
        } else {
            "stopped"
        };
        Ok(OpResult::ok(key, state, message))
    }

    /// Stop-then-start as one compare-and-swap cycle: the record moves
    /// straight from its current state to `starting`, so no concurrent
    /// reader ever observes an intermediate `stopped`.
    pub async fn restart(&self, app: &str, id: &str) -> Result<OpResult, WardenError> {
        let key = DaemonKey::new(app, id);
        let Some(def) = self.manifests.find(app, id)? else {
            let state = self.reconciled(&key)?;
            let message = SuperviseError::UnknownDaemon { key: key.clone() }.to_string();
            return Ok(OpResult::failed(key, state, message));
        };

        let state = self.reconciled(&key)?;
        if state.status == DaemonStatus::Starting {
            let message = SuperviseError::AlreadyStarting { key: key.clone() }.to_string();
            return Ok(OpResult::failed(key, state, message));
        }

        if let Some(pid) = state.pid.filter(|_| state.status.claims_process()) {
            let (dead, _) = self.terminate(&key, pid, state.start_token).await;
            if !dead {
                return Ok(OpResult::failed(
                    key,
                    state,
                    format!("process {pid} survived SIGKILL; giving up"),
                ));
            }
        }

        self.launch(&key, &def, state).await
    }

    /// Stop every daemon recorded as holding a process. Per-daemon
    /// results; one failure never aborts the sweep.
    pub async fn kill_all(&self) -> Result<Vec<OpResult>, WardenError> {
        let mut results = Vec::new();
        for (key, state) in self.store.list_all()? {
            if !state.status.claims_process() {
                continue;
            }
            match self.stop(&key.app, &key.daemon).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("kill-all: could not stop {}: {}", key, e);
                    results.push(OpResult::failed(key, state, e.to_string()));
                }
            }
        }
        Ok(results)
    }

    pub fn enable_autostart(&self, app: &str, id: &str) -> Result<OpResult, WardenError> {
        self.set_autostart(app, id, true)
    }

    pub fn disable_autostart(&self, app: &str, id: &str) -> Result<OpResult, WardenError> {
        self.set_autostart(app, id, false)
    }

    fn set_autostart(&self, app: &str, id: &str, enabled: bool) -> Result<OpResult, WardenError> {
        let key = DaemonKey::new(app, id);
        self.store.write_autostart(&key, enabled)?;
        let state = self.reconciled(&key)?;
        let message = if enabled {
            "autostart enabled"
        } else {
            "autostart disabled"
        };
        Ok(OpResult::ok(key, state, message))
    }

    /// Start every autostart-enabled daemon that is not already running.
    /// Automatic restarts of crashed daemons honor the restart policy
    /// and the crash-loop guard; backoff is honored by deferring to the
    /// next sweep rather than sleeping through it. Idempotent.
    pub async fn start_enabled(&self) -> Result<Vec<OpResult>, WardenError> {
        let mut results = Vec::new();
        for key in self.autostart_keys()? {
            let result = self.start_one_enabled(&key).await;
            match result {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("start-enabled: {} failed: {}", key, e);
                    let state = self.store.read(&key).unwrap_or_else(DaemonRuntimeState::stopped);
                    results.push(OpResult::failed(key, state, e.to_string()));
                }
            }
        }
        Ok(results)
    }

    async fn start_one_enabled(&self, key: &DaemonKey) -> Result<OpResult, WardenError> {
        let Some(def) = self.manifests.find(&key.app, &key.daemon)? else {
            let state = self.reconciled(key)?;
            return Ok(OpResult::failed(
                key.clone(),
                state,
                "autostart enabled but no longer declared in any manifest",
            ));
        };

        let state = self.reconciled(key)?;
        match state.status {
            DaemonStatus::Running => {
                return Ok(OpResult::ok(key.clone(), state, "already running"));
            }
            DaemonStatus::Starting | DaemonStatus::Stopping => {
                let message = format!("{} in another invocation; skipped", state.status);
                return Ok(OpResult::failed(key.clone(), state, message));
            }
            DaemonStatus::Failed => {
                return Ok(OpResult::failed(
                    key.clone(),
                    state,
                    "failed: crash loop tripped; restart manually",
                ));
            }
            DaemonStatus::Crashed => {
                let permitted = match def.restart {
                    RestartPolicy::Always => true,
                    // An uncollected exit code means an abnormal death.
                    RestartPolicy::OnFailure => state.exit_code != Some(0),
                    RestartPolicy::Never => false,
                };
                if !permitted {
                    return Ok(OpResult::failed(
                        key.clone(),
                        state,
                        "crashed; restart policy forbids automatic restart",
                    ));
                }
            }
            DaemonStatus::Stopped => {}
        }

        let now = Utc::now();
        let attempts = self.guard.prune(&state.restart_attempts, now);
        match self.guard.decide(&attempts, now) {
            GuardDecision::Allow => self.launch(key, &def, state).await,
            GuardDecision::Backoff(delay) => Ok(OpResult::failed(
                key.clone(),
                state,
                format!("backing off; next automatic start in {}s", delay.as_secs().max(1)),
            )),
            GuardDecision::Trip => {
                let next = state.clone().into_terminal(DaemonStatus::Failed, now);
                let state = match self.swap_with_retry(key, state.version, next)? {
                    Ok(written) => written,
                    Err(current) => current,
                };
                warn!("Daemon {} tripped the crash-loop guard", key);
                Ok(OpResult::failed(
                    key.clone(),
                    state,
                    "crash loop: too many restarts; manual restart required",
                ))
            }
        }
    }

    /// Probe every stored record and correct drift. Returns a result per
    /// record whose state moved.
    pub fn reconcile_all(&self) -> Result<Vec<OpResult>, WardenError> {
        let mut drifted = Vec::new();
        for (key, before) in self.store.list_all()? {
            let after = self.reconcile(&key, before.clone())?;
            if after.status != before.status {
                drifted.push(OpResult::ok(
                    key,
                    after.clone(),
                    format!("reconciled {} -> {}", before.status, after.status),
                ));
            }
        }
        Ok(drifted)
    }

    /// Remove a terminal record. The record of a live daemon is refused;
    /// autostart flags are left alone.
    pub fn clear(&self, app: &str, id: &str) -> Result<OpResult, WardenError> {
        let key = DaemonKey::new(app, id);
        let state = self.reconciled(&key)?;
        if state.status.claims_process() {
            return Ok(OpResult::failed(
                key,
                state,
                "daemon holds a process; stop it first",
            ));
        }
        self.store.clear(&key)?;
        Ok(OpResult::ok(key, DaemonRuntimeState::stopped(), "cleared"))
    }

    // ---- internals --------------------------------------------------

    /// The autostart set: keys with the flag explicitly enabled, plus
    /// manifest declarations defaulting to autostart that were never
    /// explicitly configured.
    fn autostart_keys(&self) -> Result<Vec<DaemonKey>, WardenError> {
        let mut keys = self.store.autostart_enabled_keys()?;
        match self.manifests.apps() {
            Ok(apps) => {
                for app in apps {
                    match self.manifests.list(&app) {
                        Ok(defs) => {
                            for def in defs {
                                let key = DaemonKey::new(def.app.clone(), def.id.clone());
                                if def.autostart && self.store.read_autostart_opt(&key).is_none() {
                                    keys.push(key);
                                }
                            }
                        }
                        Err(e) => warn!("Skipping manifest for app '{}': {}", app, e),
                    }
                }
            }
            Err(e) => warn!("Could not enumerate app manifests: {}", e),
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn reconciled(&self, key: &DaemonKey) -> Result<DaemonRuntimeState, WardenError> {
        let state = self
            .store
            .read(key)
            .unwrap_or_else(DaemonRuntimeState::stopped);
        self.reconcile(key, state).map_err(WardenError::from)
    }

    /// Compare persisted state against observed liveness and correct
    /// drift: a record claiming a process whose pid is gone (or whose
    /// start token no longer matches) moves to `crashed`. A live process
    /// refreshes `last_seen_alive`, and a daemon that has stayed up past
    /// the stability period has its restart window forgiven.
    fn reconcile(
        &self,
        key: &DaemonKey,
        state: DaemonRuntimeState,
    ) -> Result<DaemonRuntimeState, StoreError> {
        if !state.status.claims_process() {
            return Ok(state);
        }
        let Some(pid) = state.pid else {
            // A `starting` record without a pid belongs to an invocation
            // that is mid-spawn right now. Leave it alone.
            return Ok(state);
        };

        let now = Utc::now();
        let next = if probe::is_alive(key, pid, state.start_token) {
            let mut next = state.clone();
            next.last_seen_alive = Some(now);
            if next.status == DaemonStatus::Running
                && !next.restart_attempts.is_empty()
                && let Some(started) = next.started_at
                && self.guard.survived_stability_period(started, now)
            {
                debug!("Daemon {} stable; forgiving restart window", key);
                next.restart_attempts.clear();
            }
            next
        } else {
            warn!(
                "Daemon {} recorded {} but pid {} is gone; reconciling to crashed",
                key, state.status, pid
            );
            let mut next = state.clone();
            next.exit_code = None; // unknowable for an externally-died process
            next.into_terminal(DaemonStatus::Crashed, now)
        };

        // Drift correction losing a swap just means another invocation
        // got there first; adopt whatever it wrote.
        match self.store.compare_and_swap(key, state.version, next) {
            Ok(written) => Ok(written),
            Err(StoreError::Conflict { .. }) => Ok(self.store.read(key).unwrap_or(state)),
            Err(e) => Err(e),
        }
    }

    /// The `starting -> running | crashed | stopped` leg shared by
    /// start, restart, and the autostart sweep. `state` is the
    /// reconciled record the caller read; its version fences the swap.
    async fn launch(
        &self,
        key: &DaemonKey,
        def: &DaemonDefinition,
        state: DaemonRuntimeState,
    ) -> Result<OpResult, WardenError> {
        let now = Utc::now();
        let mut attempts = self.guard.prune(&state.restart_attempts, now);
        attempts.push(now);

        let mut starting = state.clone();
        starting.status = DaemonStatus::Starting;
        starting.pid = None;
        starting.start_token = None;
        starting.command = Some(def.command.clone());
        starting.started_at = Some(now);
        starting.ended_at = None;
        starting.exit_code = None;
        starting.health = None;
        starting.restart_attempts = attempts;

        let starting = match self.swap_with_retry(key, state.version, starting)? {
            Ok(written) => written,
            Err(current) if current.status == DaemonStatus::Starting => {
                let message = SuperviseError::AlreadyStarting { key: key.clone() }.to_string();
                return Ok(OpResult::failed(key.clone(), current, message));
            }
            Err(current) if current.status == DaemonStatus::Running => {
                return Ok(OpResult::ok(key.clone(), current, "already running"));
            }
            Err(_) => {
                return Err(SuperviseError::ConcurrentModification { key: key.clone() }.into());
            }
        };

        let mut child = match self.spawn(key, def) {
            Ok(child) => child,
            Err(e) => {
                // Nothing was spawned; the daemon is left stopped.
                let next = starting
                    .clone()
                    .into_terminal(DaemonStatus::Stopped, Utc::now());
                let state = self.adopt_on_conflict(key, starting.version, next)?;
                let message = SuperviseError::Launch {
                    key: key.clone(),
                    reason: e.to_string(),
                }
                .to_string();
                return Ok(OpResult::failed(key.clone(), state, message));
            }
        };

        let pid = child.id();
        let token = probe::read_start_token(pid);
        if token.is_none() {
            warn!(
                "No start token for {} (pid {}); later liveness probes will be uncorroborated",
                key, pid
            );
        }

        let mut running = starting.clone();
        running.pid = Some(pid);
        running.start_token = token;

        info!("Spawned daemon {} (pid {})", key, pid);

        match self.await_ready(key, def, &mut child).await {
            Ready::Up(health) => {
                running.status = DaemonStatus::Running;
                running.last_seen_alive = Some(Utc::now());
                running.health = health;
                let state = self.adopt_on_conflict(key, starting.version, running)?;
                Ok(OpResult::ok(key.clone(), state, format!("started (pid {pid})")))
            }
            Ready::Exited(code) => {
                let mut next = running.into_terminal(DaemonStatus::Crashed, Utc::now());
                next.exit_code = code;
                let state = self.adopt_on_conflict(key, starting.version, next)?;
                let reason = match code {
                    Some(code) => format!("command exited immediately with code {code}"),
                    None => "command was killed before becoming ready".to_string(),
                };
                let message = SuperviseError::Launch {
                    key: key.clone(),
                    reason,
                }
                .to_string();
                Ok(OpResult::failed(key.clone(), state, message))
            }
            Ready::HealthTimeout => {
                // The process is up but never became healthy; take it
                // back down before recording the crash.
                signal_group(pid, Signal::Kill);
                let _ = child.wait();
                let next = running.into_terminal(DaemonStatus::Crashed, Utc::now());
                let state = self.adopt_on_conflict(key, starting.version, next)?;
                let message = SuperviseError::HealthCheckTimeout {
                    key: key.clone(),
                    grace_secs: self.config.health_grace_period.as_secs(),
                }
                .to_string();
                Ok(OpResult::failed(key.clone(), state, message))
            }
        }
    }

    /// Spawn the daemon command detached: new session, stdin null,
    /// output into the log manager. A log-file failure degrades to null
    /// redirection; it never blocks the daemon.
    fn spawn(
        &self,
        key: &DaemonKey,
        def: &DaemonDefinition,
    ) -> std::io::Result<std::process::Child> {
        let argv = def.argv();
        let mut cmd = std::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]).stdin(Stdio::null());

        match self.logs.open_for_write(key) {
            Ok(log) => {
                let log_err = log.try_clone();
                cmd.stdout(Stdio::from(log));
                match log_err {
                    Ok(f) => cmd.stderr(Stdio::from(f)),
                    Err(_) => cmd.stderr(Stdio::null()),
                };
            }
            Err(e) => {
                warn!("Could not open log file for {}: {}; discarding output", key, e);
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        // Detach into a new session so the daemon survives this control
        // invocation, and so the whole process group can be signaled.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: runs after fork, before exec; setsid is
            // async-signal-safe.
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        cmd.spawn()
    }

    /// Wait for the spawned process to be observed alive and, when a
    /// health check is configured, for the first check to pass, bounded
    /// by the health grace period.
    async fn await_ready(
        &self,
        key: &DaemonKey,
        def: &DaemonDefinition,
        child: &mut std::process::Child,
    ) -> Ready {
        let deadline = Instant::now() + self.config.health_grace_period;
        // One poll interval of settling time catches commands that exit
        // straight away (bad binary, bad flags) before they are recorded
        // as running.
        tokio::time::sleep(self.config.poll_interval).await;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ready::Exited(status.code()),
                Ok(None) => {}
                Err(e) => {
                    warn!("try_wait for {} failed: {}", key, e);
                }
            }

            match &def.health_check {
                None => return Ready::Up(None),
                Some(check) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ready::HealthTimeout;
                    }
                    match self.run_health_check(key, check, remaining).await {
                        Some(true) => {
                            return Ready::Up(Some(HealthResult {
                                passed: true,
                                checked_at: Utc::now(),
                            }));
                        }
                        Some(false) | None => {}
                    }
                }
            }

            if Instant::now() >= deadline {
                return Ready::HealthTimeout;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Run one health check command; `Some(true)` on exit 0, `None` when
    /// the command could not run or overran the remaining grace time.
    async fn run_health_check(
        &self,
        key: &DaemonKey,
        check: &str,
        remaining: std::time::Duration,
    ) -> Option<bool> {
        let argv: Vec<&str> = check.split_whitespace().collect();
        let program = argv.first()?;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match tokio::time::timeout(remaining, async { cmd.status().await }).await {
            Ok(Ok(status)) => Some(status.success()),
            Ok(Err(e)) => {
                warn!("Health check for {} could not run: {}", key, e);
                None
            }
            Err(_) => None,
        }
    }

    /// SIGTERM the process group, poll through the grace period,
    /// escalate to SIGKILL. Returns `(process is gone, kill was forced)`.
    async fn terminate(&self, key: &DaemonKey, pid: u32, token: Option<u64>) -> (bool, bool) {
        info!("Stopping daemon {} (pid {})", key, pid);
        signal_group(pid, Signal::Term);
        if self.wait_dead(key, pid, token, self.config.stop_grace_period).await {
            return (true, false);
        }

        warn!(
            "Daemon {} (pid {}) ignored SIGTERM for {}s; sending SIGKILL",
            key,
            pid,
            self.config.stop_grace_period.as_secs()
        );
        signal_group(pid, Signal::Kill);
        let dead = self.wait_dead(key, pid, token, self.config.kill_timeout).await;
        (dead, true)
    }

    async fn wait_dead(
        &self,
        key: &DaemonKey,
        pid: u32,
        token: Option<u64>,
        timeout: std::time::Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !probe::is_alive(key, pid, token) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// CAS with one retry after re-reading. `Ok(Ok(state))` on a
    /// successful write; `Ok(Err(current))` when a concurrent writer won
    /// twice (or moved the record somewhere the retry should not tread).
    fn swap_with_retry(
        &self,
        key: &DaemonKey,
        version: u64,
        next: DaemonRuntimeState,
    ) -> Result<Result<DaemonRuntimeState, DaemonRuntimeState>, StoreError> {
        match self.store.compare_and_swap(key, version, next.clone()) {
            Ok(written) => Ok(Ok(written)),
            Err(StoreError::Conflict { .. }) => {
                let current = self
                    .store
                    .read(key)
                    .unwrap_or_else(DaemonRuntimeState::stopped);
                // Retry only when the other writer left the daemon
                // without a process claim; anything else is a decision
                // this invocation must not overwrite.
                if current.status.claims_process() {
                    return Ok(Err(current));
                }
                match self.store.compare_and_swap(key, current.version, next) {
                    Ok(written) => Ok(Ok(written)),
                    Err(StoreError::Conflict { .. }) => Ok(Err(self
                        .store
                        .read(key)
                        .unwrap_or_else(DaemonRuntimeState::stopped))),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// CAS for records this invocation owns (it spawned or killed the
    /// process): a conflict means another invocation reconciled in
    /// between; adopt the merged truth by writing over its version once.
    fn adopt_on_conflict(
        &self,
        key: &DaemonKey,
        version: u64,
        next: DaemonRuntimeState,
    ) -> Result<DaemonRuntimeState, StoreError> {
        match self.store.compare_and_swap(key, version, next.clone()) {
            Ok(written) => Ok(written),
            Err(StoreError::Conflict { .. }) => {
                let current_version = self.store.read(key).map(|s| s.version).unwrap_or(0);
                self.store.compare_and_swap(key, current_version, next)
            }
            Err(e) => Err(e),
        }
    }
}

enum Ready {
    Up(Option<HealthResult>),
    Exited(Option<i32>),
    HealthTimeout,
}

enum Signal {
    Term,
    Kill,
}

/// Signal the daemon's whole process group (it is a session leader), or
/// the process alone when group signaling is unavailable.
#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: plain kill(2) calls on a pid we recorded.
    unsafe {
        if libc::kill(-(pid as libc::pid_t), sig) != 0 {
            libc::kill(pid as libc::pid_t, sig);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;
    use tempfile::TempDir;

    fn supervisor(dir: &TempDir) -> Supervisor {
        let profile = Profile::at_root(dir.path());
        Supervisor::new(&profile, SupervisorConfig::default())
    }

    fn write_manifest(dir: &TempDir, app: &str, content: &str) {
        let apps = dir.path().join("apps");
        std::fs::create_dir_all(&apps).unwrap();
        std::fs::write(apps.join(format!("{app}.toml")), content).unwrap();
    }

    #[tokio::test]
    async fn start_of_undeclared_daemon_fails_with_message() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let result = sup.start("ghost", "sync").await.unwrap();
        assert!(!result.ok);
        assert!(result.message.contains("not declared"));
        assert_eq!(result.state.status, DaemonStatus::Stopped);
    }

    #[tokio::test]
    async fn status_of_unknown_daemon_is_stopped() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let result = sup.status("ghost", "sync").unwrap();
        assert!(result.ok);
        assert_eq!(result.state.status, DaemonStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_of_never_started_daemon_is_ok_noop() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let result = sup.stop("notes", "sync").await.unwrap();
        assert!(result.ok);
        assert_eq!(result.message, "not running");
    }

    #[tokio::test]
    async fn list_includes_manifest_daemons_without_records() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        write_manifest(
            &dir,
            "notes",
            "[daemons.sync]\ncommand = \"run-sync\"\n[daemons.index]\ncommand = \"run-index\"\n",
        );

        let results = sup.list().unwrap();
        let keys: Vec<String> = results.iter().map(|r| r.key.to_string()).collect();
        assert_eq!(keys, vec!["notes:index", "notes:sync"]);
        assert!(results.iter().all(|r| r.state.status == DaemonStatus::Stopped));
    }

    #[tokio::test]
    async fn stale_running_record_reconciles_to_crashed() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let key = DaemonKey::new("notes", "sync");

        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Running;
        state.pid = Some(4_194_000); // vanishingly unlikely to exist
        state.start_token = Some(1);
        sup.store.compare_and_swap(&key, 0, state).unwrap();

        let result = sup.status("notes", "sync").unwrap();
        assert_eq!(result.state.status, DaemonStatus::Crashed);
        assert!(result.state.pid.is_none());
        assert!(result.state.ended_at.is_some());
    }

    #[tokio::test]
    async fn reconcile_preserves_record_never_deletes() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let key = DaemonKey::new("notes", "sync");

        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Running;
        state.pid = Some(4_194_000);
        state.start_token = Some(1);
        sup.store.compare_and_swap(&key, 0, state).unwrap();

        sup.status("notes", "sync").unwrap();
        assert!(sup.store.read(&key).is_some());
    }

    #[tokio::test]
    async fn autostart_flag_round_trips_through_supervisor() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let result = sup.enable_autostart("notes", "sync").unwrap();
        assert!(result.ok);
        assert!(sup.store.read_autostart(&DaemonKey::new("notes", "sync")));

        let result = sup.disable_autostart("notes", "sync").unwrap();
        assert!(result.ok);
        assert!(!sup.store.read_autostart(&DaemonKey::new("notes", "sync")));
    }

    #[tokio::test]
    async fn manifest_autostart_default_applies_until_configured() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        write_manifest(
            &dir,
            "notes",
            "[daemons.sync]\ncommand = \"run-sync\"\nautostart = true\n",
        );

        let key = DaemonKey::new("notes", "sync");
        assert_eq!(sup.autostart_keys().unwrap(), vec![key.clone()]);

        // An explicit disable overrides the manifest default.
        sup.disable_autostart("notes", "sync").unwrap();
        assert!(sup.autostart_keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_enabled_trips_guard_into_failed() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        write_manifest(
            &dir,
            "notes",
            "[daemons.sync]\ncommand = \"run-sync\"\nrestart = \"always\"\n",
        );
        sup.enable_autostart("notes", "sync").unwrap();

        // A crashed record with the window already exhausted.
        let key = DaemonKey::new("notes", "sync");
        let now = Utc::now();
        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Crashed;
        state.restart_attempts = (0..5i64).map(|i| now - chrono::TimeDelta::seconds(i)).collect();
        sup.store.compare_and_swap(&key, 0, state).unwrap();

        let results = sup.start_enabled().await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].ok);
        assert_eq!(results[0].state.status, DaemonStatus::Failed);
        assert!(results[0].message.contains("crash loop"));

        // Terminal until manual intervention: the next sweep does not
        // try again.
        let results = sup.start_enabled().await.unwrap();
        assert!(!results[0].ok);
        assert_eq!(results[0].state.status, DaemonStatus::Failed);
    }

    #[tokio::test]
    async fn start_enabled_defers_during_backoff() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        write_manifest(
            &dir,
            "notes",
            "[daemons.sync]\ncommand = \"run-sync\"\nrestart = \"always\"\n",
        );
        sup.enable_autostart("notes", "sync").unwrap();

        let key = DaemonKey::new("notes", "sync");
        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Crashed;
        state.restart_attempts = vec![Utc::now()];
        sup.store.compare_and_swap(&key, 0, state).unwrap();

        let results = sup.start_enabled().await.unwrap();
        assert!(!results[0].ok);
        assert!(results[0].message.contains("backing off"));
        // Still crashed, not failed: the window is not exhausted.
        assert_eq!(results[0].state.status, DaemonStatus::Crashed);
    }

    #[tokio::test]
    async fn start_enabled_respects_never_policy() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        write_manifest(&dir, "notes", "[daemons.sync]\ncommand = \"run-sync\"\n");
        sup.enable_autostart("notes", "sync").unwrap();

        let key = DaemonKey::new("notes", "sync");
        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Crashed;
        sup.store.compare_and_swap(&key, 0, state).unwrap();

        let results = sup.start_enabled().await.unwrap();
        assert!(!results[0].ok);
        assert!(results[0].message.contains("policy forbids"));
    }

    #[tokio::test]
    async fn on_failure_policy_skips_clean_exits() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        write_manifest(
            &dir,
            "notes",
            "[daemons.sync]\ncommand = \"run-sync\"\nrestart = \"on-failure\"\n",
        );
        sup.enable_autostart("notes", "sync").unwrap();

        let key = DaemonKey::new("notes", "sync");
        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Crashed;
        state.exit_code = Some(0);
        sup.store.compare_and_swap(&key, 0, state).unwrap();

        let results = sup.start_enabled().await.unwrap();
        assert!(!results[0].ok);
        assert!(results[0].message.contains("policy forbids"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_loses_to_an_in_flight_start() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        write_manifest(&dir, "notes", "[daemons.sync]\ncommand = \"run-sync\"\n");

        // Another invocation mid-start: a starting record holding a
        // live, corroborated process (this test's own).
        let key = DaemonKey::new("notes", "sync");
        let pid = std::process::id();
        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Starting;
        state.pid = Some(pid);
        state.start_token = probe::read_start_token(pid);
        sup.store.compare_and_swap(&key, 0, state).unwrap();

        let result = sup.start("notes", "sync").await.unwrap();
        assert!(!result.ok);
        assert!(result.message.contains("already being started"));
        // The loser spawned nothing; the in-flight record is untouched.
        assert_eq!(result.state.status, DaemonStatus::Starting);
        assert_eq!(result.state.pid, Some(pid));
        assert!(result.state.restart_attempts.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clear_refuses_records_claiming_a_process() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let key = DaemonKey::new("notes", "sync");

        let pid = std::process::id();
        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Running;
        state.pid = Some(pid);
        state.start_token = probe::read_start_token(pid);
        sup.store.compare_and_swap(&key, 0, state).unwrap();

        let result = sup.clear("notes", "sync").unwrap();
        assert!(!result.ok);
        assert!(sup.store.read(&key).is_some());
    }

    #[tokio::test]
    async fn clear_removes_terminal_records() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let key = DaemonKey::new("notes", "sync");
        sup.store
            .compare_and_swap(&key, 0, DaemonRuntimeState::stopped())
            .unwrap();

        let result = sup.clear("notes", "sync").unwrap();
        assert!(result.ok);
        assert!(sup.store.read(&key).is_none());
    }

    #[tokio::test]
    async fn reconcile_all_reports_only_drifted_records() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);

        let stale = DaemonKey::new("notes", "sync");
        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Running;
        state.pid = Some(4_194_000);
        state.start_token = Some(1);
        sup.store.compare_and_swap(&stale, 0, state).unwrap();

        let clean = DaemonKey::new("notes", "idle");
        sup.store
            .compare_and_swap(&clean, 0, DaemonRuntimeState::stopped())
            .unwrap();

        let drifted = sup.reconcile_all().unwrap();
        assert_eq!(drifted.len(), 1);
        assert_eq!(drifted[0].key, stale);
        assert_eq!(drifted[0].state.status, DaemonStatus::Crashed);
    }
}
