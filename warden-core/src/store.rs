//! Durable state store with per-key compare-and-swap
//!
//! Every control invocation is short-lived, so this store is the only
//! serialization point between concurrent invocations. Layout, one
//! directory per daemon:
//!
//! ```text
//! <state_root>/<app>/<daemon>/state.json
//! <state_root>/<app>/<daemon>/autostart.json
//! <state_root>/<app>/<daemon>/.lock
//! ```
//!
//! Writes go through `compare_and_swap`: an advisory lock on `.lock`
//! guards a re-read of the record's `version` field, and the new record
//! lands via temp-file + atomic rename + fsync so it survives the
//! invoking program terminating immediately after the call returns.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::state::{DaemonKey, DaemonRuntimeState};

#[derive(Debug, Default, Serialize, Deserialize)]
struct AutostartConfig {
    #[serde(default)]
    enabled: bool,
}

/// Filesystem-backed store for daemon runtime records and autostart
/// flags.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_dir(&self, key: &DaemonKey) -> PathBuf {
        self.root.join(&key.app).join(&key.daemon)
    }

    fn state_path(&self, key: &DaemonKey) -> PathBuf {
        self.key_dir(key).join("state.json")
    }

    fn autostart_path(&self, key: &DaemonKey) -> PathBuf {
        self.key_dir(key).join("autostart.json")
    }

    /// Read the current record, or `None` if the daemon has never been
    /// started. A corrupt record reads as absent with a warning; it is
    /// never deleted here.
    pub fn read(&self, key: &DaemonKey) -> Option<DaemonRuntimeState> {
        let path = self.state_path(key);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Unreadable state record for {} at {:?}: {}", key, path, e);
                None
            }
        }
    }

    /// Write `next` on the condition that the stored record still has
    /// `expected_version` (0 for an absent record). Returns the stored
    /// record with its bumped version on success.
    pub fn compare_and_swap(
        &self,
        key: &DaemonKey,
        expected_version: u64,
        next: DaemonRuntimeState,
    ) -> Result<DaemonRuntimeState, StoreError> {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(".lock"))?;
        lock_file.lock_exclusive()?;

        let result = self.swap_locked(key, &dir, expected_version, next);

        // Errors on unlock are moot: dropping the handle releases the
        // lock at close.
        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    fn swap_locked(
        &self,
        key: &DaemonKey,
        dir: &Path,
        expected_version: u64,
        mut next: DaemonRuntimeState,
    ) -> Result<DaemonRuntimeState, StoreError> {
        let current_version = self.read(key).map(|s| s.version).unwrap_or(0);
        if current_version != expected_version {
            return Err(StoreError::Conflict { key: key.clone() });
        }

        next.version = expected_version + 1;
        write_atomic(dir, &self.state_path(key), &serde_json::to_vec_pretty(&next)?)?;
        Ok(next)
    }

    /// Every stored record, sorted by key.
    pub fn list_all(&self) -> Result<Vec<(DaemonKey, DaemonRuntimeState)>, StoreError> {
        let mut entries = Vec::new();
        for key in self.walk_keys()? {
            if let Some(state) = self.read(&key) {
                entries.push((key, state));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    pub fn read_autostart(&self, key: &DaemonKey) -> bool {
        self.read_autostart_opt(key).unwrap_or(false)
    }

    /// Distinguishes "never configured" (`None`) from an explicit flag,
    /// so manifest defaults can apply only until the user decides.
    pub fn read_autostart_opt(&self, key: &DaemonKey) -> Option<bool> {
        let content = fs::read_to_string(self.autostart_path(key)).ok()?;
        serde_json::from_str::<AutostartConfig>(&content)
            .map(|c| c.enabled)
            .ok()
    }

    pub fn write_autostart(&self, key: &DaemonKey, enabled: bool) -> Result<(), StoreError> {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir)?;
        let config = AutostartConfig { enabled };
        write_atomic(
            &dir,
            &self.autostart_path(key),
            &serde_json::to_vec_pretty(&config)?,
        )?;
        Ok(())
    }

    /// Keys with autostart enabled, sorted.
    pub fn autostart_enabled_keys(&self) -> Result<Vec<DaemonKey>, StoreError> {
        let mut keys: Vec<DaemonKey> = self
            .walk_keys()?
            .into_iter()
            .filter(|key| self.read_autostart(key))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Explicitly remove a record. The autostart flag survives; it has
    /// an independent lifecycle.
    pub fn clear(&self, key: &DaemonKey) -> Result<(), StoreError> {
        let path = self.state_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn walk_keys(&self) -> Result<Vec<DaemonKey>, StoreError> {
        let mut keys = Vec::new();
        if !self.root.exists() {
            return Ok(keys);
        }
        for app_entry in fs::read_dir(&self.root)? {
            let app_entry = app_entry?;
            if !app_entry.file_type()?.is_dir() {
                continue;
            }
            let app = app_entry.file_name().to_string_lossy().into_owned();
            for daemon_entry in fs::read_dir(app_entry.path())? {
                let daemon_entry = daemon_entry?;
                if daemon_entry.file_type()?.is_dir() {
                    let daemon = daemon_entry.file_name().to_string_lossy().into_owned();
                    keys.push(DaemonKey::new(app.clone(), daemon));
                }
            }
        }
        Ok(keys)
    }
}

/// Write via a temp file in the same directory, rename over the target,
/// and fsync both the file and the directory.
fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    // Persist the rename itself.
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DaemonStatus;
    use tempfile::TempDir;

    fn store() -> (TempDir, StateStore) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        (dir, store)
    }

    fn key() -> DaemonKey {
        DaemonKey::new("notes", "sync")
    }

    #[test]
    fn read_absent_record_returns_none() {
        let (_dir, store) = store();
        assert!(store.read(&key()).is_none());
    }

    #[test]
    fn cas_from_absent_creates_version_one() {
        let (_dir, store) = store();
        let written = store
            .compare_and_swap(&key(), 0, DaemonRuntimeState::stopped())
            .unwrap();
        assert_eq!(written.version, 1);
        assert_eq!(store.read(&key()).unwrap().version, 1);
    }

    #[test]
    fn cas_with_stale_version_conflicts() {
        let (_dir, store) = store();
        store
            .compare_and_swap(&key(), 0, DaemonRuntimeState::stopped())
            .unwrap();

        // Two writers both read version 1; the second write loses.
        let snapshot = store.read(&key()).unwrap();
        let mut winner = snapshot.clone();
        winner.status = DaemonStatus::Starting;
        store
            .compare_and_swap(&key(), snapshot.version, winner)
            .unwrap();

        let mut loser = snapshot.clone();
        loser.status = DaemonStatus::Stopping;
        let err = store
            .compare_and_swap(&key(), snapshot.version, loser)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // The winner's write is intact.
        assert_eq!(store.read(&key()).unwrap().status, DaemonStatus::Starting);
    }

    #[test]
    fn cas_against_absent_record_requires_version_zero() {
        let (_dir, store) = store();
        let err = store
            .compare_and_swap(&key(), 3, DaemonRuntimeState::stopped())
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn corrupt_record_reads_as_absent_but_is_not_deleted() {
        let (_dir, store) = store();
        let path = store.state_path(&key());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        assert!(store.read(&key()).is_none());
        assert!(path.exists());
    }

    #[test]
    fn list_all_is_sorted_by_key() {
        let (_dir, store) = store();
        store
            .compare_and_swap(&DaemonKey::new("b", "z"), 0, DaemonRuntimeState::stopped())
            .unwrap();
        store
            .compare_and_swap(&DaemonKey::new("a", "y"), 0, DaemonRuntimeState::stopped())
            .unwrap();
        store
            .compare_and_swap(&DaemonKey::new("a", "x"), 0, DaemonRuntimeState::stopped())
            .unwrap();

        let keys: Vec<String> = store
            .list_all()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["a:x", "a:y", "b:z"]);
    }

    #[test]
    fn autostart_defaults_to_disabled() {
        let (_dir, store) = store();
        assert!(!store.read_autostart(&key()));
    }

    #[test]
    fn autostart_round_trip_and_enumeration() {
        let (_dir, store) = store();
        store.write_autostart(&key(), true).unwrap();
        assert!(store.read_autostart(&key()));
        assert_eq!(store.autostart_enabled_keys().unwrap(), vec![key()]);

        store.write_autostart(&key(), false).unwrap();
        assert!(!store.read_autostart(&key()));
        assert!(store.autostart_enabled_keys().unwrap().is_empty());
    }

    #[test]
    fn autostart_survives_clearing_the_runtime_record() {
        let (_dir, store) = store();
        store.write_autostart(&key(), true).unwrap();
        store
            .compare_and_swap(&key(), 0, DaemonRuntimeState::stopped())
            .unwrap();

        store.clear(&key()).unwrap();
        assert!(store.read(&key()).is_none());
        assert!(store.read_autostart(&key()));
    }

    #[test]
    fn state_survives_reopening_the_store() {
        let (dir, store) = store();
        let mut state = DaemonRuntimeState::stopped();
        state.status = DaemonStatus::Running;
        state.pid = Some(1234);
        store.compare_and_swap(&key(), 0, state).unwrap();

        let reopened = StateStore::new(dir.path());
        let read = reopened.read(&key()).unwrap();
        assert_eq!(read.status, DaemonStatus::Running);
        assert_eq!(read.pid, Some(1234));
    }
}
