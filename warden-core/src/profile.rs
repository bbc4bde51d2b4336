//! Profile-scoped directory layout
//!
//! A `Profile` bundles the roots the supervisor works under. It is a
//! plain handle passed into every operation, so multiple profiles (and
//! tests with temp directories) coexist without any process-wide state.

use std::path::{Path, PathBuf};

/// Directory roots for one supervision profile.
#[derive(Debug, Clone)]
pub struct Profile {
    /// Per-app daemon manifests: `<manifest_dir>/<app>.toml`.
    pub manifest_dir: PathBuf,
    /// Runtime records and autostart flags.
    pub state_dir: PathBuf,
    /// Daemon log files.
    pub log_dir: PathBuf,
    /// Supervisor tunables.
    pub config_path: PathBuf,
}

impl Profile {
    /// The default profile under the XDG base directories.
    pub fn from_env() -> Self {
        Self {
            manifest_dir: warden_paths::config_dir().join("apps"),
            state_dir: warden_paths::state_dir().join("daemons"),
            log_dir: warden_paths::data_dir().join("logs"),
            config_path: warden_paths::config_dir().join("config.toml"),
        }
    }

    /// A profile rooted at an arbitrary directory. Used by tests and by
    /// callers that run several isolated profiles side by side.
    pub fn at_root(root: &Path) -> Self {
        Self {
            manifest_dir: root.join("apps"),
            state_dir: root.join("daemons"),
            log_dir: root.join("logs"),
            config_path: root.join("config.toml"),
        }
    }
}
