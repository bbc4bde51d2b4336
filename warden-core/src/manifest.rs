//! Per-app daemon manifests
//!
//! Each application declares the daemons it wants supervised in a TOML
//! file at `<manifest_root>/<app>.toml`:
//!
//! ```toml
//! [daemons.sync]
//! command = "run-sync --interval 60"
//! health-check = "run-sync --ping"
//! autostart = false
//! restart = "on-failure"
//! ```
//!
//! Manifests are pure input: re-read on every invocation, never cached
//! and never written by warden.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// What to do when a supervised process dies without being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Restart on any death.
    Always,
    /// Restart only when the process exited abnormally.
    OnFailure,
    /// Never restart automatically.
    #[default]
    Never,
}

/// One daemon declared by an application.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonDefinition {
    pub app: String,
    pub id: String,
    /// Whitespace-split argv template; no shell interpretation.
    pub command: String,
    pub health_check: Option<String>,
    /// Manifest default for the autostart flag; the persisted
    /// AutostartConfig takes precedence once set.
    pub autostart: bool,
    pub restart: RestartPolicy,
}

impl DaemonDefinition {
    /// Split the command template into argv. The manifest validator
    /// guarantees at least one element.
    pub fn argv(&self) -> Vec<String> {
        self.command.split_whitespace().map(str::to_string).collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    daemons: BTreeMap<String, RawDaemon>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawDaemon {
    #[serde(default)]
    command: String,
    health_check: Option<String>,
    #[serde(default)]
    autostart: bool,
    #[serde(default)]
    restart: RestartPolicy,
}

/// Reads daemon definitions from per-app manifest files.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    root: PathBuf,
}

impl ManifestSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn manifest_path(&self, app: &str) -> PathBuf {
        self.root.join(format!("{app}.toml"))
    }

    /// All daemons declared by `app`, sorted by id.
    ///
    /// An absent manifest file is an app with zero daemons, not an error.
    pub fn list(&self, app: &str) -> Result<Vec<DaemonDefinition>, ManifestError> {
        let path = self.manifest_path(app);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path)?;
        let raw: RawManifest = toml::from_str(&content)?;

        let mut definitions = Vec::with_capacity(raw.daemons.len());
        for (id, daemon) in raw.daemons {
            if !is_valid_id(&id) {
                return Err(ManifestError::InvalidId {
                    app: app.to_string(),
                    id,
                });
            }
            if daemon.command.trim().is_empty() {
                return Err(ManifestError::MissingCommand {
                    app: app.to_string(),
                    id,
                });
            }
            definitions.push(DaemonDefinition {
                app: app.to_string(),
                id,
                command: daemon.command,
                health_check: daemon.health_check,
                autostart: daemon.autostart,
                restart: daemon.restart,
            });
        }
        Ok(definitions)
    }

    /// Look up a single daemon definition.
    pub fn find(&self, app: &str, id: &str) -> Result<Option<DaemonDefinition>, ManifestError> {
        Ok(self.list(app)?.into_iter().find(|d| d.id == id))
    }

    /// Apps that have a manifest file, sorted.
    pub fn apps(&self) -> Result<Vec<String>, ManifestError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut apps = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("toml")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                apps.push(stem.to_string());
            }
        }
        apps.sort();
        Ok(apps)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Ids name state directories and log files, so restrict them to a
/// filesystem-safe alphabet.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_with(app: &str, content: &str) -> (TempDir, ManifestSource) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(format!("{app}.toml")), content).unwrap();
        let source = ManifestSource::new(dir.path());
        (dir, source)
    }

    #[test]
    fn missing_manifest_is_empty_set() {
        let dir = TempDir::new().unwrap();
        let source = ManifestSource::new(dir.path());
        assert!(source.list("ghost").unwrap().is_empty());
    }

    #[test]
    fn empty_daemons_table_is_empty_set() {
        let (_dir, source) = source_with("notes", "[daemons]\n");
        assert!(source.list("notes").unwrap().is_empty());
    }

    #[test]
    fn parses_full_definition() {
        let (_dir, source) = source_with(
            "notes",
            r#"
[daemons.sync]
command = "run-sync --interval 60"
health-check = "run-sync --ping"
autostart = true
restart = "on-failure"
"#,
        );
        let defs = source.list("notes").unwrap();
        assert_eq!(defs.len(), 1);
        let def = &defs[0];
        assert_eq!(def.id, "sync");
        assert_eq!(def.command, "run-sync --interval 60");
        assert_eq!(def.health_check.as_deref(), Some("run-sync --ping"));
        assert!(def.autostart);
        assert_eq!(def.restart, RestartPolicy::OnFailure);
        assert_eq!(def.argv(), vec!["run-sync", "--interval", "60"]);
    }

    #[test]
    fn defaults_apply_for_optional_fields() {
        let (_dir, source) = source_with(
            "notes",
            "[daemons.sync]\ncommand = \"run-sync\"\n",
        );
        let def = source.find("notes", "sync").unwrap().unwrap();
        assert!(def.health_check.is_none());
        assert!(!def.autostart);
        assert_eq!(def.restart, RestartPolicy::Never);
    }

    #[test]
    fn empty_command_is_rejected() {
        let (_dir, source) = source_with("notes", "[daemons.sync]\ncommand = \"  \"\n");
        let err = source.list("notes").unwrap_err();
        assert!(matches!(err, ManifestError::MissingCommand { .. }));
    }

    #[test]
    fn missing_command_field_is_rejected() {
        let (_dir, source) = source_with("notes", "[daemons.sync]\nautostart = true\n");
        let err = source.list("notes").unwrap_err();
        assert!(matches!(err, ManifestError::MissingCommand { .. }));
    }

    #[test]
    fn path_unsafe_id_is_rejected() {
        let (_dir, source) = source_with(
            "notes",
            "[daemons.\"../evil\"]\ncommand = \"run\"\n",
        );
        let err = source.list("notes").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidId { .. }));
    }

    #[test]
    fn duplicate_daemon_id_is_a_parse_error() {
        // TOML itself rejects a table defined twice.
        let (_dir, source) = source_with(
            "notes",
            "[daemons.sync]\ncommand = \"a\"\n[daemons.sync]\ncommand = \"b\"\n",
        );
        let err = source.list("notes").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let (_dir, source) = source_with(
            "notes",
            "[daemons.sync]\ncommand = \"run\"\nrestrat = \"always\"\n",
        );
        let err = source.list("notes").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn find_returns_none_for_undeclared_daemon() {
        let (_dir, source) = source_with("notes", "[daemons.sync]\ncommand = \"run\"\n");
        assert!(source.find("notes", "other").unwrap().is_none());
    }

    #[test]
    fn apps_enumerates_manifest_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.toml"), "").unwrap();
        std::fs::write(dir.path().join("mail.toml"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        let source = ManifestSource::new(dir.path());
        assert_eq!(source.apps().unwrap(), vec!["mail", "notes"]);
    }
}
