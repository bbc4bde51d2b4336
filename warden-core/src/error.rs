//! Error types for warden-core

use thiserror::Error;

use crate::state::DaemonKey;

/// Top-level error type for warden-core
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Supervision error: {0}")]
    Supervise(#[from] SuperviseError),
}

/// Errors from parsing per-app daemon manifests.
///
/// Always fatal to that daemon (or app) only; sweeps over other daemons
/// continue.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid manifest TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Daemon '{id}' in app '{app}' has an empty command")]
    MissingCommand { app: String, id: String },

    #[error("Invalid daemon id '{id}' in app '{app}' (allowed: letters, digits, '-', '_')")]
    InvalidId { app: String, id: String },
}

/// Errors from the durable state store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("State I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Another invocation wrote the record since it was read. Callers
    /// reconcile and retry once before surfacing this.
    #[error("State for {key} was modified concurrently")]
    Conflict { key: DaemonKey },
}

/// Errors from supervisor operations
#[derive(Error, Debug)]
pub enum SuperviseError {
    #[error("Daemon {key} is not declared in any manifest")]
    UnknownDaemon { key: DaemonKey },

    #[error("Could not start {key}: {reason}")]
    Launch { key: DaemonKey, reason: String },

    #[error("Daemon {key} did not pass its health check within {grace_secs}s")]
    HealthCheckTimeout { key: DaemonKey, grace_secs: u64 },

    #[error("Daemon {key} is already being started by another invocation")]
    AlreadyStarting { key: DaemonKey },

    /// A concurrent invocation won the compare-and-swap twice in a row.
    #[error("Concurrent modification of {key}; retry the operation")]
    ConcurrentModification { key: DaemonKey },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DaemonKey {
        DaemonKey::new("notes", "sync")
    }

    #[test]
    fn manifest_error_missing_command_displays_app_and_id() {
        let error = ManifestError::MissingCommand {
            app: "notes".to_string(),
            id: "sync".to_string(),
        };
        assert!(error.to_string().contains("notes"));
        assert!(error.to_string().contains("sync"));
        assert!(error.to_string().contains("empty command"));
    }

    #[test]
    fn store_conflict_displays_key() {
        let error = StoreError::Conflict { key: key() };
        assert!(error.to_string().contains("notes:sync"));
        assert!(error.to_string().contains("concurrently"));
    }

    #[test]
    fn launch_error_carries_human_reason() {
        let error = SuperviseError::Launch {
            key: key(),
            reason: "command exited immediately with code 127".to_string(),
        };
        assert!(error.to_string().contains("Could not start notes:sync"));
        assert!(error.to_string().contains("code 127"));
    }

    #[test]
    fn warden_error_converts_from_store_error() {
        let store_error = StoreError::Conflict { key: key() };
        let error: WardenError = store_error.into();
        assert!(matches!(error, WardenError::Store(_)));
    }

    #[test]
    fn supervise_error_converts_from_manifest_error() {
        let manifest_error = ManifestError::InvalidId {
            app: "notes".to_string(),
            id: "../etc".to_string(),
        };
        let error: SuperviseError = manifest_error.into();
        assert!(matches!(error, SuperviseError::Manifest(_)));
    }
}
