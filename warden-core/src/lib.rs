//! warden-core: Stateless daemon supervision library
//!
//! This crate provides the building blocks of warden's supervision model:
//!
//! - **Manifests** - [`ManifestSource`] reads per-app daemon declarations
//! - **State store** - [`StateStore`] persists runtime records with
//!   per-key compare-and-swap
//! - **Liveness probing** - [`probe`] corroborates recorded PIDs against
//!   reuse with per-spawn start tokens
//! - **Crash-loop guard** - [`RestartGuard`] bounds automatic restarts
//!   with a rolling window and backoff schedule
//! - **Logs** - [`LogManager`] captures daemon output with bounded
//!   rotation
//! - **Supervisor** - [`Supervisor`] ties it together into the control
//!   operations
//!
//! There is no resident supervisor process. Every control operation runs
//! inside a short-lived invocation that reconstructs the truth from the
//! state store, corrects drift against observed liveness, performs its
//! transition, and exits; supervised daemons run detached in their own
//! sessions and outlive the invocation that spawned them.
//!
//! # Quick Start
//!
//! ```no_run
//! use warden_core::{Profile, Supervisor};
//!
//! # async fn example() -> Result<(), warden_core::WardenError> {
//! let supervisor = Supervisor::open(&Profile::from_env())?;
//! let result = supervisor.start("notes", "sync").await?;
//! println!("{}: {}", result.key, result.message);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod guard;
pub mod logs;
pub mod manifest;
pub mod probe;
pub mod profile;
pub mod state;
pub mod store;
pub mod supervisor;

// Re-export key types for convenience
pub use config::SupervisorConfig;
pub use error::{ManifestError, StoreError, SuperviseError, WardenError};
pub use guard::{GuardDecision, RestartGuard};
pub use logs::LogManager;
pub use manifest::{DaemonDefinition, ManifestSource, RestartPolicy};
pub use probe::Liveness;
pub use profile::Profile;
pub use state::{DaemonKey, DaemonRuntimeState, DaemonStatus, HealthResult};
pub use store::StateStore;
pub use supervisor::{OpResult, Supervisor};
