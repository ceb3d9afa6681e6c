//! # Snapshot backup verifier
//!
//! Proves that a search cluster's off-site snapshot backups can actually be
//! restored, by writing probe documents, snapshotting the cluster, restoring
//! just the probe index under a new name and comparing every document.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator
//! ├── MasterElectionGuard           only the elected master proceeds
//! ├── ClusterHealthPrecondition     shard allocation must be enabled
//! ├── ProbeDataManager              stale cleanup, probe writes, cleanup
//! ├── SnapshotLifecycleController   monthly repo, snapshot, restore
//! ├── RestoreVerifier               index online, field-for-field compare
//! └── RetentionPruner               drop MM-YYYY repos past retention
//!          │
//!      ClusterApi ── RetryingCaller ── ClusterGateway (HTTP)
//! ```
//!
//! Failures surface once, at [`Orchestrator::run`], which pages on-call in
//! production and reports to error tracking.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod context;
pub mod election;
pub mod error;
pub mod gateway;
pub mod health;
pub mod notify;
pub mod orchestrator;
pub mod poll;
pub mod probe;
pub mod retention;
pub mod retry;
pub mod snapshot;
pub mod verify;

// Error handling
pub use error::{Result, Severity, TransportError, VerifyError};

// Configuration and naming
pub use config::{BackupConfig, ClusterConnection, RepositoryParams, Timeouts, DEFAULT_CONFIG_PATH};
pub use context::RunContext;

// Transport
pub use cluster::ClusterApi;
pub use gateway::{ApiRequest, ApiResponse, ClusterGateway, HttpClusterGateway};
pub use retry::{RetryingCaller, MAX_ATTEMPTS};

// Pipeline components
pub use election::MasterElectionGuard;
pub use health::ClusterHealthPrecondition;
pub use probe::ProbeDataManager;
pub use retention::RetentionPruner;
pub use snapshot::SnapshotLifecycleController;
pub use verify::RestoreVerifier;

// Orchestration and notification
pub use notify::{Alert, ErrorReport, FailureNotifier, HttpNotifier};
pub use orchestrator::{Orchestrator, RunMode, RunOutcome, RunReport, INTERRUPT_CLEANUP_TIMEOUT};
