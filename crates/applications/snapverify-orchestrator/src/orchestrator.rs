//! Verification pipeline
//!
//! ```text
//! is_master? ── no ──▶ NotMaster (exit 0, nothing else touched)
//!     │
//! shard allocation enabled? ── no ──▶ PreconditionFailed
//!     │
//! cleanup_stale ─▶ create probes ─▶ ensure_repository ─▶ create_snapshot
//!     ─▶ restore ─▶ verify_all ─▶ cleanup (always) ─▶ prune
//! ```
//!
//! Any failure short-circuits the rest. [`Orchestrator::run`] is the single
//! place where failures are logged and notified, once per run.

use crate::cluster::ClusterApi;
use crate::config::BackupConfig;
use crate::context::RunContext;
use crate::election::MasterElectionGuard;
use crate::error::{Result, Severity, VerifyError};
use crate::gateway::ClusterGateway;
use crate::health::ClusterHealthPrecondition;
use crate::notify::{ErrorReport, FailureNotifier};
use crate::probe::ProbeDataManager;
use crate::retention::RetentionPruner;
use crate::retry::RetryingCaller;
use crate::snapshot::SnapshotLifecycleController;
use crate::verify::RestoreVerifier;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Upper bound on cleanup after an interrupt
pub const INTERRUPT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Which pipeline a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Probe, snapshot, restore, verify, prune
    Verify,
    /// Master check and retention only
    RetentionOnly,
}

/// Summary of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Probe documents verified
    pub documents: u64,
    /// Whether this run created the monthly repository
    pub repository_created: bool,
    /// Indices from earlier runs that were removed
    pub stale_removed: Vec<String>,
    /// Repositories removed by retention
    pub pruned: Vec<String>,
}

/// Non-failing outcomes of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The backup was restored and matched
    Verified(RunReport),
    /// Retention-only run finished
    Pruned(Vec<String>),
    /// Another node is master; nothing was done
    NotMaster,
    /// The operator stopped the run; test indices were cleaned up
    Interrupted,
}

impl RunOutcome {
    /// Process exit status for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Interrupted => 130,
            _ => 0,
        }
    }
}

/// Runs the verification pipeline for one invocation
pub struct Orchestrator {
    config: BackupConfig,
    ctx: RunContext,
    api: ClusterApi,
    notifier: Arc<dyn FailureNotifier>,
}

impl Orchestrator {
    /// Wire the pipeline to a gateway and notifier
    pub fn new(
        config: BackupConfig,
        ctx: RunContext,
        gateway: Arc<dyn ClusterGateway>,
        notifier: Arc<dyn FailureNotifier>,
    ) -> Self {
        Self {
            config,
            ctx,
            api: ClusterApi::new(RetryingCaller::new(gateway)),
            notifier,
        }
    }

    /// This run's names
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Full verification, notifying on failure
    pub async fn run(&self) -> Result<RunOutcome> {
        let result = self.execute().await;
        self.finish(result).await
    }

    /// Master check and retention only, notifying on failure
    pub async fn run_retention(&self) -> Result<RunOutcome> {
        let result = self.execute_retention().await;
        self.finish(result).await
    }

    /// Run `mode` until it finishes or `shutdown` resolves
    ///
    /// On shutdown the pipeline is dropped at its next suspension point and
    /// this run's indices are removed, bounded by [`INTERRUPT_CLEANUP_TIMEOUT`].
    /// Interrupts are not notified.
    pub async fn run_until<F>(&self, mode: RunMode, shutdown: F) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = async {
                match mode {
                    RunMode::Verify => self.run().await,
                    RunMode::RetentionOnly => self.run_retention().await,
                }
            } => Some(result),
            _ = shutdown => None,
        };

        match result {
            Some(result) => result,
            None => Ok(tokio::time::timeout(
                INTERRUPT_CLEANUP_TIMEOUT,
                self.cleanup_after_interrupt(),
            )
            .await
            .unwrap_or_else(|_| {
                warn!("Cleanup after interrupt timed out");
                RunOutcome::Interrupted
            })),
        }
    }

    /// Full verification without the notification boundary
    pub async fn execute(&self) -> Result<RunOutcome> {
        let start = Instant::now();

        if !self.is_master().await? {
            return Ok(RunOutcome::NotMaster);
        }

        ClusterHealthPrecondition::new(self.api.clone())
            .assert_shard_allocation_enabled()
            .await?;

        let probe = ProbeDataManager::new(self.api.clone(), self.ctx.clone());
        let stale_removed = probe.cleanup_stale().await?;

        let verification = self.verify_backup(&probe).await;
        probe.cleanup().await;
        let repository_created = verification?;

        let pruned = self.pruner().prune(self.ctx.started_at()).await?;

        info!(
            documents = self.config.test_size,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Finished"
        );

        Ok(RunOutcome::Verified(RunReport {
            documents: self.config.test_size,
            repository_created,
            stale_removed,
            pruned,
        }))
    }

    /// Master check and retention without the notification boundary
    pub async fn execute_retention(&self) -> Result<RunOutcome> {
        if !self.is_master().await? {
            return Ok(RunOutcome::NotMaster);
        }
        let pruned = self.pruner().prune(self.ctx.started_at()).await?;
        Ok(RunOutcome::Pruned(pruned))
    }

    /// Remove this run's indices after the pipeline was abandoned
    pub async fn cleanup_after_interrupt(&self) -> RunOutcome {
        warn!(
            probe_index = %self.ctx.probe_index(),
            restore_index = %self.ctx.restore_index(),
            "Interrupted, cleaning up test indices"
        );
        ProbeDataManager::new(self.api.clone(), self.ctx.clone())
            .cleanup()
            .await;
        RunOutcome::Interrupted
    }

    /// Probe creation through restore verification; returns whether the
    /// monthly repository was created
    async fn verify_backup(&self, probe: &ProbeDataManager) -> Result<bool> {
        probe.create(self.config.test_size).await?;

        let snapshots =
            SnapshotLifecycleController::new(self.api.clone(), self.ctx.clone(), &self.config);
        let repository_created = snapshots.ensure_repository().await?;
        snapshots.create_snapshot().await?;
        snapshots.restore().await?;

        RestoreVerifier::new(
            self.api.clone(),
            self.ctx.clone(),
            self.config.timeouts.clone(),
        )
        .verify_all(self.config.test_size)
        .await?;

        Ok(repository_created)
    }

    async fn is_master(&self) -> Result<bool> {
        let guard = MasterElectionGuard::new(self.api.clone(), self.config.node_name.clone());
        let is_master = guard.is_master().await?;
        if !is_master {
            info!("This node is not the currently elected master, aborting backup");
        }
        Ok(is_master)
    }

    fn pruner(&self) -> RetentionPruner {
        RetentionPruner::new(self.api.clone(), self.config.retention_months)
    }

    async fn finish(&self, result: Result<RunOutcome>) -> Result<RunOutcome> {
        if let Err(ref err) = result {
            self.escalate(err).await;
        }
        result
    }

    /// Log and notify a failure; notification problems never replace it
    async fn escalate(&self, err: &VerifyError) {
        let severity = err.severity();
        match severity {
            Severity::Critical => error!(error = %err, "Restored backup data does not match"),
            Severity::Fatal => error!(error = %err, "Backup verification failed"),
        }

        let report = ErrorReport::from_error(
            err,
            &self.config.node_name,
            &self.config.cluster_name,
            &self.config.env,
        );

        if self.config.is_production() {
            if let Err(e) = self.notifier.trigger(&report.alert(severity)).await {
                warn!(error = %e, "Failed to page on-call");
            }
        }

        if let Err(e) = self.notifier.report(&report).await {
            warn!(error = %e, "Failed to report error");
        }
    }
}
