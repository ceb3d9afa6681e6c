//! Snapshot repository, snapshot and restore lifecycle
//!
//! ```text
//! ensure_repository ── GET _snapshot/MM-YYYY ── 404 ──▶ PUT _snapshot/MM-YYYY
//!        │
//! create_snapshot ──── PUT _snapshot/MM-YYYY/MM-DD_HHMM
//!        │              sleep(settle)
//!        │              poll GET .../_status every poll_interval until SUCCESS
//!        │              GET .../MM-DD_HHMM  (shard failures, duration)
//!        │
//! restore ──────────── POST .../_restore  (probe index only, renamed)
//!                       poll GET restore_test_<epoch>/_recovery until DONE
//! ```
//!
//! Both waits are bounded by `backup_timeout` from the start of the wait.

use crate::cluster::{ClusterApi, SnapshotInfo, SnapshotStatus};
use crate::config::{BackupConfig, RepositoryParams, Timeouts};
use crate::context::RunContext;
use crate::error::{Result, VerifyError};
use crate::poll::{poll_until, PollPolicy};
use serde_json::{json, Map, Value};
use tracing::info;

/// Snapshot states that mean "keep waiting"
const PENDING_STATES: &[&str] = &["INIT", "STARTED", "IN_PROGRESS", "WAITING"];

/// Recovery stage of a fully restored shard
const RECOVERY_DONE: &str = "DONE";

/// Drives repository creation, snapshot and restore for one run
pub struct SnapshotLifecycleController {
    api: ClusterApi,
    ctx: RunContext,
    cluster_name: String,
    env: String,
    params: RepositoryParams,
    restore_replicas: u32,
    timeouts: Timeouts,
}

impl SnapshotLifecycleController {
    /// Create the controller from the run's configuration
    pub fn new(api: ClusterApi, ctx: RunContext, config: &BackupConfig) -> Self {
        Self {
            api,
            ctx,
            cluster_name: config.cluster_name.clone(),
            env: config.env.clone(),
            params: config.new_repo_params.clone(),
            restore_replicas: config.restore_replicas,
            timeouts: config.timeouts.clone(),
        }
    }

    /// Object storage path of this month's repository
    pub fn base_path(&self) -> String {
        format!(
            "elasticsearch/{}/{}/{}",
            self.cluster_name,
            self.env,
            self.ctx.repository()
        )
    }

    /// Body of the create-repository request
    pub fn repository_definition(&self) -> Value {
        let mut settings = Map::new();
        settings.insert("bucket".to_string(), json!(self.params.bucket));
        settings.insert("base_path".to_string(), json!(self.base_path()));
        settings.insert("server_side_encryption".to_string(), json!(true));
        if let Some(ref region) = self.params.region {
            settings.insert("region".to_string(), json!(region));
        }
        if let Some(ref cap) = self.params.max_snapshot_bytes_per_sec {
            settings.insert("max_snapshot_bytes_per_sec".to_string(), json!(cap));
        }
        if let Some(ref cap) = self.params.max_restore_bytes_per_sec {
            settings.insert("max_restore_bytes_per_sec".to_string(), json!(cap));
        }

        json!({
            "type": self.params.repository_type,
            "settings": settings,
        })
    }

    /// Create this month's repository unless it already exists
    ///
    /// Returns whether a repository was created.
    pub async fn ensure_repository(&self) -> Result<bool> {
        let repository = self.ctx.repository();
        if self.api.repository_exists(repository).await? {
            info!(repository = %repository, "Monthly backup repository exists");
            return Ok(false);
        }

        info!(
            repository = %repository,
            base_path = %self.base_path(),
            "Creating a new monthly backup repository"
        );
        self.api
            .create_repository(repository, self.repository_definition())
            .await?;
        Ok(true)
    }

    /// Take this run's snapshot and wait for it to succeed
    pub async fn create_snapshot(&self) -> Result<SnapshotInfo> {
        let (repository, snapshot) = (self.ctx.repository(), self.ctx.snapshot());
        let path = self.ctx.snapshot_path();

        info!(snapshot = %path, "Starting a new backup");
        self.api.start_snapshot(repository, snapshot).await?;

        // Give the new snapshot time to show up in _status
        tokio::time::sleep(self.timeouts.snapshot_settle()).await;

        let policy = PollPolicy::new(self.timeouts.backup_timeout(), self.timeouts.poll_interval());
        let status = poll_until(&format!("snapshot {}", path), policy, move || {
            self.snapshot_progress()
        })
        .await?;

        let info = self.api.snapshot_info(repository, snapshot).await?;
        if info.state != "SUCCESS"
            || info.shards.failed > 0
            || status.shards_stats.failed > 0
            || !info.failures.is_empty()
        {
            let failed = info.shards.failed.max(status.shards_stats.failed);
            return Err(snapshot_failure(path, &info.state, failed, &info)?);
        }

        info!(
            snapshot = %path,
            duration_ms = info.duration_in_millis,
            shards_total = info.shards.total,
            shards_successful = info.shards.successful,
            "Backup completed"
        );
        Ok(info)
    }

    /// One status check; `None` while the snapshot is still running
    async fn snapshot_progress(&self) -> Result<Option<SnapshotStatus>> {
        let path = self.ctx.snapshot_path();
        let status = self
            .api
            .snapshot_status(self.ctx.repository(), self.ctx.snapshot())
            .await?
            .ok_or_else(|| VerifyError::SnapshotFailed {
                snapshot: path.clone(),
                state: "MISSING".to_string(),
                detail: "Could not find the backup just created".to_string(),
            })?;

        info!(
            snapshot = %path,
            state = %status.state,
            done = status.shards_stats.done,
            total = status.shards_stats.total,
            "Backup state"
        );

        match status.state.as_str() {
            "SUCCESS" => Ok(Some(status)),
            state if PENDING_STATES.contains(&state) => Ok(None),
            state => {
                let info = self
                    .api
                    .snapshot_info(self.ctx.repository(), self.ctx.snapshot())
                    .await?;
                let failed = info.shards.failed.max(status.shards_stats.failed);
                Err(snapshot_failure(path, state, failed, &info)?)
            }
        }
    }

    /// Body of the restore request
    pub fn restore_definition(&self) -> Value {
        json!({
            "indices": self.ctx.probe_index(),
            "rename_pattern": self.ctx.probe_index(),
            "rename_replacement": self.ctx.restore_index(),
            "include_global_state": false,
            "index_settings": {
                "index.number_of_replicas": self.restore_replicas,
            },
        })
    }

    /// Restore only the probe index, renamed, and wait for recovery
    pub async fn restore(&self) -> Result<()> {
        let path = self.ctx.snapshot_path();
        let target = self.ctx.restore_index();

        info!(
            snapshot = %path,
            from = %self.ctx.probe_index(),
            to = %target,
            "Restoring the test index"
        );

        let response = self
            .api
            .start_restore(self.ctx.repository(), self.ctx.snapshot(), self.restore_definition())
            .await?;
        check_restore_response(&path, &response)?;

        let policy = PollPolicy::new(self.timeouts.backup_timeout(), self.timeouts.poll_interval());
        let shards = poll_until(&format!("restore of {}", target), policy, move || {
            self.restore_progress(target)
        })
        .await?;

        info!(index = %target, shards, "Restore completed");
        Ok(())
    }

    /// One recovery check; `None` until every shard reports `DONE`
    ///
    /// A primary whose restore failed drops out of `_recovery` and stays
    /// unassigned, so once the remaining shards are done the shard table is
    /// checked for unassigned primaries.
    async fn restore_progress(&self, index: &str) -> Result<Option<usize>> {
        let Some(stages) = self.api.recovery_stages(index).await? else {
            return Ok(None);
        };
        if stages.is_empty() || !stages.iter().all(|stage| stage == RECOVERY_DONE) {
            return Ok(None);
        }

        let shards = self.api.shard_states(index).await?.unwrap_or_default();
        let unassigned: Vec<&str> = shards
            .iter()
            .filter(|s| s.is_primary() && s.is_unassigned())
            .map(|s| s.shard.as_str())
            .collect();
        if !unassigned.is_empty() {
            return Err(VerifyError::SnapshotFailed {
                snapshot: self.ctx.snapshot_path(),
                state: "RESTORE_FAILED".to_string(),
                detail: format!(
                    "{} of {} primary shards of {} were not restored: {}",
                    unassigned.len(),
                    shards.iter().filter(|s| s.is_primary()).count(),
                    index,
                    unassigned.join(", ")
                ),
            });
        }

        Ok(Some(stages.len()))
    }
}

/// `SnapshotFailed` carrying the per-shard failure records
fn snapshot_failure(
    snapshot: String,
    state: &str,
    failed: u64,
    info: &SnapshotInfo,
) -> Result<VerifyError> {
    Ok(VerifyError::SnapshotFailed {
        snapshot,
        state: state.to_string(),
        detail: format!(
            "{} of {} shards failed\nFailures:\n{}",
            failed,
            info.shards.total,
            serde_json::to_string_pretty(&info.failures)?
        ),
    })
}

/// Reject restore responses that were refused or report shard failures
fn check_restore_response(snapshot: &str, response: &Value) -> Result<()> {
    if response.get("accepted").and_then(Value::as_bool) == Some(false) {
        return Err(VerifyError::SnapshotFailed {
            snapshot: snapshot.to_string(),
            state: "RESTORE_REJECTED".to_string(),
            detail: response.to_string(),
        });
    }

    let failed = response
        .pointer("/snapshot/shards/failed")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if failed > 0 {
        return Err(VerifyError::SnapshotFailed {
            snapshot: snapshot.to_string(),
            state: "RESTORE_FAILED".to_string(),
            detail: response.to_string(),
        });
    }
    Ok(())
}
