//! Cluster health precondition
//!
//! Writing the probe index while shard allocation is disabled leaves its
//! shards unassigned and the cluster red, so this runs before any mutation.

use crate::cluster::ClusterApi;
use crate::error::{Result, VerifyError};
use tracing::info;

/// Setting that gates shard allocation
pub const ALLOCATION_SETTING: &str = "cluster.routing.allocation.enable";

/// Refuses to proceed unless shard allocation is fully enabled
pub struct ClusterHealthPrecondition {
    api: ClusterApi,
}

impl ClusterHealthPrecondition {
    /// Create the precondition check
    pub fn new(api: ClusterApi) -> Self {
        Self { api }
    }

    /// Fail with `PreconditionFailed` unless allocation is `all` (or unset)
    pub async fn assert_shard_allocation_enabled(&self) -> Result<()> {
        let setting = self.api.cluster_setting(ALLOCATION_SETTING).await?;

        if allocation_enabled(setting.as_deref()) {
            info!(setting = ?setting, "Shard allocation is enabled");
            Ok(())
        } else {
            Err(VerifyError::precondition(format!(
                "shard allocation is disabled ({} = {}); refusing to create test indices",
                ALLOCATION_SETTING,
                setting.unwrap_or_default()
            )))
        }
    }
}

fn allocation_enabled(setting: Option<&str>) -> bool {
    match setting {
        None => true,
        Some(value) => value.eq_ignore_ascii_case("all"),
    }
}
