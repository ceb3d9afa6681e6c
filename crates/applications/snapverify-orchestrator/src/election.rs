//! Master election guard
//!
//! The job is scheduled on every node; only the elected master runs it.

use crate::cluster::ClusterApi;
use crate::error::Result;
use tracing::debug;

/// Decides whether this node should run the verification
pub struct MasterElectionGuard {
    api: ClusterApi,
    node_name: String,
}

impl MasterElectionGuard {
    /// Create a guard for this node
    pub fn new(api: ClusterApi, node_name: impl Into<String>) -> Self {
        Self {
            api,
            node_name: node_name.into(),
        }
    }

    /// Whether this node is the currently elected master
    pub async fn is_master(&self) -> Result<bool> {
        let master = self.api.master_node().await?;
        debug!(master = %master, node = %self.node_name, "Resolved elected master");
        Ok(master == self.node_name)
    }
}
