//! Restore verification
//!
//! Compares every probe document in the original index with its copy in the
//! scratch restore index, stopping at the first difference.

use crate::cluster::ClusterApi;
use crate::config::Timeouts;
use crate::context::RunContext;
use crate::error::{Result, VerifyError};
use crate::poll::{poll_until, PollPolicy};
use std::time::Instant;
use tracing::{debug, info};

/// Checks restored probe data field for field
pub struct RestoreVerifier {
    api: ClusterApi,
    ctx: RunContext,
    timeouts: Timeouts,
}

impl RestoreVerifier {
    /// Create a verifier for this run
    pub fn new(api: ClusterApi, ctx: RunContext, timeouts: Timeouts) -> Self {
        Self { api, ctx, timeouts }
    }

    /// Wait until every shard of `index` reports `STARTED`
    pub async fn wait_for_index_online(&self, index: &str) -> Result<()> {
        let policy = PollPolicy::new(
            self.timeouts.index_online_timeout(),
            self.timeouts.index_poll_interval(),
        );

        let shards = poll_until(
            &format!("index {} to come online", index),
            policy,
            move || async move {
                let shards = self.api.shard_states(index).await?.ok_or_else(|| {
                    VerifyError::unexpected(format!("Index {} not found", index))
                })?;

                if !shards.is_empty() && shards.iter().all(|s| s.is_started()) {
                    Ok(Some(shards.len()))
                } else {
                    info!(index = %index, "Waiting for restored index to be available");
                    Ok(None)
                }
            },
        )
        .await?;

        info!(index = %index, shards, "Index is online");
        Ok(())
    }

    /// Compare one probe document between the original and restored index
    pub async fn compare_document(&self, id: u64) -> Result<()> {
        let restore_index = self.ctx.restore_index();
        let policy = PollPolicy::new(
            self.timeouts.document_visibility_timeout(),
            self.timeouts.index_poll_interval(),
        );

        // Restore completion does not guarantee read visibility
        let restored = poll_until(
            &format!("document {} in {}", id, restore_index),
            policy,
            move || async move {
                let value = self.api.get_probe_value(restore_index, id).await?;
                if value.is_none() {
                    debug!(index = %restore_index, id, "Restored document not visible yet");
                }
                Ok(value)
            },
        )
        .await?;

        let original = self
            .api
            .get_probe_value(self.ctx.probe_index(), id)
            .await?
            .ok_or_else(|| {
                VerifyError::unexpected(format!(
                    "document {} missing from {}",
                    id,
                    self.ctx.probe_index()
                ))
            })?;

        if original.as_bytes() == restored.as_bytes() {
            Ok(())
        } else {
            Err(VerifyError::VerificationMismatch {
                id,
                original,
                restored,
            })
        }
    }

    /// Wait for the restored index and compare ids `0..test_size`
    pub async fn verify_all(&self, test_size: u64) -> Result<()> {
        let start = Instant::now();

        info!(
            index = %self.ctx.restore_index(),
            documents = test_size,
            "Verifying the newly-restored test data"
        );
        self.wait_for_index_online(self.ctx.restore_index()).await?;

        for id in 0..test_size {
            self.compare_document(id).await?;
        }

        info!(
            documents = test_size,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Successfully verified the test data"
        );
        Ok(())
    }
}
