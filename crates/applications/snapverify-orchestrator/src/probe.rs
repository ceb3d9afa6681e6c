//! Probe data lifecycle
//!
//! A run writes `test_size` documents `{test_value: <random>}` with ids
//! `0..test_size` into its own `backup_test_<epoch>` index. Indices left
//! behind by crashed runs are removed before the new one is written, and the
//! run's own indices are removed once verification has an outcome.

use crate::cluster::ClusterApi;
use crate::context::{RunContext, PROBE_INDEX_PREFIX, RESTORE_INDEX_PREFIX};
use crate::error::Result;
use rand::Rng;
use std::time::Instant;
use tracing::{info, warn};

/// Base58 alphabet (no `0`, `O`, `I`, `l`)
const BASE58: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Length of a probe value
pub const PROBE_VALUE_LEN: usize = 34;

/// Generate an address-like random token
pub fn probe_value<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut value = String::with_capacity(PROBE_VALUE_LEN);
    value.push('1');
    for _ in 1..PROBE_VALUE_LEN {
        value.push(BASE58[rng.gen_range(0..BASE58.len())] as char);
    }
    value
}

/// Creates and removes the synthetic probe dataset
pub struct ProbeDataManager {
    api: ClusterApi,
    ctx: RunContext,
}

impl ProbeDataManager {
    /// Create a manager for this run
    pub fn new(api: ClusterApi, ctx: RunContext) -> Self {
        Self { api, ctx }
    }

    /// Delete probe and scratch indices left by earlier runs
    ///
    /// Returns the names of the deleted indices.
    pub async fn cleanup_stale(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        for prefix in [PROBE_INDEX_PREFIX, RESTORE_INDEX_PREFIX] {
            for index in self.api.list_indices(&format!("{}*", prefix)).await? {
                info!(index = %index, "Deleting stale test index");
                if self.api.delete_index(&index).await? {
                    removed.push(index);
                }
            }
        }

        Ok(removed)
    }

    /// Write `test_size` probe documents into this run's probe index
    pub async fn create(&self, test_size: u64) -> Result<()> {
        let start = Instant::now();
        let index = self.ctx.probe_index();

        info!(index = %index, documents = test_size, "Generating test data");

        // The index must exist for the restore even when no documents are written
        self.api.create_index(index).await?;

        for id in 0..test_size {
            let value = probe_value(&mut rand::thread_rng());
            self.api.put_probe_document(index, id, &value).await?;
        }

        info!(
            index = %index,
            documents = test_size,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Test data written"
        );
        Ok(())
    }

    /// Remove this run's probe and scratch restore indices
    ///
    /// Best effort: failures are logged and swallowed so they never replace
    /// the verification outcome.
    pub async fn cleanup(&self) {
        for index in [self.ctx.probe_index(), self.ctx.restore_index()] {
            match self.api.delete_index(index).await {
                Ok(true) => info!(index = %index, "Deleted test index"),
                Ok(false) => {}
                Err(e) => warn!(index = %index, error = %e, "Failed to delete test index"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_probe_value_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let value = probe_value(&mut rng);

        assert_eq!(value.len(), PROBE_VALUE_LEN);
        assert!(value.starts_with('1'));
        assert!(value.bytes().all(|b| BASE58.contains(&b)));
    }

    #[test]
    fn test_probe_values_differ() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: std::collections::HashSet<_> =
            (0..1000).map(|_| probe_value(&mut rng)).collect();

        assert_eq!(values.len(), 1000);
    }
}
