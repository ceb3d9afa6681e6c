//! Per-run naming
//!
//! Every name a run touches is derived once from the run's start time:
//!
//! | Name              | Format                | Example (2024-03-15T12:00Z) |
//! |-------------------|-----------------------|-----------------------------|
//! | probe index       | `backup_test_<epoch>` | `backup_test_1710504000`    |
//! | restore index     | `restore_test_<epoch>`| `restore_test_1710504000`   |
//! | repository        | `MM-YYYY`             | `03-2024`                   |
//! | snapshot          | `MM-DD_HHMM`          | `03-15_1200`                |

use chrono::{DateTime, Utc};

/// Prefix shared by every probe index, current or orphaned
pub const PROBE_INDEX_PREFIX: &str = "backup_test_";

/// Prefix shared by every scratch restore index
pub const RESTORE_INDEX_PREFIX: &str = "restore_test_";

/// `strftime` format of monthly repository names
pub const REPOSITORY_FORMAT: &str = "%m-%Y";

/// `strftime` format of snapshot names
pub const SNAPSHOT_FORMAT: &str = "%m-%d_%H%M";

/// Immutable values for one verification run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    started_at: DateTime<Utc>,
    probe_index: String,
    restore_index: String,
    repository: String,
    snapshot: String,
}

impl RunContext {
    /// Derive all names from the current time
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Derive all names from a fixed time
    pub fn at(started_at: DateTime<Utc>) -> Self {
        let epoch = started_at.timestamp();
        Self {
            started_at,
            probe_index: format!("{}{}", PROBE_INDEX_PREFIX, epoch),
            restore_index: format!("{}{}", RESTORE_INDEX_PREFIX, epoch),
            repository: started_at.format(REPOSITORY_FORMAT).to_string(),
            snapshot: started_at.format(SNAPSHOT_FORMAT).to_string(),
        }
    }

    /// When the run started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Index holding this run's probe documents
    pub fn probe_index(&self) -> &str {
        &self.probe_index
    }

    /// Index the probe index is restored into
    pub fn restore_index(&self) -> &str {
        &self.restore_index
    }

    /// This month's snapshot repository
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// This run's snapshot
    pub fn snapshot(&self) -> &str {
        &self.snapshot
    }

    /// `repository/snapshot`, for logs and errors
    pub fn snapshot_path(&self) -> String {
        format!("{}/{}", self.repository, self.snapshot)
    }
}
