//! Verifier configuration
//!
//! Loaded once from YAML at startup and validated before any cluster call is
//! made. Components receive the pieces they need through their constructors.
//!
//! ```yaml
//! env: prod
//! node_name: es-master-1
//! cluster_name: search
//! test_size: 100
//! pagerduty_api_key: XXXX
//! log: /var/log/s3_backup.log
//! new_repo_params:
//!   bucket: backups.example.com
//!   max_snapshot_bytes_per_sec: 100mb
//!   max_restore_bytes_per_sec: 500mb
//! ```

use crate::error::{Result, VerifyError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/s3_backup.yml";

/// Full verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Environment label (`prod`/`production` enables paging)
    #[serde(default = "default_env")]
    pub env: String,

    /// This node's name, compared against the elected master
    pub node_name: String,

    /// Cluster name, used to namespace the repository base path
    pub cluster_name: String,

    /// Number of probe documents written per run
    #[serde(default = "default_test_size")]
    pub test_size: u64,

    /// PagerDuty Events v2 integration key
    #[serde(default)]
    pub pagerduty_api_key: Option<String>,

    /// Error-tracking ingestion endpoint
    #[serde(default)]
    pub error_tracking_url: Option<String>,

    /// Log file; stderr when unset
    #[serde(default)]
    pub log: Option<PathBuf>,

    /// Cluster connection
    #[serde(default)]
    pub elasticsearch: ClusterConnection,

    /// Parameters for newly created monthly repositories
    pub new_repo_params: RepositoryParams,

    /// Timeouts and poll intervals
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Repositories older than this many months are deleted
    #[serde(default = "default_retention_months")]
    pub retention_months: u32,

    /// Replica count of the scratch restore index
    #[serde(default)]
    pub restore_replicas: u32,
}

/// How to reach the cluster API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConnection {
    /// Base URL of the cluster REST API
    #[serde(default = "default_cluster_url")]
    pub url: String,

    /// File containing `user:password`
    #[serde(default)]
    pub auth_file: Option<PathBuf>,

    /// Basic auth user (takes precedence over `auth_file`)
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Default for ClusterConnection {
    fn default() -> Self {
        Self {
            url: default_cluster_url(),
            auth_file: None,
            username: None,
            password: None,
        }
    }
}

/// Basic auth credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl ClusterConnection {
    /// Resolve basic auth credentials, reading the auth file if needed
    pub fn credentials(&self) -> Result<Option<Credentials>> {
        if let Some(ref username) = self.username {
            return Ok(Some(Credentials {
                username: username.clone(),
                password: self.password.clone().unwrap_or_default(),
            }));
        }

        match self.auth_file {
            Some(ref path) => {
                let content = std::fs::read_to_string(path)?;
                parse_credentials(&content).map(Some).ok_or_else(|| {
                    VerifyError::config(format!(
                        "auth file {} must contain user:password",
                        path.display()
                    ))
                })
            }
            None => Ok(None),
        }
    }
}

/// Parse `user:password`, trimming surrounding whitespace
fn parse_credentials(content: &str) -> Option<Credentials> {
    let (username, password) = content.trim().split_once(':')?;
    if username.is_empty() {
        return None;
    }
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Snapshot repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryParams {
    /// Object storage bucket
    pub bucket: String,

    /// Repository type understood by the cluster
    #[serde(default = "default_repository_type")]
    pub repository_type: String,

    /// Object storage region
    #[serde(default)]
    pub region: Option<String>,

    /// Snapshot throughput cap, e.g. `100mb`
    #[serde(default)]
    pub max_snapshot_bytes_per_sec: Option<String>,

    /// Restore throughput cap, e.g. `500mb`
    #[serde(default)]
    pub max_restore_bytes_per_sec: Option<String>,
}

impl RepositoryParams {
    /// Create params for a bucket with default type and no caps
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            repository_type: default_repository_type(),
            region: None,
            max_snapshot_bytes_per_sec: None,
            max_restore_bytes_per_sec: None,
        }
    }
}

/// Timeouts and poll intervals, all in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// Per-request HTTP timeout
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Deadline for snapshot and restore completion
    #[serde(default = "default_backup_timeout_secs")]
    pub backup_timeout_secs: u64,

    /// Pause between snapshot/restore status checks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Pause after requesting a snapshot before the first status check
    #[serde(default = "default_snapshot_settle_secs")]
    pub snapshot_settle_secs: u64,

    /// Pause between index readiness / document visibility checks
    #[serde(default = "default_index_poll_interval_secs")]
    pub index_poll_interval_secs: u64,

    /// Deadline for the restored index to come online
    #[serde(default = "default_index_online_timeout_secs")]
    pub index_online_timeout_secs: u64,

    /// Deadline for a restored document to become readable
    #[serde(default = "default_document_visibility_timeout_secs")]
    pub document_visibility_timeout_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            backup_timeout_secs: default_backup_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            snapshot_settle_secs: default_snapshot_settle_secs(),
            index_poll_interval_secs: default_index_poll_interval_secs(),
            index_online_timeout_secs: default_index_online_timeout_secs(),
            document_visibility_timeout_secs: default_document_visibility_timeout_secs(),
        }
    }
}

impl Timeouts {
    /// Per-request HTTP timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Snapshot/restore completion deadline
    pub fn backup_timeout(&self) -> Duration {
        Duration::from_secs(self.backup_timeout_secs)
    }

    /// Snapshot/restore status poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Delay before the first snapshot status check
    pub fn snapshot_settle(&self) -> Duration {
        Duration::from_secs(self.snapshot_settle_secs)
    }

    /// Index/document poll interval
    pub fn index_poll_interval(&self) -> Duration {
        Duration::from_secs(self.index_poll_interval_secs)
    }

    /// Restored index online deadline
    pub fn index_online_timeout(&self) -> Duration {
        Duration::from_secs(self.index_online_timeout_secs)
    }

    /// Restored document visibility deadline
    pub fn document_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.document_visibility_timeout_secs)
    }
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_test_size() -> u64 {
    100
}

fn default_retention_months() -> u32 {
    crate::retention::DEFAULT_RETENTION_MONTHS
}

fn default_cluster_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_repository_type() -> String {
    "s3".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_backup_timeout_secs() -> u64 {
    3600
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_snapshot_settle_secs() -> u64 {
    5
}

fn default_index_poll_interval_secs() -> u64 {
    1
}

fn default_index_online_timeout_secs() -> u64 {
    600
}

fn default_document_visibility_timeout_secs() -> u64 {
    60
}

impl BackupConfig {
    /// Create a config with defaults for everything but identity and bucket
    pub fn new(
        node_name: impl Into<String>,
        cluster_name: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            env: default_env(),
            node_name: node_name.into(),
            cluster_name: cluster_name.into(),
            test_size: default_test_size(),
            pagerduty_api_key: None,
            error_tracking_url: None,
            log: None,
            elasticsearch: ClusterConnection::default(),
            new_repo_params: RepositoryParams::new(bucket),
            timeouts: Timeouts::default(),
            retention_months: default_retention_months(),
            restore_replicas: 0,
        }
    }

    /// Load and validate a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VerifyError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML config text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| VerifyError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set environment label
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    /// Set probe document count
    pub fn with_test_size(mut self, test_size: u64) -> Self {
        self.test_size = test_size;
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set retention window
    pub fn with_retention_months(mut self, months: u32) -> Self {
        self.retention_months = months;
        self
    }

    /// Whether failures page on-call
    pub fn is_production(&self) -> bool {
        matches!(self.env.as_str(), "prod" | "production")
    }

    /// Reject configurations that would fail at first use
    pub fn validate(&self) -> Result<()> {
        if self.env.trim().is_empty() {
            return Err(VerifyError::config("env must not be empty"));
        }
        if self.node_name.trim().is_empty() {
            return Err(VerifyError::config("node_name must not be empty"));
        }
        if self.cluster_name.trim().is_empty() {
            return Err(VerifyError::config("cluster_name must not be empty"));
        }
        if self.new_repo_params.bucket.trim().is_empty() {
            return Err(VerifyError::config("new_repo_params.bucket must not be empty"));
        }
        if self.retention_months == 0 {
            return Err(VerifyError::config("retention_months must be at least 1"));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("http_timeout_secs", t.http_timeout_secs),
            ("backup_timeout_secs", t.backup_timeout_secs),
            ("poll_interval_secs", t.poll_interval_secs),
            ("index_poll_interval_secs", t.index_poll_interval_secs),
            ("index_online_timeout_secs", t.index_online_timeout_secs),
            (
                "document_visibility_timeout_secs",
                t.document_visibility_timeout_secs,
            ),
        ] {
            if value == 0 {
                return Err(VerifyError::config(format!("timeouts.{} must be positive", name)));
            }
        }

        reqwest::Url::parse(&self.elasticsearch.url).map_err(|e| {
            VerifyError::config(format!(
                "elasticsearch.url {} is not a valid URL: {}",
                self.elasticsearch.url, e
            ))
        })?;

        Ok(())
    }

    /// Copy with secrets replaced, for printing
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.pagerduty_api_key.is_some() {
            copy.pagerduty_api_key = Some("<redacted>".to_string());
        }
        copy.elasticsearch.password = None;
        copy
    }
}
