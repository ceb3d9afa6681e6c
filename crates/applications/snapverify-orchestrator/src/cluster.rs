//! Typed cluster operations
//!
//! Thin wrappers that build [`ApiRequest`]s, send them through the
//! [`RetryingCaller`] and decode the parts of the response the verifier
//! cares about. A 404 is surfaced as `None`/`false` where "absent" is a valid
//! answer; any other unexpected status becomes `OperationFailed`.

use crate::error::{Result, VerifyError};
use crate::gateway::{ApiRequest, ApiResponse};
use crate::retry::RetryingCaller;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// Document field holding the probe value
pub const PROBE_FIELD: &str = "test_value";

/// One row of `_cat/shards`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShardState {
    /// Index name
    pub index: String,
    /// Shard number
    pub shard: String,
    /// `p` or `r`
    pub prirep: String,
    /// `STARTED`, `INITIALIZING`, `RELOCATING`, `UNASSIGNED`
    pub state: String,
}

impl ShardState {
    /// Whether the shard is serving
    pub fn is_started(&self) -> bool {
        self.state == "STARTED"
    }

    /// Whether this is a primary copy
    pub fn is_primary(&self) -> bool {
        self.prirep == "p"
    }

    /// Whether the shard has no node
    pub fn is_unassigned(&self) -> bool {
        self.state == "UNASSIGNED"
    }
}

/// Shard progress reported by `_status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ShardsStats {
    /// Shards finished
    #[serde(default)]
    pub done: u64,
    /// Shards failed
    #[serde(default)]
    pub failed: u64,
    /// Shards in the snapshot
    #[serde(default)]
    pub total: u64,
}

/// One entry of `_snapshot/{repo}/{snap}/_status`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotStatus {
    /// Snapshot name
    pub snapshot: String,
    /// `STARTED`, `IN_PROGRESS`, `SUCCESS`, `PARTIAL`, `FAILED`, ...
    pub state: String,
    /// Shard progress
    #[serde(default)]
    pub shards_stats: ShardsStats,
}

/// Shard outcome counts of a finished snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ShardCounts {
    /// Shards in the snapshot
    #[serde(default)]
    pub total: u64,
    /// Shards that failed
    #[serde(default)]
    pub failed: u64,
    /// Shards that succeeded
    #[serde(default)]
    pub successful: u64,
}

/// One entry of `_snapshot/{repo}/{snap}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotInfo {
    /// Snapshot name
    pub snapshot: String,
    /// Final state
    pub state: String,
    /// Per-shard failure records
    #[serde(default)]
    pub failures: Vec<Value>,
    /// Shard counts
    #[serde(default)]
    pub shards: ShardCounts,
    /// Wall time of the snapshot
    #[serde(default)]
    pub duration_in_millis: u64,
}

#[derive(Deserialize)]
struct CatMaster {
    node: String,
}

#[derive(Deserialize)]
struct CatIndex {
    index: String,
}

#[derive(Deserialize)]
struct SnapshotList<T> {
    #[serde(default = "Vec::new")]
    snapshots: Vec<T>,
}

#[derive(Deserialize)]
struct RecoveryShard {
    stage: String,
}

#[derive(Deserialize)]
struct IndexRecovery {
    #[serde(default)]
    shards: Vec<RecoveryShard>,
}

/// Typed operations over the cluster REST API
#[derive(Clone)]
pub struct ClusterApi {
    caller: RetryingCaller,
}

impl ClusterApi {
    /// Create the API over a retrying caller
    pub fn new(caller: RetryingCaller) -> Self {
        Self { caller }
    }

    /// Name of the currently elected master node
    pub async fn master_node(&self) -> Result<String> {
        let request = ApiRequest::get("_cat/master").with_query("format", "json");
        let response = self.success(request).await?;
        let rows: Vec<CatMaster> = decode("_cat/master", response.body)?;
        rows.into_iter()
            .next()
            .map(|row| row.node)
            .ok_or_else(|| VerifyError::unexpected("_cat/master returned no master"))
    }

    /// Value of a cluster setting, transient first, then persistent
    pub async fn cluster_setting(&self, key: &str) -> Result<Option<String>> {
        let request = ApiRequest::get("_cluster/settings").with_query("flat_settings", "true");
        let response = self.success(request).await?;

        for scope in ["transient", "persistent"] {
            if let Some(value) = response.body.get(scope).and_then(|s| s.get(key)) {
                return Ok(Some(match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }));
            }
        }
        Ok(None)
    }

    /// Whether an index exists
    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        let request = ApiRequest::get(index);
        let response = self.caller.call(request.clone()).await?;
        presence(&request, response).map(|r| r.is_some())
    }

    /// Names of indices matching a wildcard pattern
    pub async fn list_indices(&self, pattern: &str) -> Result<Vec<String>> {
        let request = ApiRequest::get(format!("_cat/indices/{}", pattern))
            .with_query("format", "json")
            .with_query("h", "index");
        let response = self.caller.call(request.clone()).await?;

        match presence(&request, response)? {
            Some(body) => {
                let rows: Vec<CatIndex> = decode("_cat/indices", body)?;
                Ok(rows.into_iter().map(|row| row.index).collect())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Create an empty index with the cluster's default settings
    pub async fn create_index(&self, index: &str) -> Result<()> {
        self.success(ApiRequest::put(index)).await.map(|_| ())
    }

    /// Delete an index; `false` if it did not exist
    pub async fn delete_index(&self, index: &str) -> Result<bool> {
        let request = ApiRequest::delete(index);
        let response = self.caller.call(request.clone()).await?;
        presence(&request, response).map(|r| r.is_some())
    }

    /// Write a probe document, creating the index if needed
    pub async fn put_probe_document(&self, index: &str, id: u64, value: &str) -> Result<()> {
        let request = ApiRequest::put(format!("{}/_doc/{}", index, id))
            .with_body(json!({ PROBE_FIELD: value }));
        self.success(request).await.map(|_| ())
    }

    /// Probe value of a document, `None` if the index or document is absent
    pub async fn get_probe_value(&self, index: &str, id: u64) -> Result<Option<String>> {
        let request = ApiRequest::get(format!("{}/_doc/{}", index, id));
        let response = self.caller.call(request.clone()).await?;

        let Some(body) = presence(&request, response)? else {
            return Ok(None);
        };
        if body.get("found").and_then(Value::as_bool) != Some(true) {
            return Ok(None);
        }

        body.get("_source")
            .and_then(|s| s.get(PROBE_FIELD))
            .and_then(Value::as_str)
            .map(|v| Some(v.to_string()))
            .ok_or_else(|| {
                VerifyError::unexpected(format!(
                    "document {}/{} has no {} field: {}",
                    index, id, PROBE_FIELD, body
                ))
            })
    }

    /// Shard states of an index, `None` if the index does not exist
    pub async fn shard_states(&self, index: &str) -> Result<Option<Vec<ShardState>>> {
        let request = ApiRequest::get(format!("_cat/shards/{}", index))
            .with_query("format", "json")
            .with_query("h", "index,shard,prirep,state");
        let response = self.caller.call(request.clone()).await?;

        match presence(&request, response)? {
            Some(body) => decode("_cat/shards", body).map(Some),
            None => Ok(None),
        }
    }

    /// Recovery stages of every shard of an index, `None` if it does not exist
    pub async fn recovery_stages(&self, index: &str) -> Result<Option<Vec<String>>> {
        let request = ApiRequest::get(format!("{}/_recovery", index));
        let response = self.caller.call(request.clone()).await?;

        let Some(body) = presence(&request, response)? else {
            return Ok(None);
        };
        let Some(entry) = body.get(index) else {
            return Ok(Some(Vec::new()));
        };
        let recovery: IndexRecovery = decode("_recovery", entry.clone())?;
        Ok(Some(recovery.shards.into_iter().map(|s| s.stage).collect()))
    }

    /// Whether a snapshot repository exists
    pub async fn repository_exists(&self, repository: &str) -> Result<bool> {
        let request = ApiRequest::get(format!("_snapshot/{}", repository));
        let response = self.caller.call(request.clone()).await?;
        presence(&request, response).map(|r| r.is_some())
    }

    /// Names of all registered snapshot repositories
    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        let response = self.success(ApiRequest::get("_snapshot")).await?;
        match response.body {
            Value::Object(map) => Ok(map.into_iter().map(|(name, _)| name).collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(VerifyError::unexpected(format!(
                "_snapshot returned {}",
                other
            ))),
        }
    }

    /// Register a snapshot repository
    pub async fn create_repository(&self, repository: &str, definition: Value) -> Result<()> {
        let request = ApiRequest::put(format!("_snapshot/{}", repository)).with_body(definition);
        self.success(request).await.map(|_| ())
    }

    /// Unregister a snapshot repository
    pub async fn delete_repository(&self, repository: &str) -> Result<()> {
        let request = ApiRequest::delete(format!("_snapshot/{}", repository));
        self.success(request).await.map(|_| ())
    }

    /// Start a snapshot of the whole cluster without waiting for it
    pub async fn start_snapshot(&self, repository: &str, snapshot: &str) -> Result<()> {
        let request = ApiRequest::put(format!("_snapshot/{}/{}", repository, snapshot))
            .with_query("wait_for_completion", "false");
        self.success(request).await.map(|_| ())
    }

    /// Current status of a snapshot, `None` if the cluster does not know it
    pub async fn snapshot_status(
        &self,
        repository: &str,
        snapshot: &str,
    ) -> Result<Option<SnapshotStatus>> {
        let request = ApiRequest::get(format!("_snapshot/{}/{}/_status", repository, snapshot));
        let response = self.caller.call(request.clone()).await?;

        match presence(&request, response)? {
            Some(body) => {
                let list: SnapshotList<SnapshotStatus> = decode("_status", body)?;
                Ok(list.snapshots.into_iter().next())
            }
            None => Ok(None),
        }
    }

    /// Details of a finished snapshot
    pub async fn snapshot_info(&self, repository: &str, snapshot: &str) -> Result<SnapshotInfo> {
        let request = ApiRequest::get(format!("_snapshot/{}/{}", repository, snapshot));
        let response = self.success(request).await?;
        let list: SnapshotList<SnapshotInfo> = decode("_snapshot", response.body)?;
        list.snapshots.into_iter().next().ok_or_else(|| {
            VerifyError::unexpected(format!("snapshot {}/{} not listed", repository, snapshot))
        })
    }

    /// Start a restore without waiting for it; returns the response body
    pub async fn start_restore(
        &self,
        repository: &str,
        snapshot: &str,
        definition: Value,
    ) -> Result<Value> {
        let request = ApiRequest::post(format!("_snapshot/{}/{}/_restore", repository, snapshot))
            .with_query("wait_for_completion", "false")
            .with_body(definition);
        self.success(request).await.map(|r| r.body)
    }

    /// Call and require a 2xx
    async fn success(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = self.caller.call(request.clone()).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(rejected(&request, &response))
        }
    }
}

/// 2xx → `Some(body)`, 404 → `None`, anything else → error
fn presence(request: &ApiRequest, response: ApiResponse) -> Result<Option<Value>> {
    if response.is_success() {
        Ok(Some(response.body))
    } else if response.is_not_found() {
        Ok(None)
    } else {
        Err(rejected(request, &response))
    }
}

fn rejected(request: &ApiRequest, response: &ApiResponse) -> VerifyError {
    VerifyError::OperationFailed {
        method: request.method.to_string(),
        target: request.path.clone(),
        parameters: request.describe_parameters(),
        status: Some(response.status),
        body: response.body.to_string(),
    }
}

fn decode<T: DeserializeOwned>(what: &str, body: Value) -> Result<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| VerifyError::unexpected(format!("{} response {}: {}", what, body, e)))
}
