//! In-memory cluster and notifier shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use snapverify_orchestrator::{
    Alert, ApiRequest, ApiResponse, BackupConfig, ClusterGateway, ErrorReport, FailureNotifier,
    Orchestrator, RunContext, TransportError,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const MASTER: &str = "es-master-1";

type Documents = BTreeMap<u64, String>;

struct Snapshot {
    indices: BTreeMap<String, Documents>,
}

#[derive(Default)]
struct State {
    master: String,
    settings: Value,
    indices: BTreeMap<String, Documents>,
    repositories: BTreeMap<String, Value>,
    snapshots: HashMap<(String, String), Snapshot>,
    snapshot_pending_polls: u32,
    snapshot_stuck: bool,
    snapshot_final_state: String,
    snapshot_failed_shards: u64,
    recovery_pending_polls: u32,
    corrupt_restored_doc: Option<u64>,
    fail_restore_shard: bool,
    unassigned_primaries: HashSet<String>,
    failing_repository_deletes: HashSet<String>,
    transport_timeouts: HashMap<String, u32>,
    calls: Vec<String>,
}

/// A single-node cluster kept in memory
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                master: MASTER.to_string(),
                settings: json!({"persistent": {}, "transient": {}}),
                snapshot_final_state: "SUCCESS".to_string(),
                ..State::default()
            }),
        }
    }

    pub fn with_master(self, node: &str) -> Self {
        self.state.lock().unwrap().master = node.to_string();
        self
    }

    pub fn with_transient_setting(self, key: &str, value: &str) -> Self {
        self.state.lock().unwrap().settings["transient"][key] = json!(value);
        self
    }

    pub fn with_persistent_setting(self, key: &str, value: &str) -> Self {
        self.state.lock().unwrap().settings["persistent"][key] = json!(value);
        self
    }

    pub fn with_index(self, index: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .indices
            .insert(index.to_string(), Documents::new());
        self
    }

    pub fn with_repository(self, repository: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .repositories
            .insert(repository.to_string(), json!({"type": "s3", "settings": {}}));
        self
    }

    /// Report `IN_PROGRESS` this many times before the final state
    pub fn with_snapshot_pending_polls(self, polls: u32) -> Self {
        self.state.lock().unwrap().snapshot_pending_polls = polls;
        self
    }

    /// Snapshots never leave `IN_PROGRESS`
    pub fn with_snapshot_stuck(self) -> Self {
        self.state.lock().unwrap().snapshot_stuck = true;
        self
    }

    /// Finish snapshots in `state` with `failed` failed shards
    pub fn with_snapshot_outcome(self, state: &str, failed: u64) -> Self {
        let mut s = self.state.lock().unwrap();
        s.snapshot_final_state = state.to_string();
        s.snapshot_failed_shards = failed;
        drop(s);
        self
    }

    pub fn with_recovery_pending_polls(self, polls: u32) -> Self {
        self.state.lock().unwrap().recovery_pending_polls = polls;
        self
    }

    /// Restore document `id` with a different value
    pub fn with_corrupt_restore(self, id: u64) -> Self {
        self.state.lock().unwrap().corrupt_restored_doc = Some(id);
        self
    }

    /// Restored indices get a second primary that never leaves `UNASSIGNED`
    pub fn with_failed_restore_shard(self) -> Self {
        self.state.lock().unwrap().fail_restore_shard = true;
        self
    }

    pub fn with_failing_repository_delete(self, repository: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_repository_deletes
            .insert(repository.to_string());
        self
    }

    /// Time out the next `count` requests to `path`
    pub fn with_transport_timeouts(self, path: &str, count: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .transport_timeouts
            .insert(path.to_string(), count);
        self
    }

    /// `"METHOD path"` for every request received, in order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("GET "))
            .collect()
    }

    pub fn indices(&self) -> Vec<String> {
        self.state.lock().unwrap().indices.keys().cloned().collect()
    }

    pub fn repositories(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .repositories
            .keys()
            .cloned()
            .collect()
    }

    pub fn repository_definition(&self, repository: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .repositories
            .get(repository)
            .cloned()
    }

    pub fn snapshot_indices(&self, repository: &str, snapshot: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .get(&(repository.to_string(), snapshot.to_string()))
            .map(|s| s.indices.keys().cloned().collect())
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("{} {}", request.method, request.path));

        if let Some(remaining) = state.transport_timeouts.get_mut(&request.path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Timeout);
            }
        }

        Ok(state.handle(request))
    }
}

impl State {
    fn handle(&mut self, request: &ApiRequest) -> ApiResponse {
        let method = request.method.as_str();
        let segments: Vec<&str> = request.path.split('/').collect();

        match (method, segments.as_slice()) {
            ("GET", ["_cat", "master"]) => ok(json!([{"node": self.master, "host": "10.0.0.1"}])),
            ("GET", ["_cluster", "settings"]) => ok(self.settings.clone()),
            ("GET", ["_cat", "indices", pattern]) => {
                let prefix = pattern.trim_end_matches('*');
                let rows: Vec<Value> = self
                    .indices
                    .keys()
                    .filter(|name| name.starts_with(prefix))
                    .map(|name| json!({"index": name}))
                    .collect();
                ok(Value::Array(rows))
            }
            ("GET", ["_cat", "shards", index]) => {
                if !self.indices.contains_key(*index) {
                    return index_not_found(index);
                }
                let mut rows =
                    vec![json!({"index": index, "shard": "0", "prirep": "p", "state": "STARTED"})];
                if self.unassigned_primaries.contains(*index) {
                    rows.push(
                        json!({"index": index, "shard": "1", "prirep": "p", "state": "UNASSIGNED"}),
                    );
                }
                ok(Value::Array(rows))
            }
            ("GET", ["_snapshot"]) => ok(Value::Object(
                self.repositories
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )),
            ("GET", ["_snapshot", repository]) => match self.repositories.get(*repository) {
                Some(definition) => ok(json!({ *repository: definition })),
                None => repository_missing(repository),
            },
            ("PUT", ["_snapshot", repository]) => {
                self.repositories.insert(
                    repository.to_string(),
                    request.body.clone().unwrap_or(Value::Null),
                );
                ok(json!({"acknowledged": true}))
            }
            ("DELETE", ["_snapshot", repository]) => {
                if self.failing_repository_deletes.contains(*repository) {
                    return ApiResponse::new(500, json!({"error": "repository_exception"}));
                }
                match self.repositories.remove(*repository) {
                    Some(_) => ok(json!({"acknowledged": true})),
                    None => repository_missing(repository),
                }
            }
            ("PUT", ["_snapshot", repository, snapshot]) => {
                if !self.repositories.contains_key(*repository) {
                    return repository_missing(repository);
                }
                self.snapshots.insert(
                    (repository.to_string(), snapshot.to_string()),
                    Snapshot {
                        indices: self.indices.clone(),
                    },
                );
                ok(json!({"accepted": true}))
            }
            ("GET", ["_snapshot", repository, snapshot, "_status"]) => {
                self.snapshot_status(repository, snapshot)
            }
            ("GET", ["_snapshot", repository, snapshot]) => self.snapshot_info(repository, snapshot),
            ("POST", ["_snapshot", repository, snapshot, "_restore"]) => {
                self.restore(repository, snapshot, request.body.as_ref())
            }
            ("GET", [index, "_recovery"]) => {
                if !self.indices.contains_key(*index) {
                    return index_not_found(index);
                }
                let stage = if self.recovery_pending_polls > 0 {
                    self.recovery_pending_polls -= 1;
                    "INDEX"
                } else {
                    "DONE"
                };
                ok(json!({ *index: {"shards": [{"id": 0, "stage": stage}]} }))
            }
            ("PUT", [index, "_doc", id]) => {
                let value = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("test_value"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let id: u64 = id.parse().unwrap();
                self.indices
                    .entry(index.to_string())
                    .or_default()
                    .insert(id, value);
                ApiResponse::new(201, json!({"result": "created", "_id": id.to_string()}))
            }
            ("GET", [index, "_doc", id]) => {
                let Some(documents) = self.indices.get(*index) else {
                    return index_not_found(index);
                };
                let id: u64 = id.parse().unwrap();
                match documents.get(&id) {
                    Some(value) => ok(json!({
                        "_index": index,
                        "_id": id.to_string(),
                        "found": true,
                        "_source": {"test_value": value},
                    })),
                    None => ApiResponse::new(404, json!({"_index": index, "found": false})),
                }
            }
            ("PUT", [index]) => {
                if self.indices.contains_key(*index) {
                    return ApiResponse::new(
                        400,
                        json!({"error": {"type": "resource_already_exists_exception"}, "status": 400}),
                    );
                }
                self.indices.insert(index.to_string(), Documents::new());
                ok(json!({"acknowledged": true, "index": index}))
            }
            ("GET", [index]) => match self.indices.get(*index) {
                Some(_) => ok(json!({ *index: {} })),
                None => index_not_found(index),
            },
            ("DELETE", [index]) => match self.indices.remove(*index) {
                Some(_) => ok(json!({"acknowledged": true})),
                None => index_not_found(index),
            },
            _ => ApiResponse::new(400, json!({"error": format!("unsupported {}", request)})),
        }
    }

    fn snapshot_status(&mut self, repository: &str, snapshot: &str) -> ApiResponse {
        if !self
            .snapshots
            .contains_key(&(repository.to_string(), snapshot.to_string()))
        {
            return ApiResponse::new(404, json!({"error": "snapshot_missing_exception"}));
        }

        let (state, failed) = if self.snapshot_stuck {
            ("IN_PROGRESS".to_string(), 0)
        } else if self.snapshot_pending_polls > 0 {
            self.snapshot_pending_polls -= 1;
            ("IN_PROGRESS".to_string(), 0)
        } else {
            (self.snapshot_final_state.clone(), self.snapshot_failed_shards)
        };

        ok(json!({
            "snapshots": [{
                "snapshot": snapshot,
                "repository": repository,
                "state": state,
                "shards_stats": {"done": 5 - failed, "failed": failed, "total": 5},
            }]
        }))
    }

    fn snapshot_info(&self, repository: &str, snapshot: &str) -> ApiResponse {
        if !self
            .snapshots
            .contains_key(&(repository.to_string(), snapshot.to_string()))
        {
            return ApiResponse::new(404, json!({"error": "snapshot_missing_exception"}));
        }

        let failed = self.snapshot_failed_shards;
        let failures: Vec<Value> = (0..failed)
            .map(|shard| json!({"index": "logs", "shard_id": shard, "reason": "IOException"}))
            .collect();
        ok(json!({
            "snapshots": [{
                "snapshot": snapshot,
                "state": self.snapshot_final_state,
                "failures": failures,
                "shards": {"total": 5, "failed": failed, "successful": 5 - failed},
                "duration_in_millis": 1200,
            }]
        }))
    }

    fn restore(&mut self, repository: &str, snapshot: &str, body: Option<&Value>) -> ApiResponse {
        let Some(stored) = self
            .snapshots
            .get(&(repository.to_string(), snapshot.to_string()))
        else {
            return ApiResponse::new(404, json!({"error": "snapshot_missing_exception"}));
        };
        let field = |name: &str| {
            body.and_then(|b| b.get(name))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let (source, target) = (field("indices"), field("rename_replacement"));

        let Some(documents) = stored.indices.get(&source) else {
            return ApiResponse::new(404, json!({"error": "index_not_found_exception"}));
        };
        if self.indices.contains_key(&target) {
            return ApiResponse::new(500, json!({"error": "snapshot_restore_exception"}));
        }

        let mut restored = documents.clone();
        if let Some(id) = self.corrupt_restored_doc {
            if let Some(value) = restored.get_mut(&id) {
                value.push('X');
            }
        }
        if self.fail_restore_shard {
            self.unassigned_primaries.insert(target.clone());
        }
        self.indices.insert(target, restored);
        ok(json!({"accepted": true}))
    }
}

fn ok(body: Value) -> ApiResponse {
    ApiResponse::new(200, body)
}

fn index_not_found(index: &str) -> ApiResponse {
    ApiResponse::new(
        404,
        json!({"error": {"type": "index_not_found_exception", "index": index}, "status": 404}),
    )
}

fn repository_missing(repository: &str) -> ApiResponse {
    ApiResponse::new(
        404,
        json!({"error": {"type": "repository_missing_exception", "reason": format!("[{}] missing", repository)}, "status": 404}),
    )
}

/// Notifier that records instead of sending
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl FailureNotifier for RecordingNotifier {
    async fn trigger(&self, alert: &Alert) -> snapverify_orchestrator::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    async fn report(&self, report: &ErrorReport) -> snapverify_orchestrator::Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// 2024-03-15T12:00:00Z
pub fn run_context() -> RunContext {
    RunContext::at(Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap())
}

pub fn config() -> BackupConfig {
    BackupConfig::new(MASTER, "search", "backups-bucket").with_test_size(3)
}

pub fn orchestrator(
    config: BackupConfig,
    cluster: &Arc<FakeCluster>,
    notifier: &Arc<RecordingNotifier>,
) -> Orchestrator {
    Orchestrator::new(config, run_context(), cluster.clone(), notifier.clone())
}
