//! Remote HPC backend: entities as server records over a JSON REST API.
//!
//! The server's asset store is content-addressed, so a collection is only
//! uploaded when a probe by identity misses. All requests share one retry
//! policy: exponential backoff with a ±25% jitter window, a configurable
//! attempt ceiling, and an immediate abort on `404`.

use crate::assets::{Asset, AssetCollection};
use crate::entities::{EntityStatus, Experiment, ItemType, Simulation, Suite};
use crate::ids::{EntityId, TagMap, TagQuery};
use crate::platform::{
    AssetOps, ExperimentOps, MetadataOps, Platform, PlatformRecord, SimulationOps, SuiteOps,
};
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default retry ceiling for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 5;
/// First backoff delay; doubles per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Chunk size for streaming downloads.
const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// Field selectors for server-side queries.
///
/// `where_tag` entries combine conjunctively; values compare as strings on
/// the server, matching the client-side tag coercion rule.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryCriteria {
    /// Fields to return on the entity itself.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<String>,
    /// Child entity collections to inline.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub select_children: Vec<String>,
    /// Conjunctive tag filter, coerced values.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub where_tag: HashMap<String, String>,
}

impl QueryCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, field: impl Into<String>) -> Self {
        self.select.push(field.into());
        self
    }

    pub fn select_children(mut self, child: impl Into<String>) -> Self {
        self.select_children.push(child.into());
        self
    }

    pub fn where_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.where_tag.insert(key.into(), value.into());
        self
    }
}

/// Server-side entity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RemoteRecord {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    state: String,
    #[serde(default)]
    tags: TagMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task: Option<crate::entities::task::Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    simulations: Vec<RemoteRecord>,
}

/// One asset in an upload payload, content hex-encoded.
#[derive(Debug, Serialize)]
struct AssetUpload {
    filename: String,
    relative_path: String,
    checksum: String,
    content: String,
}

/// Platform speaking the remote HPC REST API.
pub struct RemotePlatform {
    base_url: String,
    agent: ureq::Agent,
    /// Bearer token for every request.
    pub api_token: Option<String>,
    /// Retry ceiling for transient failures.
    pub max_retries: u32,
    /// Etags observed per entity id, sent back as `If-Match` on update.
    etags: Mutex<HashMap<String, String>>,
}

impl RemotePlatform {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(60))
                .build(),
            api_token: None,
            max_retries: DEFAULT_MAX_RETRIES,
            etags: Mutex::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn apply_headers(&self, mut request: ureq::Request) -> ureq::Request {
        request = request.set("Accept", "application/json");
        if let Some(token) = &self.api_token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        request
    }

    /// Issue a request with the shared retry policy.
    ///
    /// `404` is never retried; everything else backs off exponentially
    /// with jitter until the attempt ceiling.
    fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
        if_match: Option<&str>,
    ) -> Result<ureq::Response> {
        let url = self.url(path);
        let mut last_cause = String::new();
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt, &mut rand::thread_rng());
                debug!(attempt, delay_ms = delay.as_millis() as u64, %url, "retrying request");
                thread::sleep(delay);
            }

            let mut request = self.apply_headers(self.agent.request(method, &url));
            if let Some(etag) = if_match {
                request = request.set("If-Match", etag);
            }
            let result = match body {
                Some(json) => request.send_json(json.clone()),
                None => request.call(),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(404, _)) => {
                    return Err(Error::NotFound(url));
                }
                Err(ureq::Error::Status(code, response)) => {
                    let detail = response.into_string().unwrap_or_default();
                    // Client errors other than 429 will not improve on retry.
                    if (400..500).contains(&code) && code != 429 {
                        return Err(Error::BackendRejection {
                            entity_id: String::new(),
                            platform: "remote".to_string(),
                            cause: format!("HTTP {} on {}: {}", code, url, detail.trim()),
                        });
                    }
                    last_cause = format!("HTTP {}: {}", code, detail.trim());
                }
                Err(e) => {
                    last_cause = e.to_string();
                }
            }
            warn!(attempt = attempt + 1, %url, cause = %last_cause, "request failed");
        }
        Err(Error::BackendUnavailable {
            platform: "remote".to_string(),
            attempts: self.max_retries,
            cause: format!("{} {}: {}", method, url, last_cause),
        })
    }

    fn fetch_record(&self, kind: &str, id: &EntityId, criteria: &QueryCriteria) -> Result<RemoteRecord> {
        let body = serde_json::to_value(criteria)?;
        let response = self.request("POST", &format!("{}/{}/query", kind, id), Some(&body), None)?;
        let record: RemoteRecord = response.into_json()?;
        self.remember_etag(&record);
        Ok(record)
    }

    fn remember_etag(&self, record: &RemoteRecord) {
        if let Some(etag) = &record.etag {
            if let Ok(mut etags) = self.etags.lock() {
                etags.insert(record.id.clone(), etag.clone());
            }
        }
    }

    fn etag_for(&self, id: &str) -> Option<String> {
        self.etags.lock().ok().and_then(|etags| etags.get(id).cloned())
    }

    fn post_record(&self, kind: &str, record: &RemoteRecord) -> Result<RemoteRecord> {
        let body = serde_json::to_value(record)?;
        let etag = self.etag_for(&record.id);
        let response = self.request("POST", kind, Some(&body), etag.as_deref())?;
        let created: RemoteRecord = response.into_json()?;
        self.remember_etag(&created);
        Ok(created)
    }

    /// Upload an asset collection unless the server already has it.
    ///
    /// The probe keys on the collection identity, so two experiments with
    /// identical asset content produce exactly one upload.
    pub fn ensure_asset_collection(&self, collection: &AssetCollection) -> Result<String> {
        let identity = collection.checksum()?;
        match self.request("GET", &format!("asset-collections/{}", identity), None, None) {
            Ok(_) => {
                debug!(collection = %identity, "asset collection already on server");
                return Ok(identity);
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut uploads = Vec::with_capacity(collection.len());
        for asset in collection.iter() {
            uploads.push(AssetUpload {
                filename: asset.filename.clone(),
                relative_path: asset.relative_path.clone(),
                checksum: asset.checksum()?,
                content: hex::encode(asset.bytes()?),
            });
        }
        let body = serde_json::json!({ "id": identity, "assets": uploads });
        self.request("POST", "asset-collections", Some(&body), None)?;
        info!(collection = %identity, assets = collection.len(), "asset collection uploaded");
        Ok(identity)
    }

    /// Stream a remote file in chunks, resuming from `offset`.
    pub fn stream_file(&self, path: &str, offset: u64) -> Result<FileStream> {
        let url = self.url(path);
        let mut request = self.apply_headers(self.agent.get(&url));
        if offset > 0 {
            request = request.set("Range", &format!("bytes={}-", offset));
        }
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Err(Error::NotFound(url)),
            Err(e) => {
                return Err(Error::BackendUnavailable {
                    platform: "remote".to_string(),
                    attempts: 1,
                    cause: format!("GET {}: {}", url, e),
                })
            }
        };
        Ok(FileStream {
            reader: Box::new(response.into_reader()),
            done: false,
        })
    }
}

/// Chunked reader over a streamed download.
pub struct FileStream {
    reader: Box<dyn Read + Send>,
    done: bool,
}

impl Iterator for FileStream {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = vec![0u8; DOWNLOAD_CHUNK];
        let mut filled = 0;
        while filled < chunk.len() {
            match self.reader.read(&mut chunk[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        if filled == 0 {
            None
        } else {
            chunk.truncate(filled);
            Some(Ok(chunk))
        }
    }
}

/// Compute one backoff delay with a ±25% jitter window.
fn backoff_delay(attempt: u32, rng: &mut impl Rng) -> Duration {
    let base = BACKOFF_BASE.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
    let jitter = rng.gen_range(0.75..=1.25);
    Duration::from_millis((base * jitter) as u64)
}

/// Map a server state string onto the unified status.
fn map_server_state(state: &str) -> EntityStatus {
    match state {
        "CREATED" | "Created" => EntityStatus::Created,
        "SUCCEEDED" | "Succeeded" => EntityStatus::Succeeded,
        "FAILED" | "Failed" | "Canceled" | "CancelRequested" => EntityStatus::Failed,
        _ => EntityStatus::Running,
    }
}

/// The wire form of a status, for records we create.
fn server_state(status: EntityStatus) -> &'static str {
    match status {
        EntityStatus::Created => "CREATED",
        EntityStatus::Running => "RUNNING",
        EntityStatus::Succeeded => "SUCCEEDED",
        EntityStatus::Failed => "FAILED",
    }
}

fn record_from_remote(record: RemoteRecord, item_type: ItemType, raw: bool) -> Result<PlatformRecord> {
    let status = map_server_state(&record.state);
    let id = EntityId::parse(&record.id)?;
    let raw_value = if raw {
        serde_json::to_value(&record)?
    } else {
        serde_json::Value::Null
    };
    Ok(PlatformRecord {
        id,
        item_type,
        status,
        raw: raw_value,
    })
}

impl SuiteOps for RemotePlatform {
    fn create_suite(&self, suite: &mut Suite) -> Result<EntityId> {
        let id = suite.ensure_id();
        let record = RemoteRecord {
            id: id.to_string(),
            name: suite.name.clone(),
            parent_id: None,
            state: server_state(suite.status).to_string(),
            tags: suite.tags.clone(),
            etag: None,
            task: None,
            simulations: Vec::new(),
        };
        self.post_record("suites", &record)?;
        Ok(id)
    }

    fn get_suite(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord> {
        let record = self.fetch_record("suites", id, &QueryCriteria::new())?;
        record_from_remote(record, ItemType::Suite, raw)
    }

    fn delete_suite(&self, id: &EntityId) -> Result<()> {
        self.request("DELETE", &format!("suites/{}", id), None, None)?;
        Ok(())
    }
}

impl ExperimentOps for RemotePlatform {
    fn create_experiment(&self, experiment: &mut Experiment) -> Result<EntityId> {
        let id = experiment.ensure_id();
        let collection_id = self.ensure_asset_collection(&experiment.assets)?;

        let record = RemoteRecord {
            id: id.to_string(),
            name: experiment.name.clone(),
            parent_id: experiment.parent_id.as_ref().map(|p| p.to_string()),
            state: server_state(experiment.status).to_string(),
            tags: experiment.tags.clone(),
            etag: None,
            task: None,
            simulations: Vec::new(),
        };
        let body = serde_json::json!({
            "entity": record,
            "asset_collection": collection_id,
        });
        self.request("POST", "experiments", Some(&body), None)?;
        Ok(id)
    }

    fn get_experiment(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord> {
        let record = self.fetch_record("experiments", id, &QueryCriteria::new())?;
        record_from_remote(record, ItemType::Experiment, raw)
    }

    fn run_experiment(&self, experiment: &mut Experiment) -> Result<()> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        self.request(
            "POST",
            &format!("experiments/{}/commission", id),
            None,
            self.etag_for(id.as_str()).as_deref(),
        )?;
        for simulation in &mut experiment.simulations {
            simulation.update_status(EntityStatus::Running);
        }
        experiment.update_status(EntityStatus::Running);
        info!(experiment = %id, "experiment commissioned on server");
        Ok(())
    }

    fn cancel_experiment(&self, experiment: &mut Experiment, force: bool) -> Result<()> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let path = if force {
            format!("experiments/{}/cancel?force=true", id)
        } else {
            format!("experiments/{}/cancel", id)
        };
        self.request("POST", &path, None, None)?;
        for simulation in &mut experiment.simulations {
            simulation.update_status(EntityStatus::Failed);
        }
        experiment.update_status(EntityStatus::Failed);
        Ok(())
    }

    fn refresh_experiment_status(&self, experiment: &mut Experiment) -> Result<()> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let criteria = QueryCriteria::new()
            .select("state")
            .select_children("simulations");
        let record = self.fetch_record("experiments", &id, &criteria)?;

        let mut states: HashMap<String, EntityStatus> = HashMap::new();
        for child in &record.simulations {
            states.insert(child.id.clone(), map_server_state(&child.state));
        }
        for simulation in &mut experiment.simulations {
            if simulation.status.is_terminal() {
                continue;
            }
            if let Some(sim_id) = simulation.id() {
                if let Some(status) = states.get(sim_id.as_str()) {
                    simulation.update_status(*status);
                }
            }
        }
        if let Some(terminal) = experiment.aggregate_status() {
            experiment.update_status(terminal);
        }
        Ok(())
    }

    fn delete_experiment(&self, id: &EntityId) -> Result<()> {
        self.request("DELETE", &format!("experiments/{}", id), None, None)?;
        Ok(())
    }
}

impl SimulationOps for RemotePlatform {
    fn create_simulation(
        &self,
        experiment: &Experiment,
        simulation: &mut Simulation,
    ) -> Result<EntityId> {
        let experiment_id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let id = simulation.ensure_id();
        simulation.parent_id = Some(experiment_id.clone());

        let record = RemoteRecord {
            id: id.to_string(),
            name: simulation.name.clone(),
            parent_id: Some(experiment_id.to_string()),
            state: server_state(simulation.status).to_string(),
            tags: simulation.tags.clone(),
            etag: None,
            task: Some(simulation.task.clone()),
            simulations: Vec::new(),
        };
        self.post_record(&format!("experiments/{}/simulations", experiment_id), &record)?;
        Ok(id)
    }

    fn get_simulation(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord> {
        let record = self.fetch_record("simulations", id, &QueryCriteria::new())?;
        record_from_remote(record, ItemType::Simulation, raw)
    }

    fn refresh_simulation_status(&self, simulation: &mut Simulation) -> Result<()> {
        if simulation.status.is_terminal() {
            return Ok(());
        }
        let id = simulation
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("simulation was never persisted".to_string()))?;
        let criteria = QueryCriteria::new().select("state");
        let record = self.fetch_record("simulations", &id, &criteria)?;
        simulation.update_status(map_server_state(&record.state));
        Ok(())
    }
}

impl AssetOps for RemotePlatform {
    fn list_assets(
        &self,
        experiment: &Experiment,
        children: bool,
        filters: Option<&TagQuery>,
    ) -> Result<Vec<Asset>> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let path = if children {
            format!("experiments/{}/assets?children=true", id)
        } else {
            format!("experiments/{}/assets", id)
        };
        let response = self.request("GET", &path, None, None)?;
        #[derive(Deserialize)]
        struct AssetListing {
            filename: String,
            relative_path: String,
            content: String,
            #[serde(default)]
            tags: TagMap,
        }
        let listings: Vec<AssetListing> = response.into_json()?;

        let mut assets = Vec::new();
        for listing in listings {
            if let Some(query) = filters {
                if !query.matches(&listing.tags) {
                    continue;
                }
            }
            let content = hex::decode(&listing.content)
                .map_err(|e| Error::Other(format!("bad asset encoding: {}", e)))?;
            assets.push(Asset::from_bytes(
                &listing.filename,
                listing.relative_path,
                content,
            ));
        }
        Ok(assets)
    }
}

impl MetadataOps for RemotePlatform {
    fn load_suite(&self, id: &EntityId) -> Result<Suite> {
        let record = self.fetch_record("suites", id, &QueryCriteria::new())?;
        let mut suite = Suite::new();
        suite.assign_id(EntityId::parse(&record.id)?)?;
        suite.name = record.name;
        suite.tags = record.tags;
        suite.status = map_server_state(&record.state);
        Ok(suite)
    }

    fn load_experiment(&self, id: &EntityId) -> Result<Experiment> {
        let criteria = QueryCriteria::new().select_children("simulations");
        let record = self.fetch_record("experiments", id, &criteria)?;

        let mut experiment = Experiment::new();
        experiment.assign_id(EntityId::parse(&record.id)?)?;
        experiment.name = record.name;
        experiment.parent_id = match record.parent_id {
            Some(parent) => Some(EntityId::parse(&parent)?),
            None => None,
        };
        experiment.tags = record.tags;
        experiment.status = map_server_state(&record.state);

        for child in record.simulations {
            experiment.simulations.push(simulation_from_record(child)?);
        }
        Ok(experiment)
    }

    fn load_simulation(&self, id: &EntityId) -> Result<Simulation> {
        let record = self.fetch_record("simulations", id, &QueryCriteria::new())?;
        simulation_from_record(record)
    }

    fn entity_path(&self, _id: &EntityId) -> Option<PathBuf> {
        None
    }
}

impl Platform for RemotePlatform {
    fn name(&self) -> &str {
        "remote"
    }
}

fn simulation_from_record(record: RemoteRecord) -> Result<Simulation> {
    let task = record
        .task
        .ok_or_else(|| Error::Other(format!("server record {} has no task", record.id)))?;
    let mut simulation = Simulation::new(task);
    simulation.assign_id(EntityId::parse(&record.id)?)?;
    simulation.name = record.name;
    simulation.parent_id = match record.parent_id {
        Some(parent) => Some(EntityId::parse(&parent)?),
        None => None,
    };
    simulation.tags = record.tags;
    simulation.status = map_server_state(&record.state);
    Ok(simulation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Minimal asset-collection endpoint: GET probes answer 404 until the
    /// collection has been POSTed, and every POST bumps the upload counter.
    fn spawn_asset_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
        let addr = listener.local_addr().expect("stub server address");
        let uploads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&uploads);

        thread::spawn(move || {
            let mut known: Vec<String> = Vec::new();
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let mut reader = BufReader::new(stream);

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                let mut content_length = 0usize;
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).is_err() {
                        break;
                    }
                    let header = header.trim_end();
                    if header.is_empty() {
                        break;
                    }
                    if let Some(value) = header.to_ascii_lowercase().strip_prefix("content-length:")
                    {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
                let mut body = vec![0u8; content_length];
                if content_length > 0 {
                    let _ = reader.read_exact(&mut body);
                }

                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or("");
                let path = parts.next().unwrap_or("");
                let status = if method == "GET" {
                    let id = path.rsplit('/').next().unwrap_or("");
                    if known.iter().any(|k| k == id) {
                        "200 OK"
                    } else {
                        "404 Not Found"
                    }
                } else {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let payload: serde_json::Value =
                        serde_json::from_slice(&body).unwrap_or_default();
                    if let Some(id) = payload["id"].as_str() {
                        known.push(id.to_string());
                    }
                    "200 OK"
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}",
                    status
                );
                let _ = reader.get_mut().write_all(response.as_bytes());
            }
        });
        (format!("http://{}", addr), uploads)
    }

    #[test]
    fn test_identical_asset_collections_upload_once() {
        let (base_url, uploads) = spawn_asset_server();
        let mut platform = RemotePlatform::new(base_url);
        platform.max_retries = 1;

        let mut first = AssetCollection::new();
        first
            .add_asset(Asset::from_bytes("model.py", "", b"print(1)".to_vec()), false)
            .unwrap();
        let mut second = AssetCollection::new();
        second
            .add_asset(Asset::from_bytes("model.py", "", b"print(1)".to_vec()), false)
            .unwrap();

        let first_id = platform.ensure_asset_collection(&first).unwrap();
        let second_id = platform.ensure_asset_collection(&second).unwrap();

        assert_eq!(first_id, second_id);
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_server_state_mapping() {
        assert_eq!(map_server_state("CREATED"), EntityStatus::Created);
        assert_eq!(map_server_state("Succeeded"), EntityStatus::Succeeded);
        assert_eq!(map_server_state("Canceled"), EntityStatus::Failed);
        assert_eq!(map_server_state("CancelRequested"), EntityStatus::Failed);
        assert_eq!(map_server_state("Failed"), EntityStatus::Failed);
        assert_eq!(map_server_state("Commissioned"), EntityStatus::Running);
        assert_eq!(map_server_state("InProgress"), EntityStatus::Running);
    }

    #[test]
    fn test_state_round_trip() {
        for status in [
            EntityStatus::Created,
            EntityStatus::Running,
            EntityStatus::Succeeded,
            EntityStatus::Failed,
        ] {
            assert_eq!(map_server_state(server_state(status)), status);
        }
    }

    #[test]
    fn test_backoff_window() {
        let mut rng = rand::thread_rng();
        for attempt in 1..=5u32 {
            let base = 500f64 * 2f64.powi(attempt as i32 - 1);
            for _ in 0..50 {
                let delay = backoff_delay(attempt, &mut rng).as_millis() as f64;
                assert!(delay >= base * 0.75 - 1.0, "delay {} below window", delay);
                assert!(delay <= base * 1.25 + 1.0, "delay {} above window", delay);
            }
        }
    }

    #[test]
    fn test_query_criteria_serialization() {
        let criteria = QueryCriteria::new()
            .select("state")
            .select_children("simulations")
            .where_tag("a", "1");
        let json = serde_json::to_value(&criteria).unwrap();
        assert_eq!(json["select"], serde_json::json!(["state"]));
        assert_eq!(json["select_children"], serde_json::json!(["simulations"]));
        assert_eq!(json["where_tag"]["a"], serde_json::json!("1"));

        // Empty selectors stay off the wire.
        let empty = serde_json::to_value(QueryCriteria::new()).unwrap();
        assert_eq!(empty, serde_json::json!({}));
    }

    #[test]
    fn test_url_normalization() {
        let platform = RemotePlatform::new("https://hpc.example.org/api/");
        assert_eq!(
            platform.url("/experiments/abc"),
            "https://hpc.example.org/api/experiments/abc"
        );
        assert_eq!(
            platform.url("suites/xyz"),
            "https://hpc.example.org/api/suites/xyz"
        );
    }

    #[test]
    fn test_unreachable_host_is_unavailable() {
        let mut platform = RemotePlatform::new("http://127.0.0.1:1/api");
        platform.max_retries = 1;
        let err = platform.request("GET", "experiments/x", None, None).unwrap_err();
        assert!(matches!(
            err,
            Error::BackendUnavailable { attempts: 1, .. }
        ));
    }
}
