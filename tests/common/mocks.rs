//! Recording mocks for the external service traits
//!
//! Every mock keeps its state behind `Arc<Mutex<_>>` so a test can hand one
//! clone to the coordinator and inspect the recorded calls afterwards.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use fleet_reaper::error::{ReaperError, ReaperResult};
use fleet_reaper::services::{
    CloudIdentity, CloudSession, NodeSource, VolumeService, WorkerService, WorkerServiceConnector,
};
use fleet_reaper::{Volume, Worker};

#[derive(Debug, Default)]
pub struct MockNodeState {
    pub nodes: Vec<String>,
    pub list_error: Option<String>,
    pub list_calls: usize,
}

/// Node source returning a configurable, mutable node list
#[derive(Debug, Clone, Default)]
pub struct MockNodeSource {
    pub state: Arc<Mutex<MockNodeState>>,
}

impl MockNodeSource {
    pub fn with_nodes(nodes: &[&str]) -> Self {
        let source = Self::default();
        source.state.lock().unwrap().nodes = nodes.iter().map(|n| n.to_string()).collect();
        source
    }

    pub fn failing(message: &str) -> Self {
        let source = Self::default();
        source.state.lock().unwrap().list_error = Some(message.to_string());
        source
    }

    /// Simulates a node joining the cluster
    pub fn add_node(&self, name: &str) {
        self.state.lock().unwrap().nodes.push(name.to_string());
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }
}

#[async_trait]
impl NodeSource for MockNodeSource {
    fn source_name(&self) -> &'static str {
        "mock"
    }

    async fn list_live_nodes(&self) -> ReaperResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        match &state.list_error {
            Some(message) => Err(ReaperError::request("kubernetes", "list_nodes", message.clone())),
            None => Ok(state.nodes.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockWorkerState {
    pub workers: Vec<Worker>,
    pub pruned: Vec<String>,
    pub prune_attempts: Vec<String>,
    pub prune_failures: HashSet<String>,
    pub list_error: Option<String>,
}

/// Worker service where a successful prune removes the worker from listings
#[derive(Debug, Clone, Default)]
pub struct MockWorkerService {
    pub state: Arc<Mutex<MockWorkerState>>,
    /// Nodes that join the cluster while workers are being listed
    pub joins_on_list: Option<(MockNodeSource, Vec<String>)>,
}

impl MockWorkerService {
    pub fn with_workers(workers: Vec<Worker>) -> Self {
        let service = Self::default();
        service.state.lock().unwrap().workers = workers;
        service
    }

    pub fn fail_prune(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .prune_failures
            .insert(name.to_string());
    }

    pub fn fail_list(&self, message: &str) {
        self.state.lock().unwrap().list_error = Some(message.to_string());
    }

    pub fn pruned(&self) -> Vec<String> {
        let mut pruned = self.state.lock().unwrap().pruned.clone();
        pruned.sort();
        pruned
    }

    pub fn prune_attempts(&self) -> usize {
        self.state.lock().unwrap().prune_attempts.len()
    }
}

#[async_trait]
impl WorkerService for MockWorkerService {
    async fn list_workers(&self) -> ReaperResult<Vec<Worker>> {
        if let Some((nodes, names)) = &self.joins_on_list {
            for name in names {
                nodes.add_node(name);
            }
        }
        let state = self.state.lock().unwrap();
        match &state.list_error {
            Some(message) => Err(ReaperError::api("concourse", "list_workers", 500, message.clone())),
            None => Ok(state.workers.clone()),
        }
    }

    async fn prune_worker(&self, name: &str) -> ReaperResult<()> {
        let mut state = self.state.lock().unwrap();
        state.prune_attempts.push(name.to_string());
        if state.prune_failures.contains(name) {
            return Err(ReaperError::api("concourse", "prune_worker", 500, "prune refused"));
        }
        state.workers.retain(|w| w.name != name);
        state.pruned.push(name.to_string());
        Ok(())
    }
}

/// Connector handing out a shared [`MockWorkerService`]
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    pub service: MockWorkerService,
    pub connect_error: Option<String>,
    pub connects: Arc<Mutex<usize>>,
}

impl MockConnector {
    pub fn new(service: MockWorkerService) -> Self {
        Self {
            service,
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            connect_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

#[async_trait]
impl WorkerServiceConnector for MockConnector {
    async fn connect(&self) -> ReaperResult<Arc<dyn WorkerService>> {
        *self.connects.lock().unwrap() += 1;
        match &self.connect_error {
            Some(message) => Err(ReaperError::authentication("concourse", message.clone())),
            None => Ok(Arc::new(self.service.clone())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockVolumeState {
    pub volumes: Vec<Volume>,
    pub deleted: Vec<String>,
    pub delete_failures: HashSet<String>,
    pub listed_scopes: Vec<String>,
    pub list_error: Option<String>,
}

/// Volume service where a successful delete removes the volume from listings
#[derive(Debug, Clone, Default)]
pub struct MockVolumeService {
    pub state: Arc<Mutex<MockVolumeState>>,
}

impl MockVolumeService {
    pub fn with_volumes(volumes: Vec<Volume>) -> Self {
        let service = Self::default();
        service.state.lock().unwrap().volumes = volumes;
        service
    }

    pub fn fail_list(&self, message: &str) {
        self.state.lock().unwrap().list_error = Some(message.to_string());
    }

    pub fn fail_delete(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(id.to_string());
    }

    pub fn deleted(&self) -> Vec<String> {
        let mut deleted = self.state.lock().unwrap().deleted.clone();
        deleted.sort();
        deleted
    }

    pub fn listed_scopes(&self) -> Vec<String> {
        self.state.lock().unwrap().listed_scopes.clone()
    }
}

#[async_trait]
impl VolumeService for MockVolumeService {
    async fn list_volumes(&self, scope_id: &str) -> ReaperResult<Vec<Volume>> {
        let mut state = self.state.lock().unwrap();
        state.listed_scopes.push(scope_id.to_string());
        match &state.list_error {
            Some(message) => Err(ReaperError::api("cinder", "list_volumes", 503, message.clone())),
            None => Ok(state.volumes.clone()),
        }
    }

    async fn delete_volume(&self, id: &str) -> ReaperResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.delete_failures.contains(id) {
            return Err(ReaperError::api("cinder", "delete_volume", 409, "volume is busy"));
        }
        state.volumes.retain(|v| v.id != id);
        state.deleted.push(id.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockCloudState {
    pub auth_error: Option<String>,
    pub scope_error: Option<String>,
    pub authentications: usize,
}

/// Cloud identity scoped to `project-1`, backed by a [`MockVolumeService`]
#[derive(Debug, Clone, Default)]
pub struct MockCloud {
    pub volumes: MockVolumeService,
    pub state: Arc<Mutex<MockCloudState>>,
}

impl MockCloud {
    pub fn new(volumes: MockVolumeService) -> Self {
        Self {
            volumes,
            state: Arc::default(),
        }
    }

    pub fn fail_auth(&self, message: &str) {
        self.state.lock().unwrap().auth_error = Some(message.to_string());
    }

    pub fn fail_scope(&self, message: &str) {
        self.state.lock().unwrap().scope_error = Some(message.to_string());
    }

    pub fn authentications(&self) -> usize {
        self.state.lock().unwrap().authentications
    }
}

#[async_trait]
impl CloudIdentity for MockCloud {
    async fn authenticate(&self) -> ReaperResult<CloudSession> {
        let mut state = self.state.lock().unwrap();
        state.authentications += 1;
        if let Some(message) = &state.auth_error {
            return Err(ReaperError::authentication("keystone", message.clone()));
        }
        Ok(CloudSession {
            token: "cloud-token".to_string(),
            project_id: Some("project-1".to_string()),
            expires_at: None,
            block_storage_url: Some("https://cinder.example.com/v3/project-1".to_string()),
        })
    }

    async fn resolve_scope(&self, _session: &CloudSession) -> ReaperResult<String> {
        match &self.state.lock().unwrap().scope_error {
            Some(message) => Err(ReaperError::scope_resolution(message.clone())),
            None => Ok("project-1".to_string()),
        }
    }

    fn volume_service(&self, _session: &CloudSession) -> ReaperResult<Arc<dyn VolumeService>> {
        Ok(Arc::new(self.volumes.clone()))
    }
}
