//! # External Services
//!
//! Trait seams for the collaborators a reconciliation run depends on, plus
//! their HTTP implementations. The reapers and the coordinator only ever see
//! the traits, so every external system can be replaced in tests.

pub mod concourse;
pub mod kubernetes;
pub mod openstack;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use crate::error::ReaperResult;
use crate::models::{Volume, Worker};

pub use concourse::{ConcourseConfig, ConcourseConnector, ConcourseWorkerService};
pub use kubernetes::{KubeAccess, KubeNodeSource};
pub use openstack::{CinderVolumeService, KeystoneIdentity};

/// Authoritative source of live cluster node names
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Name used in log lines
    fn source_name(&self) -> &'static str;

    async fn list_live_nodes(&self) -> ReaperResult<Vec<String>>;
}

/// CI worker listing and pruning
#[async_trait]
pub trait WorkerService: Send + Sync {
    async fn list_workers(&self) -> ReaperResult<Vec<Worker>>;

    async fn prune_worker(&self, name: &str) -> ReaperResult<()>;
}

/// Authenticates against the CI service and hands out a ready client
#[async_trait]
pub trait WorkerServiceConnector: Send + Sync {
    async fn connect(&self) -> ReaperResult<Arc<dyn WorkerService>>;
}

/// Cloud identity: authentication and project scope resolution
#[async_trait]
pub trait CloudIdentity: Send + Sync {
    async fn authenticate(&self) -> ReaperResult<CloudSession>;

    /// Project identifier the session is scoped to
    async fn resolve_scope(&self, session: &CloudSession) -> ReaperResult<String>;

    /// Block-storage client bound to the session
    fn volume_service(&self, session: &CloudSession) -> ReaperResult<Arc<dyn VolumeService>>;
}

/// Block-storage volume listing and deletion
#[async_trait]
pub trait VolumeService: Send + Sync {
    async fn list_volumes(&self, scope_id: &str) -> ReaperResult<Vec<Volume>>;

    async fn delete_volume(&self, id: &str) -> ReaperResult<()>;
}

/// Authenticated cloud session
#[derive(Clone)]
pub struct CloudSession {
    pub token: String,
    /// Project the token is scoped to, when the issuer reported one
    pub project_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Block-storage endpoint picked from the service catalog
    pub block_storage_url: Option<String>,
}

impl fmt::Debug for CloudSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudSession")
            .field("token", &"[MASKED]")
            .field("project_id", &self.project_id)
            .field("expires_at", &self.expires_at)
            .field("block_storage_url", &self.block_storage_url)
            .finish()
    }
}

/// Turn a non-success HTTP response into a structured API error
pub(crate) async fn api_error(
    service: &str,
    operation: &str,
    response: reqwest::Response,
) -> crate::error::ReaperError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    crate::error::ReaperError::api(service, operation, status.as_u16(), body)
}
