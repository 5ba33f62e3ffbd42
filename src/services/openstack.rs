//! # OpenStack Identity and Block Storage
//!
//! Keystone v3 application-credential authentication, project scope
//! resolution through token validation, and a Cinder client for listing and
//! deleting volumes.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{api_error, CloudIdentity, CloudSession, VolumeService};
use crate::config::{CloudConfig, ConfigurationError};
use crate::constants::openstack::{
    AUTH_TOKEN_HEADER, BLOCK_STORAGE_TYPES, IDENTITY_SERVICE, PUBLIC_INTERFACE, STORAGE_SERVICE,
    SUBJECT_TOKEN_HEADER,
};
use crate::error::{ReaperError, ReaperResult};
use crate::models::volume::parse_timestamp;
use crate::models::Volume;

/// Keystone connection settings
#[derive(Clone)]
pub struct KeystoneConfig {
    /// Identity v3 endpoint, e.g. `https://keystone.example.com:5000/v3`
    pub auth_url: String,
    pub application_credential_id: String,
    pub application_credential_secret: String,
    pub region: Option<String>,
    pub auth_timeout: Duration,
}

impl std::fmt::Debug for KeystoneConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoneConfig")
            .field("auth_url", &self.auth_url)
            .field("application_credential_id", &self.application_credential_id)
            .field("region", &self.region)
            .field("auth_timeout", &self.auth_timeout)
            .finish()
    }
}

impl From<&CloudConfig> for KeystoneConfig {
    fn from(config: &CloudConfig) -> Self {
        Self {
            auth_url: config.auth_url.clone(),
            application_credential_id: config.application_credential_id.clone(),
            application_credential_secret: config.application_credential_secret.clone(),
            region: config.region.clone(),
            auth_timeout: config.auth_timeout(),
        }
    }
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    auth: AuthBody<'a>,
}

#[derive(Serialize)]
struct AuthBody<'a> {
    identity: Identity<'a>,
}

#[derive(Serialize)]
struct Identity<'a> {
    methods: [&'static str; 1],
    application_credential: ApplicationCredential<'a>,
}

#[derive(Serialize)]
struct ApplicationCredential<'a> {
    id: &'a str,
    secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    expires_at: Option<String>,
    #[serde(default)]
    project: Option<ProjectRef>,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

/// Keystone v3 identity client
#[derive(Debug)]
pub struct KeystoneIdentity {
    config: KeystoneConfig,
    client: Client,
    tokens_url: Url,
}

impl KeystoneIdentity {
    /// Authentication calls use the short auth timeout
    pub fn new(config: KeystoneConfig) -> ReaperResult<Self> {
        let base = with_trailing_slash(&config.auth_url).map_err(|e| {
            ConfigurationError::invalid_value("cloud.auth_url", config.auth_url.as_str(), e)
        })?;
        let tokens_url = base.join("auth/tokens").map_err(|e| {
            ConfigurationError::invalid_value(
                "cloud.auth_url",
                config.auth_url.as_str(),
                e.to_string(),
            )
        })?;

        let client = Client::builder()
            .timeout(config.auth_timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|e| ReaperError::authentication(IDENTITY_SERVICE, e.to_string()))?;

        Ok(Self {
            config,
            client,
            tokens_url,
        })
    }

    fn select_block_storage(&self, catalog: &[CatalogEntry]) -> Option<String> {
        select_endpoint(catalog, BLOCK_STORAGE_TYPES, self.config.region.as_deref())
    }
}

#[async_trait]
impl CloudIdentity for KeystoneIdentity {
    async fn authenticate(&self) -> ReaperResult<CloudSession> {
        let request = AuthRequest {
            auth: AuthBody {
                identity: Identity {
                    methods: ["application_credential"],
                    application_credential: ApplicationCredential {
                        id: &self.config.application_credential_id,
                        secret: &self.config.application_credential_secret,
                    },
                },
            },
        };

        debug!("Authenticating against: {}", self.tokens_url);

        let response = self
            .client
            .post(self.tokens_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| ReaperError::authentication(IDENTITY_SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReaperError::authentication(
                IDENTITY_SERVICE,
                format!("token request failed: {status} - {body}"),
            ));
        }

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ReaperError::authentication(
                    IDENTITY_SERVICE,
                    format!("response carried no {SUBJECT_TOKEN_HEADER} header"),
                )
            })?;

        let envelope: TokenEnvelope = response.json().await.map_err(|e| {
            ReaperError::authentication(IDENTITY_SERVICE, format!("invalid token body: {e}"))
        })?;

        let session = CloudSession {
            token,
            project_id: envelope.token.project.map(|p| p.id),
            expires_at: envelope
                .token
                .expires_at
                .as_deref()
                .and_then(parse_timestamp),
            block_storage_url: self.select_block_storage(&envelope.token.catalog),
        };

        info!(
            auth_url = %self.config.auth_url,
            project = ?session.project_id,
            expires_at = ?session.expires_at,
            "Authenticated against OpenStack"
        );
        Ok(session)
    }

    async fn resolve_scope(&self, session: &CloudSession) -> ReaperResult<String> {
        let response = self
            .client
            .get(self.tokens_url.clone())
            .header(AUTH_TOKEN_HEADER, session.token.as_str())
            .header(SUBJECT_TOKEN_HEADER, session.token.as_str())
            .send()
            .await
            .map_err(|e| ReaperError::scope_resolution(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ReaperError::scope_resolution(
                api_error(IDENTITY_SERVICE, "validate_token", response)
                    .await
                    .to_string(),
            ));
        }

        let envelope: TokenEnvelope = response
            .json()
            .await
            .map_err(|e| ReaperError::scope_resolution(format!("invalid token body: {e}")))?;

        envelope
            .token
            .project
            .map(|p| p.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ReaperError::scope_resolution("token is not scoped to a project"))
    }

    fn volume_service(&self, session: &CloudSession) -> ReaperResult<Arc<dyn VolumeService>> {
        let endpoint = session.block_storage_url.as_deref().ok_or_else(|| {
            ReaperError::invalid_response(
                IDENTITY_SERVICE,
                "catalog",
                format!(
                    "no public block-storage endpoint{}",
                    self.config
                        .region
                        .as_deref()
                        .map(|r| format!(" in region {r}"))
                        .unwrap_or_default()
                ),
            )
        })?;
        Ok(Arc::new(CinderVolumeService::new(endpoint, &session.token)?))
    }
}

#[derive(Debug, Deserialize)]
struct VolumePage {
    #[serde(default)]
    volumes: Vec<Volume>,
    #[serde(default)]
    volumes_links: Vec<PageLink>,
}

#[derive(Debug, Deserialize)]
struct PageLink {
    href: String,
    rel: String,
}

/// Cinder block-storage client bound to one token
pub struct CinderVolumeService {
    client: Client,
    endpoint: Url,
}

impl std::fmt::Debug for CinderVolumeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CinderVolumeService")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl CinderVolumeService {
    /// Listing and deletion use the client default timeout
    pub fn new(endpoint: &str, token: &str) -> ReaperResult<Self> {
        let endpoint = with_trailing_slash(endpoint).map_err(|e| {
            ReaperError::invalid_response(IDENTITY_SERVICE, "catalog.url", e)
        })?;

        let mut headers = header::HeaderMap::new();
        let mut value = header::HeaderValue::from_str(token).map_err(|e| {
            ReaperError::authentication(IDENTITY_SERVICE, format!("unusable token: {e}"))
        })?;
        value.set_sensitive(true);
        headers.insert(AUTH_TOKEN_HEADER, value);

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(user_agent())
            .build()
            .map_err(|e| ReaperError::request(STORAGE_SERVICE, "build_client", e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    fn volumes_url(&self, segments: &[&str]) -> ReaperResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ReaperError::request(STORAGE_SERVICE, "build_url", "endpoint cannot be a base")
            })?
            .pop_if_empty()
            .push("volumes")
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl VolumeService for CinderVolumeService {
    async fn list_volumes(&self, scope_id: &str) -> ReaperResult<Vec<Volume>> {
        let mut url = self.volumes_url(&["detail"])?;
        url.query_pairs_mut().append_pair("project_id", scope_id);

        let mut volumes = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(url);

        while let Some(page_url) = next.take() {
            if !visited.insert(page_url.to_string()) {
                break;
            }
            debug!("Listing volumes from: {}", page_url);

            let response = self
                .client
                .get(page_url)
                .send()
                .await
                .map_err(|e| ReaperError::request(STORAGE_SERVICE, "list_volumes", e.to_string()))?;

            if !response.status().is_success() {
                return Err(api_error(STORAGE_SERVICE, "list_volumes", response).await);
            }

            let page: VolumePage = response.json().await.map_err(|e| {
                ReaperError::invalid_response(
                    STORAGE_SERVICE,
                    "volumes",
                    format!("failed to parse: {e}"),
                )
            })?;

            volumes.extend(page.volumes);
            next = page
                .volumes_links
                .into_iter()
                .find(|link| link.rel == "next")
                .map(|link| {
                    Url::parse(&link.href).map_err(|e| {
                        ReaperError::invalid_response(
                            STORAGE_SERVICE,
                            "volumes_links",
                            e.to_string(),
                        )
                    })
                })
                .transpose()?;
        }

        info!("Retrieved {} volumes", volumes.len());
        Ok(volumes)
    }

    async fn delete_volume(&self, id: &str) -> ReaperResult<()> {
        let url = self.volumes_url(&[id])?;
        debug!("Deleting volume via: {}", url);

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| ReaperError::request(STORAGE_SERVICE, "delete_volume", e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(STORAGE_SERVICE, "delete_volume", response).await);
        }
        Ok(())
    }
}

/// First public endpoint of the preferred service type, optionally region-bound
fn select_endpoint(
    catalog: &[CatalogEntry],
    service_types: &[&str],
    region: Option<&str>,
) -> Option<String> {
    service_types.iter().find_map(|wanted| {
        catalog
            .iter()
            .filter(|entry| entry.service_type == *wanted)
            .flat_map(|entry| entry.endpoints.iter())
            .find(|endpoint| {
                endpoint.interface == PUBLIC_INTERFACE
                    && region.map_or(true, |r| {
                        endpoint.region.as_deref() == Some(r)
                            || endpoint.region_id.as_deref() == Some(r)
                    })
            })
            .map(|endpoint| endpoint.url.clone())
    })
}

fn with_trailing_slash(raw: &str) -> Result<Url, String> {
    let mut url = Url::parse(raw).map_err(|e| e.to_string())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn user_agent() -> String {
    format!("fleet-reaper/{}", env!("CARGO_PKG_VERSION"))
}
