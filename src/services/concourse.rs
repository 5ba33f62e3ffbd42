//! # Concourse Worker Service
//!
//! HTTP client for the Concourse worker API. Authentication is an OAuth2
//! password grant against the `sky/token` endpoint using the public `fly`
//! client, after which every call carries the bearer token.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{api_error, WorkerService, WorkerServiceConnector};
use crate::config::{CiConfig, ConfigurationError};
use crate::constants::concourse::{CLIENT_ID, CLIENT_SECRET, SCOPES, SERVICE, TOKEN_PATH};
use crate::error::{ReaperError, ReaperResult};
use crate::models::Worker;

/// Connection settings for the Concourse API
#[derive(Clone)]
pub struct ConcourseConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Timeout for the token request only
    pub auth_timeout: Duration,
}

impl std::fmt::Debug for ConcourseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcourseConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("auth_timeout", &self.auth_timeout)
            .finish()
    }
}

impl From<&CiConfig> for ConcourseConfig {
    fn from(config: &CiConfig) -> Self {
        Self {
            base_url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            auth_timeout: config.auth_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

/// Logs in to Concourse and produces an authenticated [`ConcourseWorkerService`]
#[derive(Debug)]
pub struct ConcourseConnector {
    config: ConcourseConfig,
}

impl ConcourseConnector {
    pub fn new(config: ConcourseConfig) -> Self {
        Self { config }
    }

    fn base_url(&self) -> ReaperResult<Url> {
        parse_base_url(&self.config.base_url)
    }

    async fn fetch_token(&self, base_url: &Url) -> ReaperResult<String> {
        let token_url = base_url.join(TOKEN_PATH).map_err(|e| {
            ConfigurationError::invalid_value("ci.url", self.config.base_url.as_str(), e.to_string())
        })?;

        let auth_client = Client::builder()
            .timeout(self.config.auth_timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|e| ReaperError::authentication(SERVICE, e.to_string()))?;

        debug!("Requesting Concourse token from: {}", token_url);

        let response = auth_client
            .post(token_url)
            .basic_auth(CLIENT_ID, Some(CLIENT_SECRET))
            .form(&[
                ("grant_type", "password"),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
                ("scope", SCOPES),
            ])
            .send()
            .await
            .map_err(|e| ReaperError::authentication(SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReaperError::authentication(
                SERVICE,
                format!("token request failed: {status} - {body}"),
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ReaperError::authentication(SERVICE, format!("invalid token response: {e}")))?;

        if let Some(kind) = token.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(ReaperError::authentication(
                    SERVICE,
                    format!("unsupported token type '{kind}'"),
                ));
            }
        }

        Ok(token.access_token)
    }
}

#[async_trait]
impl WorkerServiceConnector for ConcourseConnector {
    async fn connect(&self) -> ReaperResult<Arc<dyn WorkerService>> {
        let base_url = self.base_url()?;
        let token = self.fetch_token(&base_url).await?;
        let service = ConcourseWorkerService::new(base_url, &token)?;

        info!(
            base_url = %self.config.base_url,
            user = %self.config.username,
            "Authenticated against Concourse"
        );
        Ok(Arc::new(service))
    }
}

/// Authenticated Concourse worker API client
pub struct ConcourseWorkerService {
    client: Client,
    base_url: Url,
}

impl std::fmt::Debug for ConcourseWorkerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcourseWorkerService")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl ConcourseWorkerService {
    /// Listing and pruning use the client default timeout
    pub fn new(base_url: Url, token: &str) -> ReaperResult<Self> {
        let mut headers = header::HeaderMap::new();
        let mut value = header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ReaperError::authentication(SERVICE, format!("unusable token: {e}")))?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(user_agent())
            .build()
            .map_err(|e| ReaperError::request(SERVICE, "build_client", e.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn workers_url(&self, segments: &[&str]) -> ReaperResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ReaperError::request(SERVICE, "build_url", "base URL cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "v1", "workers"])
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl WorkerService for ConcourseWorkerService {
    async fn list_workers(&self) -> ReaperResult<Vec<Worker>> {
        let url = self.workers_url(&[])?;
        debug!("Listing workers from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ReaperError::request(SERVICE, "list_workers", e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(SERVICE, "list_workers", response).await);
        }

        let workers: Vec<Worker> = response.json().await.map_err(|e| {
            ReaperError::invalid_response(SERVICE, "workers", format!("failed to parse: {e}"))
        })?;

        info!("Retrieved {} workers", workers.len());
        Ok(workers)
    }

    async fn prune_worker(&self, name: &str) -> ReaperResult<()> {
        let url = self.workers_url(&[name, "prune"])?;
        debug!("Pruning worker via: {}", url);

        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|e| ReaperError::request(SERVICE, "prune_worker", e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(SERVICE, "prune_worker", response).await);
        }
        Ok(())
    }
}

fn parse_base_url(raw: &str) -> ReaperResult<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| ConfigurationError::invalid_value("ci.url", raw, e.to_string()))?;
    // `join` replaces the last segment unless the path ends with a slash
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn user_agent() -> String {
    format!("fleet-reaper/{}", env!("CARGO_PKG_VERSION"))
}
