//! # Reaper Configuration
//!
//! Resolved configuration for a reconciliation run. Values are produced once by
//! [`ConfigLoader`] from an ordered list of sources and are immutable
//! afterwards; nothing else in the crate reads the process environment.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleet_reaper::config::{ConfigLayer, ConfigLoader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sources = ConfigLoader::standard_sources(None, ConfigLayer::default());
//! let config = ConfigLoader::resolve(&sources)?;
//! config.validate()?;
//!
//! println!("worker prefix: {:?}", config.ci.worker_prefix);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::constants::{defaults, env};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::{ConfigLayer, ConfigLoader, ConfigSource};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Cluster access used to capture the membership snapshot
    pub cluster: ClusterConfig,

    /// CI service access and worker ownership scope
    pub ci: CiConfig,

    /// Volume cleanup switches and eligibility knobs
    pub volumes: VolumeCleanupConfig,

    /// Cloud identity access
    pub cloud: CloudConfig,

    pub logging: LoggingConfig,

    pub run: RunConfig,
}

/// Cluster access configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Explicit kubeconfig file; otherwise the standard lookup chain applies
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context overriding `current-context`
    pub context: Option<String>,
}

/// CI service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Name prefix marking workers owned by this reconciler. Empty matches all.
    pub worker_prefix: String,
    pub auth_timeout_ms: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            worker_prefix: String::new(),
            auth_timeout_ms: defaults::AUTH_TIMEOUT_MS,
        }
    }
}

impl CiConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

/// Volume cleanup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeCleanupConfig {
    pub enabled: bool,
    /// Name prefix marking volumes owned by this reconciler. Empty matches all.
    pub prefix: String,
    /// Exact status a volume must report to be deletable
    pub deletable_state: String,
    /// Minimum age before a volume may be deleted
    pub min_retention_secs: u64,
    /// Metadata key naming the owning CI team
    pub team_tag_key: String,
    /// Metadata key naming the owning worker
    pub worker_tag_key: String,
}

impl Default for VolumeCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: String::new(),
            deletable_state: defaults::VOLUME_DELETABLE_STATE.to_string(),
            min_retention_secs: defaults::VOLUME_MIN_RETENTION_SECS,
            team_tag_key: defaults::TEAM_TAG_KEY.to_string(),
            worker_tag_key: defaults::WORKER_TAG_KEY.to_string(),
        }
    }
}

impl VolumeCleanupConfig {
    pub fn min_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.min_retention_secs).unwrap_or(i64::MAX))
    }
}

/// Cloud identity configuration (application credentials)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    pub auth_url: String,
    pub application_credential_id: String,
    pub application_credential_secret: String,
    /// Restricts catalog endpoint selection to one region
    pub region: Option<String>,
    pub auth_timeout_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            auth_url: String::new(),
            application_credential_id: String::new(),
            application_credential_secret: String::new(),
            region: None,
            auth_timeout_ms: defaults::AUTH_TIMEOUT_MS,
        }
    }
}

impl CloudConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigurationError::invalid_value(
                "logging.format",
                s,
                "expected 'text' or 'json'",
            )),
        }
    }
}

/// Per-run execution knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Upper bound on in-flight delete calls per reaper
    pub delete_concurrency: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            delete_concurrency: defaults::DELETE_CONCURRENCY,
        }
    }
}

impl ReaperConfig {
    /// Validate the resolved configuration before any network call is made
    ///
    /// Missing credentials are fatal. Empty ownership prefixes are accepted
    /// because they are an explicit operator choice, but they widen the
    /// deletion scope to every resource, so they are reported loudly.
    pub fn validate(&self) -> ConfigResult<()> {
        require("ci.url", &self.ci.url, "--concourse-url or CONCOURSE_URL")?;
        require(
            "ci.username",
            &self.ci.username,
            "--concourse-user or CONCOURSE_USER",
        )?;
        require(
            "ci.password",
            &self.ci.password,
            "--concourse-password or CONCOURSE_PASSWORD",
        )?;

        if self.volumes.enabled {
            require(
                "cloud.auth_url",
                &self.cloud.auth_url,
                "--os-auth-url or OS_AUTH_URL",
            )?;
            require(
                "cloud.application_credential_id",
                &self.cloud.application_credential_id,
                "--os-application-credential-id or OS_APPLICATION_CREDENTIAL_ID",
            )?;
            require(
                "cloud.application_credential_secret",
                &self.cloud.application_credential_secret,
                "--os-application-credential-secret or OS_APPLICATION_CREDENTIAL_SECRET",
            )?;

            if self.volumes.deletable_state.is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "volumes.deletable_state",
                    "",
                    "a deletable volume state is required",
                ));
            }
        }

        if self.run.delete_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "run.delete_concurrency",
                "0",
                format!("must be at least 1 (set {})", env::DELETE_CONCURRENCY),
            ));
        }

        if self.ci.worker_prefix.is_empty() {
            warn!("Worker prefix is empty: every stalled or landed worker missing from the cluster is eligible for pruning");
        }
        if self.volumes.enabled && self.volumes.prefix.is_empty() {
            warn!("Volume prefix is empty: every team-tagged volume in the project is eligible for deletion");
        }

        Ok(())
    }

    /// JSON view of the configuration with credentials masked
    pub fn sanitized(&self) -> serde_json::Value {
        loader::sanitize_for_logging(self)
    }
}

fn require(field: &str, value: &str, hint: &str) -> ConfigResult<()> {
    if value.is_empty() {
        Err(ConfigurationError::missing_required_field(field, hint))
    } else {
        Ok(())
    }
}
