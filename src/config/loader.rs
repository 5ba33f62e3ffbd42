//! Configuration Loader
//!
//! Ordered, explicit configuration resolution. Each [`ConfigSource`] yields a
//! partial [`ConfigLayer`]; layers are folded in the order given so that a
//! later source overrides an earlier one field by field:
//!
//! 1. [`ConfigSource::Defaults`] - built-in values
//! 2. [`ConfigSource::File`] - TOML/YAML file read through the `config` crate
//! 3. [`ConfigSource::Environment`] - process environment variables
//! 4. [`ConfigSource::Flags`] - command-line flags
//!
//! Resolution happens exactly once, before the run coordinator starts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::{
    CiConfig, CloudConfig, ClusterConfig, LogFormat, LoggingConfig, ReaperConfig, RunConfig,
    VolumeCleanupConfig,
};
use crate::constants::env;

/// Declares a partial configuration section whose fields are all optional,
/// together with a field-wise merge where the overriding layer wins.
macro_rules! config_layer {
    ($(#[$meta:meta])* $name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $(pub $field: Option<$ty>,)*
        }

        impl $name {
            fn merge(self, over: Self) -> Self {
                Self {
                    $($field: over.$field.or(self.$field),)*
                }
            }
        }
    };
}

config_layer!(
    /// Partial cluster access settings
    ClusterLayer {
        kubeconfig: PathBuf,
        context: String,
    }
);

config_layer!(
    /// Partial CI service settings
    CiLayer {
        url: String,
        username: String,
        password: String,
        worker_prefix: String,
        auth_timeout_ms: u64,
    }
);

config_layer!(
    /// Partial volume cleanup settings
    VolumeLayer {
        enabled: bool,
        prefix: String,
        deletable_state: String,
        min_retention_secs: u64,
        team_tag_key: String,
        worker_tag_key: String,
    }
);

config_layer!(
    /// Partial cloud identity settings
    CloudLayer {
        auth_url: String,
        application_credential_id: String,
        application_credential_secret: String,
        region: String,
        auth_timeout_ms: u64,
    }
);

config_layer!(LoggingLayer { format: LogFormat });

config_layer!(RunLayer { delete_concurrency: usize });

/// One partial view of the configuration, as contributed by a single source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub cluster: ClusterLayer,
    pub ci: CiLayer,
    pub volumes: VolumeLayer,
    pub cloud: CloudLayer,
    pub logging: LoggingLayer,
    pub run: RunLayer,
}

impl ConfigLayer {
    /// Overlay `over` on top of `self`; fields set in `over` win
    pub fn merge(self, over: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            cluster: self.cluster.merge(over.cluster),
            ci: self.ci.merge(over.ci),
            volumes: self.volumes.merge(over.volumes),
            cloud: self.cloud.merge(over.cloud),
            logging: self.logging.merge(over.logging),
            run: self.run.merge(over.run),
        }
    }

    /// Materialize a full configuration; unset fields take built-in defaults
    pub fn into_config(self) -> ReaperConfig {
        let d = ReaperConfig::default();
        ReaperConfig {
            cluster: ClusterConfig {
                kubeconfig: self.cluster.kubeconfig.or(d.cluster.kubeconfig),
                context: self.cluster.context.or(d.cluster.context),
            },
            ci: CiConfig {
                url: self.ci.url.unwrap_or(d.ci.url),
                username: self.ci.username.unwrap_or(d.ci.username),
                password: self.ci.password.unwrap_or(d.ci.password),
                worker_prefix: self.ci.worker_prefix.unwrap_or(d.ci.worker_prefix),
                auth_timeout_ms: self.ci.auth_timeout_ms.unwrap_or(d.ci.auth_timeout_ms),
            },
            volumes: VolumeCleanupConfig {
                enabled: self.volumes.enabled.unwrap_or(d.volumes.enabled),
                prefix: self.volumes.prefix.unwrap_or(d.volumes.prefix),
                deletable_state: self
                    .volumes
                    .deletable_state
                    .unwrap_or(d.volumes.deletable_state),
                min_retention_secs: self
                    .volumes
                    .min_retention_secs
                    .unwrap_or(d.volumes.min_retention_secs),
                team_tag_key: self.volumes.team_tag_key.unwrap_or(d.volumes.team_tag_key),
                worker_tag_key: self
                    .volumes
                    .worker_tag_key
                    .unwrap_or(d.volumes.worker_tag_key),
            },
            cloud: CloudConfig {
                auth_url: self.cloud.auth_url.unwrap_or(d.cloud.auth_url),
                application_credential_id: self
                    .cloud
                    .application_credential_id
                    .unwrap_or(d.cloud.application_credential_id),
                application_credential_secret: self
                    .cloud
                    .application_credential_secret
                    .unwrap_or(d.cloud.application_credential_secret),
                region: self.cloud.region.or(d.cloud.region),
                auth_timeout_ms: self.cloud.auth_timeout_ms.unwrap_or(d.cloud.auth_timeout_ms),
            },
            logging: LoggingConfig {
                format: self.logging.format.unwrap_or(d.logging.format),
            },
            run: RunConfig {
                delete_concurrency: self
                    .run
                    .delete_concurrency
                    .unwrap_or(d.run.delete_concurrency),
            },
        }
    }
}

impl From<&ReaperConfig> for ConfigLayer {
    fn from(config: &ReaperConfig) -> Self {
        let c = config.clone();
        ConfigLayer {
            cluster: ClusterLayer {
                kubeconfig: c.cluster.kubeconfig,
                context: c.cluster.context,
            },
            ci: CiLayer {
                url: Some(c.ci.url),
                username: Some(c.ci.username),
                password: Some(c.ci.password),
                worker_prefix: Some(c.ci.worker_prefix),
                auth_timeout_ms: Some(c.ci.auth_timeout_ms),
            },
            volumes: VolumeLayer {
                enabled: Some(c.volumes.enabled),
                prefix: Some(c.volumes.prefix),
                deletable_state: Some(c.volumes.deletable_state),
                min_retention_secs: Some(c.volumes.min_retention_secs),
                team_tag_key: Some(c.volumes.team_tag_key),
                worker_tag_key: Some(c.volumes.worker_tag_key),
            },
            cloud: CloudLayer {
                auth_url: Some(c.cloud.auth_url),
                application_credential_id: Some(c.cloud.application_credential_id),
                application_credential_secret: Some(c.cloud.application_credential_secret),
                region: c.cloud.region,
                auth_timeout_ms: Some(c.cloud.auth_timeout_ms),
            },
            logging: LoggingLayer {
                format: Some(c.logging.format),
            },
            run: RunLayer {
                delete_concurrency: Some(c.run.delete_concurrency),
            },
        }
    }
}

/// A configuration source, in increasing order of precedence
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Built-in defaults
    Defaults,
    /// A TOML or YAML file; format inferred from the extension
    File(PathBuf),
    /// A snapshot of environment variables
    Environment(HashMap<String, String>),
    /// Values parsed from command-line flags
    Flags(ConfigLayer),
}

impl ConfigSource {
    /// Capture the current process environment
    pub fn environment() -> Self {
        Self::Environment(std::env::vars().collect())
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Defaults => "defaults",
            Self::File(_) => "file",
            Self::Environment(_) => "environment",
            Self::Flags(_) => "flags",
        }
    }

    fn layer(&self) -> ConfigResult<ConfigLayer> {
        match self {
            Self::Defaults => Ok(ConfigLayer::from(&ReaperConfig::default())),
            Self::File(path) => load_file_layer(path),
            Self::Environment(vars) => environment_layer(vars),
            Self::Flags(layer) => Ok(layer.clone()),
        }
    }
}

/// Configuration resolution entry points
pub struct ConfigLoader;

impl ConfigLoader {
    /// Fold the given sources in order into one resolved configuration
    pub fn resolve(sources: &[ConfigSource]) -> ConfigResult<ReaperConfig> {
        let mut merged = ConfigLayer::default();
        for source in sources {
            debug!(source = source.name(), "Applying configuration source");
            merged = merged.merge(source.layer()?);
        }
        Ok(merged.into_config())
    }

    /// The standard precedence chain: defaults, file, environment, flags
    ///
    /// The file is taken from `config_file` or, failing that, from the
    /// `REAPER_CONFIG` environment variable. No file is read when neither is set.
    pub fn standard_sources(config_file: Option<PathBuf>, flags: ConfigLayer) -> Vec<ConfigSource> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let file = config_file.or_else(|| {
            vars.get(env::CONFIG_FILE)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        });

        let mut sources = vec![ConfigSource::Defaults];
        if let Some(path) = file {
            sources.push(ConfigSource::File(path));
        }
        sources.push(ConfigSource::Environment(vars));
        sources.push(ConfigSource::Flags(flags));
        sources
    }
}

fn load_file_layer(path: &Path) -> ConfigResult<ConfigLayer> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

    settings
        .try_deserialize::<ConfigLayer>()
        .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
}

/// Build a layer from environment variables. Empty values count as unset.
fn environment_layer(vars: &HashMap<String, String>) -> ConfigResult<ConfigLayer> {
    let get = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();

    Ok(ConfigLayer {
        cluster: ClusterLayer::default(),
        ci: CiLayer {
            url: get(env::CONCOURSE_URL),
            username: get(env::CONCOURSE_USER),
            password: get(env::CONCOURSE_PASSWORD),
            worker_prefix: get(env::WORKER_PREFIX),
            auth_timeout_ms: None,
        },
        volumes: VolumeLayer {
            enabled: get(env::VOLUME_CLEANUP)
                .map(|v| parse_bool(env::VOLUME_CLEANUP, &v))
                .transpose()?,
            prefix: get(env::VOLUME_PREFIX),
            deletable_state: get(env::VOLUME_DELETABLE_STATE),
            min_retention_secs: get(env::VOLUME_MIN_RETENTION_SECS)
                .map(|v| parse_number(env::VOLUME_MIN_RETENTION_SECS, &v))
                .transpose()?,
            team_tag_key: None,
            worker_tag_key: None,
        },
        cloud: CloudLayer {
            auth_url: get(env::OS_AUTH_URL),
            application_credential_id: get(env::OS_APPLICATION_CREDENTIAL_ID),
            application_credential_secret: get(env::OS_APPLICATION_CREDENTIAL_SECRET),
            region: get(env::OS_REGION_NAME),
            auth_timeout_ms: None,
        },
        logging: LoggingLayer {
            format: get(env::LOG_FORMAT)
                .map(|v| LogFormat::from_str(&v))
                .transpose()?,
        },
        run: RunLayer {
            delete_concurrency: get(env::DELETE_CONCURRENCY)
                .map(|v| parse_number(env::DELETE_CONCURRENCY, &v))
                .transpose()?,
        },
    })
}

/// Boolean parsing with the vocabulary operators already use in shell
/// environments: 1/t/true and 0/f/false in the usual casings.
pub fn parse_bool(field: &str, value: &str) -> ConfigResult<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(ConfigurationError::invalid_value(
            field,
            value,
            "expected a boolean (true/false/1/0)",
        )),
    }
}

fn parse_number<T: FromStr>(field: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ConfigurationError::invalid_value(field, value, e.to_string()))
}

/// Mask credential-bearing fields before the configuration reaches a log line
pub(super) fn sanitize_for_logging(config: &ReaperConfig) -> serde_json::Value {
    let mut value = serde_json::json!(config);
    let sensitive_patterns = ["password", "secret", "token"];
    sanitize_json_recursive(&mut value, &sensitive_patterns);
    value
}

fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_sensitive = sensitive_patterns
                    .iter()
                    .any(|pattern| key_lower.contains(pattern));

                if is_sensitive {
                    *val = mask(val);
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}

fn mask(value: &serde_json::Value) -> serde_json::Value {
    let masked = match value {
        serde_json::Value::String(s) if s.is_empty() => "[EMPTY]".to_string(),
        serde_json::Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            if chars.len() > 4 {
                let head: String = chars[..2].iter().collect();
                let tail: String = chars[chars.len() - 2..].iter().collect();
                format!("[MASKED: {head}***{tail}]")
            } else {
                "[MASKED: ***]".to_string()
            }
        }
        _ => "[MASKED]".to_string(),
    };
    serde_json::Value::String(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_only() {
        let config = ConfigLoader::resolve(&[ConfigSource::Defaults]).unwrap();
        assert_eq!(config, ReaperConfig::default());
    }

    #[test]
    fn test_flags_override_environment() {
        let mut flags = ConfigLayer::default();
        flags.ci.worker_prefix = Some("flag-".to_string());

        let sources = vec![
            ConfigSource::Defaults,
            ConfigSource::Environment(vars(&[
                ("WORKER_PREFIX", "env-"),
                ("CONCOURSE_URL", "https://ci.example.com"),
            ])),
            ConfigSource::Flags(flags),
        ];

        let config = ConfigLoader::resolve(&sources).unwrap();
        assert_eq!(config.ci.worker_prefix, "flag-");
        assert_eq!(config.ci.url, "https://ci.example.com");
    }

    #[test]
    fn test_environment_parses_typed_values() {
        let layer = environment_layer(&vars(&[
            ("VOLUME_CLEANUP", "True"),
            ("VOLUME_MIN_RETENTION_SECS", "7200"),
            ("REAPER_DELETE_CONCURRENCY", "4"),
            ("REAPER_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(layer.volumes.enabled, Some(true));
        assert_eq!(layer.volumes.min_retention_secs, Some(7200));
        assert_eq!(layer.run.delete_concurrency, Some(4));
        assert_eq!(layer.logging.format, Some(LogFormat::Json));
    }

    #[test]
    fn test_invalid_boolean_is_rejected() {
        let err = environment_layer(&vars(&[("VOLUME_CLEANUP", "yes")])).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { ref field, .. } if field == "VOLUME_CLEANUP"));
    }

    #[test]
    fn test_empty_environment_values_are_unset() {
        let layer = environment_layer(&vars(&[("VOLUME_CLEANUP", ""), ("WORKER_PREFIX", "")])).unwrap();
        assert_eq!(layer.volumes.enabled, None);
        assert_eq!(layer.ci.worker_prefix, None);
    }

    #[test]
    fn test_file_layer_sits_between_defaults_and_environment() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[ci]
url = "https://file.example.com"
worker_prefix = "file-"

[volumes]
enabled = true
min_retention_secs = 600
"#
        )
        .unwrap();

        let sources = vec![
            ConfigSource::Defaults,
            ConfigSource::File(file.path().to_path_buf()),
            ConfigSource::Environment(vars(&[("WORKER_PREFIX", "env-")])),
        ];

        let config = ConfigLoader::resolve(&sources).unwrap();
        assert_eq!(config.ci.url, "https://file.example.com");
        assert_eq!(config.ci.worker_prefix, "env-");
        assert!(config.volumes.enabled);
        assert_eq!(config.volumes.min_retention_secs, 600);
        assert_eq!(config.volumes.deletable_state, "available");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let sources = vec![ConfigSource::File(PathBuf::from(
            "/nonexistent/fleet-reaper.toml",
        ))];
        assert!(matches!(
            ConfigLoader::resolve(&sources),
            Err(ConfigurationError::FileReadError { .. })
        ));
    }

    #[test]
    fn test_parse_bool_vocabulary() {
        for v in ["1", "t", "T", "TRUE", "true", "True"] {
            assert!(parse_bool("x", v).unwrap());
        }
        for v in ["0", "f", "F", "FALSE", "false", "False"] {
            assert!(!parse_bool("x", v).unwrap());
        }
        assert!(parse_bool("x", "on").is_err());
    }
}
