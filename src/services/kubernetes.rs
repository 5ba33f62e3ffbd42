//! # Kubernetes Node Source
//!
//! Resolves cluster access the way `kubectl` does and lists node names from
//! the core API. Lookup order:
//!
//! 1. Explicit kubeconfig path from configuration
//! 2. First existing file named by `KUBECONFIG`
//! 3. In-cluster service account (`KUBERNETES_SERVICE_HOST` / `_PORT`)
//! 4. `~/.kube/config`

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{header, Certificate, Client, Identity};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{api_error, NodeSource};
use crate::config::ClusterConfig;
use crate::constants::env;
use crate::constants::kubernetes::{
    CONNECT_TIMEOUT_SECS, NODE_PAGE_LIMIT, SERVICE, SERVICE_ACCOUNT_CA_FILE, SERVICE_ACCOUNT_DIR,
    SERVICE_ACCOUNT_TOKEN_FILE,
};
use crate::error::{ReaperError, ReaperResult};

/// Process facts that influence kubeconfig lookup
#[derive(Debug, Clone, Default)]
pub struct KubeEnvironment {
    pub kubeconfig: Option<String>,
    pub service_host: Option<String>,
    pub service_port: Option<String>,
    pub home: Option<PathBuf>,
    pub service_account_dir: PathBuf,
}

impl KubeEnvironment {
    pub fn from_process() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            kubeconfig: var(env::KUBECONFIG),
            service_host: var(env::KUBERNETES_SERVICE_HOST),
            service_port: var(env::KUBERNETES_SERVICE_PORT),
            home: var("HOME").map(PathBuf::from),
            service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
        }
    }
}

/// Credentials presented to the API server
#[derive(Clone, PartialEq, Eq)]
pub enum KubeAuth {
    Anonymous,
    Bearer(String),
    Basic { username: String, password: String },
    /// PEM client certificate followed by its private key
    ClientCertificate(Vec<u8>),
}

impl std::fmt::Debug for KubeAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::Bearer(_) => write!(f, "Bearer([MASKED])"),
            Self::Basic { username, .. } => write!(f, "Basic({username}, [MASKED])"),
            Self::ClientCertificate(_) => write!(f, "ClientCertificate"),
        }
    }
}

/// Resolved API server access
#[derive(Debug, Clone)]
pub struct KubeAccess {
    pub server: Url,
    pub auth: KubeAuth,
    /// PEM bundle trusted in addition to the system roots
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    /// Where the access came from, for log lines
    pub origin: String,
}

impl KubeAccess {
    /// Walk the lookup chain and load the first usable access
    pub fn resolve(cluster: &ClusterConfig, environment: &KubeEnvironment) -> ReaperResult<Self> {
        let context = cluster.context.as_deref();

        if let Some(path) = &cluster.kubeconfig {
            return Self::from_kubeconfig(path, context);
        }

        if let Some(list) = &environment.kubeconfig {
            let found = std::env::split_paths(list).find(|p| p.is_file());
            match found {
                Some(path) => return Self::from_kubeconfig(&path, context),
                None => debug!(kubeconfig = %list, "KUBECONFIG names no existing file"),
            }
        }

        if let (Some(host), Some(port)) = (&environment.service_host, &environment.service_port) {
            if context.is_some() {
                warn!("Kubeconfig context ignored for in-cluster access");
            }
            return Self::in_cluster(host, port, &environment.service_account_dir);
        }

        if let Some(home) = &environment.home {
            let path = home.join(".kube").join("config");
            if path.is_file() {
                return Self::from_kubeconfig(&path, context);
            }
        }

        Err(ReaperError::membership(
            "no cluster access found: pass --kubeconfig, set KUBECONFIG or run in-cluster",
        ))
    }

    /// Service account credentials mounted into the pod
    pub fn in_cluster(host: &str, port: &str, account_dir: &Path) -> ReaperResult<Self> {
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        let server = parse_server(&format!("https://{host}:{port}"))?;
        let token = read_file(&account_dir.join(SERVICE_ACCOUNT_TOKEN_FILE))?;
        let ca_pem = read_bytes(&account_dir.join(SERVICE_ACCOUNT_CA_FILE))?;

        Ok(Self {
            server,
            auth: KubeAuth::Bearer(token.trim().to_string()),
            ca_pem: Some(ca_pem),
            insecure_skip_tls_verify: false,
            origin: "in-cluster".to_string(),
        })
    }

    /// Load one kubeconfig file, honouring an optional context override
    pub fn from_kubeconfig(path: &Path, context: Option<&str>) -> ReaperResult<Self> {
        let raw = read_file(path)?;
        let kubeconfig: Kubeconfig = serde_yaml::from_str(&raw).map_err(|e| {
            ReaperError::membership(format!("invalid kubeconfig {}: {e}", path.display()))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        kubeconfig.access(context, base_dir, &path.display().to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<Named<ClusterEntry>>,
    #[serde(default)]
    contexts: Vec<Named<ContextEntry>>,
    #[serde(default)]
    users: Vec<Named<UserEntry>>,
    #[serde(default)]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named<T> {
    name: String,
    #[serde(alias = "cluster", alias = "context", alias = "user")]
    item: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<PathBuf>,
    #[serde(default)]
    client_certificate: Option<PathBuf>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<PathBuf>,
    #[serde(default)]
    client_key_data: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl Kubeconfig {
    fn access(&self, context: Option<&str>, base_dir: &Path, origin: &str) -> ReaperResult<KubeAccess> {
        let context_name = context
            .or(self.current_context.as_deref())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ReaperError::membership(format!("{origin}: no context selected and no current-context"))
            })?;

        let context = find(&self.contexts, context_name)
            .ok_or_else(|| ReaperError::membership(format!("{origin}: context '{context_name}' not found")))?;
        let cluster = find(&self.clusters, &context.cluster).ok_or_else(|| {
            ReaperError::membership(format!("{origin}: cluster '{}' not found", context.cluster))
        })?;

        let ca_pem = match (&cluster.certificate_authority_data, &cluster.certificate_authority) {
            (Some(data), _) => Some(decode_pem("certificate-authority-data", data)?),
            (None, Some(file)) => Some(read_bytes(&base_dir.join(file))?),
            (None, None) => None,
        };

        let auth = match context.user.as_deref().filter(|u| !u.is_empty()) {
            Some(user_name) => {
                let user = find(&self.users, user_name).ok_or_else(|| {
                    ReaperError::membership(format!("{origin}: user '{user_name}' not found"))
                })?;
                user.auth(base_dir)?
            }
            None => KubeAuth::Anonymous,
        };

        Ok(KubeAccess {
            server: parse_server(&cluster.server)?,
            auth,
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            origin: format!("{origin} (context {context_name})"),
        })
    }
}

impl UserEntry {
    fn auth(&self, base_dir: &Path) -> ReaperResult<KubeAuth> {
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(KubeAuth::Bearer(token.to_string()));
        }
        if let Some(file) = &self.token_file {
            let token = read_file(&base_dir.join(file))?;
            return Ok(KubeAuth::Bearer(token.trim().to_string()));
        }

        let certificate = match (&self.client_certificate_data, &self.client_certificate) {
            (Some(data), _) => Some(decode_pem("client-certificate-data", data)?),
            (None, Some(file)) => Some(read_bytes(&base_dir.join(file))?),
            (None, None) => None,
        };
        let key = match (&self.client_key_data, &self.client_key) {
            (Some(data), _) => Some(decode_pem("client-key-data", data)?),
            (None, Some(file)) => Some(read_bytes(&base_dir.join(file))?),
            (None, None) => None,
        };
        match (certificate, key) {
            (Some(mut pem), Some(key)) => {
                if !pem.ends_with(b"\n") {
                    pem.push(b'\n');
                }
                pem.extend_from_slice(&key);
                return Ok(KubeAuth::ClientCertificate(pem));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ReaperError::membership(
                    "client certificate and client key must be configured together",
                ));
            }
            (None, None) => {}
        }

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(KubeAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            });
        }

        // exec and auth-provider plugins are not supported
        Ok(KubeAuth::Anonymous)
    }
}

fn find<'a, T>(entries: &'a [Named<T>], name: &str) -> Option<&'a T> {
    entries.iter().find(|e| e.name == name).map(|e| &e.item)
}

fn decode_pem(field: &str, data: &str) -> ReaperResult<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| ReaperError::membership(format!("{field} is not valid base64: {e}")))
}

fn read_file(path: &Path) -> ReaperResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| ReaperError::membership(format!("cannot read {}: {e}", path.display())))
}

fn read_bytes(path: &Path) -> ReaperResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| ReaperError::membership(format!("cannot read {}: {e}", path.display())))
}

fn parse_server(raw: &str) -> ReaperResult<Url> {
    Url::parse(raw)
        .map_err(|e| ReaperError::membership(format!("invalid API server URL '{raw}': {e}")))
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<NodeItem>,
    #[serde(default)]
    metadata: ListMeta,
}

#[derive(Debug, Deserialize)]
struct NodeItem {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListMeta {
    #[serde(default, rename = "continue")]
    continue_token: Option<String>,
}

/// Lists node names from the Kubernetes core API
pub struct KubeNodeSource {
    client: Client,
    server: Url,
    basic: Option<(String, String)>,
    page_limit: u32,
}

impl std::fmt::Debug for KubeNodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNodeSource")
            .field("server", &self.server.as_str())
            .field("page_limit", &self.page_limit)
            .finish()
    }
}

impl KubeNodeSource {
    pub fn new(access: &KubeAccess) -> ReaperResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(format!("fleet-reaper/{}", env!("CARGO_PKG_VERSION")));

        if let Some(pem) = &access.ca_pem {
            for certificate in Certificate::from_pem_bundle(pem)
                .map_err(|e| ReaperError::membership(format!("invalid cluster CA: {e}")))?
            {
                builder = builder.add_root_certificate(certificate);
            }
        }
        if access.insecure_skip_tls_verify {
            warn!(server = %access.server, "TLS verification disabled for the API server");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let mut basic = None;
        match &access.auth {
            KubeAuth::Anonymous => {}
            KubeAuth::Bearer(token) => {
                let mut value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| ReaperError::membership(format!("unusable bearer token: {e}")))?;
                value.set_sensitive(true);
                let mut headers = header::HeaderMap::new();
                headers.insert(header::AUTHORIZATION, value);
                builder = builder.default_headers(headers);
            }
            KubeAuth::Basic { username, password } => {
                basic = Some((username.clone(), password.clone()));
            }
            KubeAuth::ClientCertificate(pem) => {
                let identity = Identity::from_pem(pem).map_err(|e| {
                    ReaperError::membership(format!("invalid client certificate: {e}"))
                })?;
                builder = builder.identity(identity);
            }
        }

        let client = builder
            .build()
            .map_err(|e| ReaperError::membership(format!("cannot build cluster client: {e}")))?;

        info!(origin = %access.origin, server = %access.server, "Resolved cluster access");

        Ok(Self {
            client,
            server: access.server.clone(),
            basic,
            page_limit: NODE_PAGE_LIMIT,
        })
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    fn nodes_url(&self, continue_token: Option<&str>) -> ReaperResult<Url> {
        let mut url = self.server.clone();
        url.path_segments_mut()
            .map_err(|_| ReaperError::membership("API server URL cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "v1", "nodes"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_limit.to_string());
            if let Some(token) = continue_token {
                query.append_pair("continue", token);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl NodeSource for KubeNodeSource {
    fn source_name(&self) -> &'static str {
        SERVICE
    }

    async fn list_live_nodes(&self) -> ReaperResult<Vec<String>> {
        let mut names = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let url = self.nodes_url(continue_token.as_deref())?;
            debug!("Listing nodes from: {}", url);

            let mut request = self.client.get(url);
            if let Some((username, password)) = &self.basic {
                request = request.basic_auth(username, Some(password));
            }

            let response = request
                .send()
                .await
                .map_err(|e| ReaperError::request(SERVICE, "list_nodes", e.to_string()))?;

            if !response.status().is_success() {
                return Err(api_error(SERVICE, "list_nodes", response).await);
            }

            let page: NodeList = response.json().await.map_err(|e| {
                ReaperError::invalid_response(SERVICE, "nodes", format!("failed to parse: {e}"))
            })?;

            names.extend(page.items.into_iter().map(|node| node.metadata.name));

            match page.metadata.continue_token.filter(|t| !t.is_empty()) {
                Some(token) if continue_token.as_deref() != Some(token.as_str()) => {
                    continue_token = Some(token);
                }
                _ => break,
            }
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: prod
clusters:
  - name: prod-cluster
    cluster:
      server: https://prod.example.com:6443
      certificate-authority-data: LS0tLS1CRUdJTg==
  - name: dev-cluster
    cluster:
      server: https://dev.example.com:6443
      insecure-skip-tls-verify: true
contexts:
  - name: prod
    context:
      cluster: prod-cluster
      user: reaper
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
users:
  - name: reaper
    user:
      token: prod-token
  - name: dev-user
    user:
      username: admin
      password: secret
"#;

    fn kubeconfig_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KUBECONFIG.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_current_context_is_used() {
        let file = kubeconfig_file();
        let access = KubeAccess::from_kubeconfig(file.path(), None).unwrap();
        assert_eq!(access.server.as_str(), "https://prod.example.com:6443/");
        assert_eq!(access.auth, KubeAuth::Bearer("prod-token".to_string()));
        assert_eq!(access.ca_pem.as_deref(), Some(b"-----BEGIN".as_slice()));
        assert!(!access.insecure_skip_tls_verify);
    }

    #[test]
    fn test_context_override() {
        let file = kubeconfig_file();
        let access = KubeAccess::from_kubeconfig(file.path(), Some("dev")).unwrap();
        assert_eq!(access.server.host_str(), Some("dev.example.com"));
        assert!(access.insecure_skip_tls_verify);
        assert!(matches!(access.auth, KubeAuth::Basic { ref username, .. } if username == "admin"));
    }

    #[test]
    fn test_unknown_context_is_membership_error() {
        let file = kubeconfig_file();
        let err = KubeAccess::from_kubeconfig(file.path(), Some("staging")).unwrap_err();
        assert!(matches!(err, ReaperError::Membership { .. }));
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_explicit_path_wins_over_environment() {
        let file = kubeconfig_file();
        let cluster = ClusterConfig {
            kubeconfig: Some(file.path().to_path_buf()),
            context: None,
        };
        let environment = KubeEnvironment {
            kubeconfig: Some("/does/not/exist".to_string()),
            service_host: Some("10.0.0.1".to_string()),
            service_port: Some("443".to_string()),
            ..KubeEnvironment::default()
        };
        let access = KubeAccess::resolve(&cluster, &environment).unwrap();
        assert_eq!(access.server.host_str(), Some("prod.example.com"));
    }

    #[test]
    fn test_in_cluster_access() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), "sa-token\n").unwrap();
        std::fs::write(dir.path().join("ca.crt"), "ca").unwrap();

        let environment = KubeEnvironment {
            kubeconfig: Some("/does/not/exist".to_string()),
            service_host: Some("10.0.0.1".to_string()),
            service_port: Some("443".to_string()),
            home: None,
            service_account_dir: dir.path().to_path_buf(),
        };
        let access = KubeAccess::resolve(&ClusterConfig::default(), &environment).unwrap();
        assert_eq!(access.server.as_str(), "https://10.0.0.1/");
        assert_eq!(access.auth, KubeAuth::Bearer("sa-token".to_string()));
        assert_eq!(access.origin, "in-cluster");
    }

    #[test]
    fn test_home_fallback_and_no_access() {
        let home = tempfile::tempdir().unwrap();
        let environment = KubeEnvironment {
            home: Some(home.path().to_path_buf()),
            ..KubeEnvironment::default()
        };
        let err = KubeAccess::resolve(&ClusterConfig::default(), &environment).unwrap_err();
        assert!(matches!(err, ReaperError::Membership { .. }));

        std::fs::create_dir_all(home.path().join(".kube")).unwrap();
        std::fs::write(home.path().join(".kube").join("config"), KUBECONFIG).unwrap();
        let access = KubeAccess::resolve(&ClusterConfig::default(), &environment).unwrap();
        assert_eq!(access.server.host_str(), Some("prod.example.com"));
    }

    #[test]
    fn test_nodes_url_carries_paging() {
        let access = KubeAccess {
            server: Url::parse("https://rancher.example.com/k8s/clusters/c-1").unwrap(),
            auth: KubeAuth::Anonymous,
            ca_pem: None,
            insecure_skip_tls_verify: false,
            origin: "test".to_string(),
        };
        let source = KubeNodeSource::new(&access).unwrap().with_page_limit(2);
        assert_eq!(
            source.nodes_url(None).unwrap().as_str(),
            "https://rancher.example.com/k8s/clusters/c-1/api/v1/nodes?limit=2"
        );
        assert_eq!(
            source.nodes_url(Some("abc")).unwrap().as_str(),
            "https://rancher.example.com/k8s/clusters/c-1/api/v1/nodes?limit=2&continue=abc"
        );
    }

    #[test]
    fn test_auth_debug_is_masked() {
        let auth = KubeAuth::Bearer("very-secret".to_string());
        assert!(!format!("{auth:?}").contains("very-secret"));
    }
}
