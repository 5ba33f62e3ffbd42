//! # System Constants
//!
//! Defaults and wire-level names that define the ownership boundaries of the
//! reconciler. Configuration may override the defaults; the wire names are
//! fixed by the external APIs.

/// Defaults applied when no configuration source supplies a value
pub mod defaults {
    /// Only volumes in this status are ever deleted
    pub const VOLUME_DELETABLE_STATE: &str = "available";
    /// Volumes younger than this may still be provisioning or attaching
    pub const VOLUME_MIN_RETENTION_SECS: u64 = 60 * 60;
    pub const TEAM_TAG_KEY: &str = "concourse-team";
    pub const WORKER_TAG_KEY: &str = "concourse-worker";

    pub const AUTH_TIMEOUT_MS: u64 = 2_000;
    pub const DELETE_CONCURRENCY: usize = 1;
}

/// Environment variable names recognised by configuration resolution
pub mod env {
    pub const CONFIG_FILE: &str = "REAPER_CONFIG";
    pub const CONCOURSE_URL: &str = "CONCOURSE_URL";
    pub const CONCOURSE_USER: &str = "CONCOURSE_USER";
    pub const CONCOURSE_PASSWORD: &str = "CONCOURSE_PASSWORD";
    pub const WORKER_PREFIX: &str = "WORKER_PREFIX";
    pub const VOLUME_CLEANUP: &str = "VOLUME_CLEANUP";
    pub const VOLUME_PREFIX: &str = "VOLUME_PREFIX";
    pub const VOLUME_DELETABLE_STATE: &str = "VOLUME_DELETABLE_STATE";
    pub const VOLUME_MIN_RETENTION_SECS: &str = "VOLUME_MIN_RETENTION_SECS";
    pub const OS_AUTH_URL: &str = "OS_AUTH_URL";
    pub const OS_APPLICATION_CREDENTIAL_ID: &str = "OS_APPLICATION_CREDENTIAL_ID";
    pub const OS_APPLICATION_CREDENTIAL_SECRET: &str = "OS_APPLICATION_CREDENTIAL_SECRET";
    pub const OS_REGION_NAME: &str = "OS_REGION_NAME";
    pub const DELETE_CONCURRENCY: &str = "REAPER_DELETE_CONCURRENCY";
    pub const LOG_FORMAT: &str = "REAPER_LOG_FORMAT";

    pub const KUBECONFIG: &str = "KUBECONFIG";
    pub const KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";
    pub const KUBERNETES_SERVICE_PORT: &str = "KUBERNETES_SERVICE_PORT";
}

/// Concourse API wire constants
pub mod concourse {
    pub const SERVICE: &str = "concourse";
    pub const TOKEN_PATH: &str = "sky/token";
    /// Public client credentials shipped with the `fly` CLI
    pub const CLIENT_ID: &str = "fly";
    pub const CLIENT_SECRET: &str = "Zmx5";
    pub const SCOPES: &str = "openid profile email federated:id groups";
}

/// OpenStack API wire constants
pub mod openstack {
    pub const IDENTITY_SERVICE: &str = "keystone";
    pub const STORAGE_SERVICE: &str = "cinder";
    pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
    pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
    /// Catalog types accepted for the block-storage endpoint, in preference order
    pub const BLOCK_STORAGE_TYPES: &[&str] = &["block-storage", "volumev3"];
    pub const PUBLIC_INTERFACE: &str = "public";
}

/// Kubernetes API wire constants
pub mod kubernetes {
    pub const SERVICE: &str = "kubernetes";
    pub const NODES_PATH: &str = "/api/v1/nodes";
    pub const NODE_PAGE_LIMIT: u32 = 500;
    pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
    pub const SERVICE_ACCOUNT_TOKEN_FILE: &str = "token";
    pub const SERVICE_ACCOUNT_CA_FILE: &str = "ca.crt";
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
}
