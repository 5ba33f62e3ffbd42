//! Fixture builders shared by the integration tests

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use fleet_reaper::{Clock, ReaperConfig, Volume, VolumeStatus, Worker, WorkerState};

/// Fixed reference time so retention checks are deterministic
pub fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn fixed_clock() -> Clock {
    Arc::new(now)
}

pub fn worker(name: &str, state: WorkerState) -> Worker {
    Worker::new(name, state)
}

/// An `available` volume created `age` before [`now`], tagged with a team
/// and an owning worker
pub fn volume(name: &str, age: Duration, owner: &str) -> Volume {
    Volume {
        id: format!("id-{name}"),
        name: name.to_string(),
        status: VolumeStatus::Available,
        created_at: now() - age,
        metadata: HashMap::from([
            ("concourse-team".to_string(), "ci".to_string()),
            ("concourse-worker".to_string(), owner.to_string()),
        ]),
        project_id: Some("project-1".to_string()),
    }
}

/// CI credentials present, `ci-` worker prefix, volume cleanup off
pub fn base_config() -> ReaperConfig {
    let mut config = ReaperConfig::default();
    config.ci.url = "https://ci.example.com".to_string();
    config.ci.username = "reaper".to_string();
    config.ci.password = "hunter2".to_string();
    config.ci.worker_prefix = "ci-".to_string();
    config
}

/// [`base_config`] plus volume cleanup with the `vol-` prefix
pub fn volume_config() -> ReaperConfig {
    let mut config = base_config();
    config.volumes.enabled = true;
    config.volumes.prefix = "vol-".to_string();
    config.cloud.auth_url = "https://keystone.example.com/v3".to_string();
    config.cloud.application_credential_id = "app-id".to_string();
    config.cloud.application_credential_secret = "app-secret".to_string();
    config
}
