use chrono::Duration;
use proptest::prelude::*;
use std::collections::HashMap;

use fleet_reaper::{Volume, VolumeStatus, WorkerState};

use super::builders::now;

/// Every state the CI service reports, plus an unrecognised one
pub fn worker_state_strategy() -> impl Strategy<Value = WorkerState> {
    prop_oneof![
        Just(WorkerState::Running),
        Just(WorkerState::Stalled),
        Just(WorkerState::Landing),
        Just(WorkerState::Landed),
        Just(WorkerState::Retiring),
        "[a-z]{3,8}".prop_map(|s| s.parse::<WorkerState>().unwrap()),
    ]
}

pub fn volume_status_strategy() -> impl Strategy<Value = VolumeStatus> {
    prop_oneof![
        3 => Just(VolumeStatus::Available),
        1 => Just(VolumeStatus::InUse),
        1 => Just(VolumeStatus::Creating),
        1 => Just(VolumeStatus::Error),
        1 => Just(VolumeStatus::Other("Available".to_string())),
    ]
}

/// Names that sometimes carry the `ci-` prefix
pub fn resource_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "ci-[a-z0-9]{1,8}",
        "[a-z]{1,3}-[a-z0-9]{1,8}",
        "CI-[a-z0-9]{1,8}",
    ]
}

/// Volume ages clustered around the one hour retention boundary
pub fn age_secs_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![0i64..7_200, 3_590i64..3_610, Just(3_600i64)]
}

/// Raw ingredients of a volume; the owner tag may be absent
#[derive(Debug, Clone)]
pub struct VolumeCase {
    pub name: String,
    pub status: VolumeStatus,
    pub team: Option<String>,
    pub owner: Option<String>,
    pub age_secs: i64,
}

impl VolumeCase {
    pub fn build(&self) -> Volume {
        let mut metadata = HashMap::new();
        if let Some(team) = &self.team {
            metadata.insert("concourse-team".to_string(), team.clone());
        }
        if let Some(owner) = &self.owner {
            metadata.insert("concourse-worker".to_string(), owner.clone());
        }
        Volume {
            id: format!("id-{}", self.name),
            name: self.name.clone(),
            status: self.status.clone(),
            created_at: now() - Duration::seconds(self.age_secs),
            metadata,
            project_id: None,
        }
    }
}

pub fn volume_case_strategy() -> impl Strategy<Value = VolumeCase> {
    (
        resource_name_strategy(),
        volume_status_strategy(),
        prop::option::of(prop_oneof![Just(String::new()), "[a-z]{1,6}"]),
        prop::option::of(prop_oneof![Just("ci-live".to_string()), "ci-[a-z]{1,6}"]),
        age_secs_strategy(),
    )
        .prop_map(|(name, status, team, owner, age_secs)| VolumeCase {
            name,
            status,
            team,
            owner,
            age_secs,
        })
}
