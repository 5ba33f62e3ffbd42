//! # Volume Reaper
//!
//! Deletes block-storage volumes that were provisioned for CI workers whose
//! nodes have left the cluster.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::report::{AbortStage, ReapReport, ReaperOutcome, ResourceKind, ResourceRef};
use super::{execute_deletions, Decision, KeepReason};
use crate::config::VolumeCleanupConfig;
use crate::logging::log_error;
use crate::membership::MembershipSnapshot;
use crate::models::Volume;
use crate::services::VolumeService;
use crate::shutdown::ShutdownSignal;

/// Eligibility knobs for volumes
#[derive(Debug, Clone, PartialEq)]
pub struct VolumePolicy {
    /// Empty matches every name
    pub prefix: String,
    pub deletable_state: String,
    pub min_retention: chrono::Duration,
    pub team_tag_key: String,
    pub worker_tag_key: String,
}

impl From<&VolumeCleanupConfig> for VolumePolicy {
    fn from(config: &VolumeCleanupConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            deletable_state: config.deletable_state.clone(),
            min_retention: config.min_retention(),
            team_tag_key: config.team_tag_key.clone(),
            worker_tag_key: config.worker_tag_key.clone(),
        }
    }
}

impl Default for VolumePolicy {
    fn default() -> Self {
        Self::from(&VolumeCleanupConfig::default())
    }
}

/// Eligibility predicate for a single volume.
///
/// Clauses, all required: ownership prefix, exact deletable status, non-empty
/// team tag, older than the retention window, worker tag present, owning
/// worker not live.
pub fn volume_decision(
    volume: &Volume,
    policy: &VolumePolicy,
    snapshot: &MembershipSnapshot,
    now: DateTime<Utc>,
) -> Decision {
    if !volume.name.starts_with(&policy.prefix) {
        return Decision::Keep(KeepReason::PrefixMismatch {
            prefix: policy.prefix.clone(),
        });
    }
    if !volume.status.matches(&policy.deletable_state) {
        return Decision::Keep(KeepReason::StatusNotDeletable {
            status: volume.status.to_string(),
        });
    }
    if volume.tag(&policy.team_tag_key).is_none() {
        return Decision::Keep(KeepReason::MissingTeamTag {
            key: policy.team_tag_key.clone(),
        });
    }
    let age = volume.age(now);
    if age <= policy.min_retention {
        return Decision::Keep(KeepReason::TooYoung {
            age_secs: age.num_seconds(),
        });
    }
    let Some(owner) = volume.metadata.get(&policy.worker_tag_key) else {
        return Decision::Keep(KeepReason::MissingWorkerTag {
            key: policy.worker_tag_key.clone(),
        });
    };
    if snapshot.is_live(owner) {
        return Decision::Keep(KeepReason::OwnerLive {
            node: owner.to_string(),
        });
    }
    Decision::Delete
}

/// Lists volumes in one project and deletes the orphaned ones
pub struct VolumeReaper {
    service: Arc<dyn VolumeService>,
    policy: VolumePolicy,
    concurrency: usize,
    shutdown: ShutdownSignal,
}

impl VolumeReaper {
    pub fn new(service: Arc<dyn VolumeService>, policy: VolumePolicy) -> Self {
        Self {
            service,
            policy,
            concurrency: 1,
            shutdown: ShutdownSignal::never(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn evaluate(
        &self,
        volume: &Volume,
        snapshot: &MembershipSnapshot,
        now: DateTime<Utc>,
    ) -> Decision {
        volume_decision(volume, &self.policy, snapshot, now)
    }

    /// One reconciliation pass over the volumes of `scope_id`
    pub async fn reap(
        &self,
        scope_id: &str,
        snapshot: &MembershipSnapshot,
        now: DateTime<Utc>,
    ) -> ReaperOutcome {
        let volumes = match self.service.list_volumes(scope_id).await {
            Ok(volumes) => volumes,
            Err(e) => {
                log_error("volume_reaper", "list_volumes", &e.to_string(), Some(scope_id));
                return ReaperOutcome::Aborted {
                    stage: AbortStage::List,
                    error: e.to_string(),
                };
            }
        };

        let mut report = ReapReport::new(ResourceKind::Volume);
        let mut candidates = Vec::new();

        for volume in &volumes {
            if volume.project_id.as_deref().is_some_and(|p| p != scope_id) {
                warn!(volume = %volume.id, project = ?volume.project_id, "Listing returned a volume from another project");
            }

            let resource = ResourceRef::with_id(&volume.name, &volume.id);
            match self.evaluate(volume, snapshot, now) {
                Decision::Delete => {
                    debug!(volume = %resource, status = %volume.status, "Volume is orphaned");
                    candidates.push(resource.clone());
                }
                Decision::Keep(reason) => {
                    debug!(volume = %resource, reason = %reason, "Keeping volume");
                }
            }
            report.examined.push(resource);
        }

        info!(
            scope = %scope_id,
            examined = report.examined.len(),
            orphaned = candidates.len(),
            "Deleting orphaned volumes"
        );

        let service = self.service.clone();
        execute_deletions(
            &mut report,
            candidates,
            self.concurrency,
            &self.shutdown,
            move |volume| {
                let service = service.clone();
                async move {
                    let id = volume.id.unwrap_or_default();
                    service.delete_volume(&id).await
                }
            },
        )
        .await;

        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Volume cleanup finished"
        );

        ReaperOutcome::Completed(report)
    }
}
