//! # Reapers
//!
//! A reaper lists one resource type, applies its eligibility predicate to every
//! listed resource and deletes the eligible subset. Predicates are pure and
//! conjunctive: a resource is deleted only when every clause holds. Deletions
//! are attempted independently; one failure never stops the others.

pub mod report;
pub mod volume_reaper;
pub mod worker_reaper;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::pin;
use tracing::warn;

use crate::error::ReaperResult;
use crate::logging::{log_error, log_reap_operation};
use crate::shutdown::ShutdownSignal;

pub use report::{
    AbortStage, DeletionFailure, ReapReport, ReaperOutcome, ResourceKind, ResourceRef, RunReport,
};
pub use volume_reaper::{volume_decision, VolumePolicy, VolumeReaper};
pub use worker_reaper::{worker_decision, WorkerReaper};

/// Verdict of an eligibility predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Decision {
    Delete,
    Keep(KeepReason),
}

impl Decision {
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// First clause of a predicate that did not hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepReason {
    StateNotReapable { state: String },
    PrefixMismatch { prefix: String },
    StatusNotDeletable { status: String },
    MissingTeamTag { key: String },
    TooYoung { age_secs: i64 },
    MissingWorkerTag { key: String },
    OwnerLive { node: String },
}

impl fmt::Display for KeepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateNotReapable { state } => write!(f, "state '{state}' is not reapable"),
            Self::PrefixMismatch { prefix } => write!(f, "name lacks prefix '{prefix}'"),
            Self::StatusNotDeletable { status } => write!(f, "status '{status}' is not deletable"),
            Self::MissingTeamTag { key } => write!(f, "metadata tag '{key}' missing or empty"),
            Self::TooYoung { age_secs } => write!(f, "only {age_secs}s old"),
            Self::MissingWorkerTag { key } => write!(f, "metadata tag '{key}' missing"),
            Self::OwnerLive { node } => write!(f, "owner '{node}' is a live node"),
        }
    }
}

/// Attempt every deletion, at most `concurrency` at a time, and record each
/// result in `report` independently of the others.
///
/// Shutdown is checked right before a deletion starts; anything not yet
/// started once it fires is recorded as skipped.
pub(crate) async fn execute_deletions<F, Fut>(
    report: &mut ReapReport,
    candidates: Vec<ResourceRef>,
    concurrency: usize,
    shutdown: &ShutdownSignal,
    delete: F,
) where
    F: Fn(ResourceRef) -> Fut,
    Fut: Future<Output = ReaperResult<()>>,
{
    let kind = report.resource;
    let operation = match kind {
        ResourceKind::Worker => "prune",
        ResourceKind::Volume => "delete",
    };

    let outcomes = stream::iter(candidates)
        .map(|candidate| {
            let attempt = if shutdown.is_requested() {
                None
            } else {
                Some(delete(candidate.clone()))
            };
            async move {
                match attempt {
                    Some(fut) => {
                        let result = fut.await;
                        (candidate, Some(result))
                    }
                    None => (candidate, None),
                }
            }
        })
        .buffer_unordered(concurrency.max(1));
    let mut outcomes = pin!(outcomes);

    // Each outcome is logged as soon as it completes
    while let Some((resource, result)) = outcomes.next().await {
        let resource_label = kind.to_string();
        match result {
            Some(Ok(())) => {
                log_reap_operation(
                    &resource_label,
                    operation,
                    &resource.name,
                    resource.id.as_deref(),
                    "deleted",
                    None,
                );
                report.deleted.push(resource);
            }
            Some(Err(e)) => {
                let context = resource.to_string();
                log_error(&resource_label, operation, &e.to_string(), Some(&context));
                report.failed.push(DeletionFailure {
                    resource,
                    error: e.to_string(),
                });
            }
            None => {
                warn!(
                    resource = %kind,
                    name = %resource.name,
                    "Shutdown requested, skipping deletion"
                );
                report.skipped.push(resource);
            }
        }
    }
}
