//! # Worker Reaper
//!
//! Prunes CI workers that are stalled or landed, owned by this reconciler
//! (name prefix) and no longer backed by a live cluster node.

use std::sync::Arc;
use tracing::{debug, info};

use super::report::{AbortStage, ReapReport, ReaperOutcome, ResourceKind, ResourceRef};
use super::{execute_deletions, Decision, KeepReason};
use crate::logging::log_error;
use crate::membership::MembershipSnapshot;
use crate::models::Worker;
use crate::services::WorkerService;
use crate::shutdown::ShutdownSignal;

/// Eligibility predicate for a single worker.
///
/// Clauses, all required: reapable state, ownership prefix, owning node not
/// live. An empty prefix matches every name.
pub fn worker_decision(worker: &Worker, prefix: &str, snapshot: &MembershipSnapshot) -> Decision {
    if !worker.state.is_reapable() {
        return Decision::Keep(KeepReason::StateNotReapable {
            state: worker.state.to_string(),
        });
    }
    if !worker.name.starts_with(prefix) {
        return Decision::Keep(KeepReason::PrefixMismatch {
            prefix: prefix.to_string(),
        });
    }
    if snapshot.is_live(&worker.name) {
        return Decision::Keep(KeepReason::OwnerLive {
            node: worker.name.clone(),
        });
    }
    Decision::Delete
}

/// Lists workers and prunes the stale ones
pub struct WorkerReaper {
    service: Arc<dyn WorkerService>,
    prefix: String,
    concurrency: usize,
    shutdown: ShutdownSignal,
}

impl WorkerReaper {
    pub fn new(service: Arc<dyn WorkerService>, prefix: impl Into<String>) -> Self {
        Self {
            service,
            prefix: prefix.into(),
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

    pub fn evaluate(&self, worker: &Worker, snapshot: &MembershipSnapshot) -> Decision {
        worker_decision(worker, &self.prefix, snapshot)
    }

    /// One reconciliation pass over the current worker listing
    pub async fn reap(&self, snapshot: &MembershipSnapshot) -> ReaperOutcome {
        let workers = match self.service.list_workers().await {
            Ok(workers) => workers,
            Err(e) => {
                log_error("worker_reaper", "list_workers", &e.to_string(), None);
                return ReaperOutcome::Aborted {
                    stage: AbortStage::List,
                    error: e.to_string(),
                };
            }
        };

        let mut report = ReapReport::new(ResourceKind::Worker);
        let mut candidates = Vec::new();

        for worker in &workers {
            let resource = ResourceRef::named(&worker.name);
            match self.evaluate(worker, snapshot) {
                Decision::Delete => {
                    debug!(worker = %worker.name, state = %worker.state, "Worker is stale");
                    candidates.push(resource.clone());
                }
                Decision::Keep(reason) => {
                    debug!(worker = %worker.name, reason = %reason, "Keeping worker");
                }
            }
            report.examined.push(resource);
        }

        info!(
            examined = report.examined.len(),
            stale = candidates.len(),
            "Pruning stale workers"
        );

        let service = self.service.clone();
        execute_deletions(
            &mut report,
            candidates,
            self.concurrency,
            &self.shutdown,
            move |worker| {
                let service = service.clone();
                async move { service.prune_worker(&worker.name).await }
            },
        )
        .await;

        info!(
            pruned = report.deleted.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Worker cleanup finished"
        );

        ReaperOutcome::Completed(report)
    }
}
