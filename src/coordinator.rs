//! # Run Coordinator
//!
//! Sequences a single reconciliation pass:
//!
//! 1. Capture the membership snapshot (fatal on failure)
//! 2. Run the worker reaper unconditionally
//! 3. When volume cleanup is enabled, authenticate to the cloud (fatal on
//!    failure), resolve the project scope and run the volume reaper
//!
//! The two reapers are not coupled: either may abort while the other
//! completes, and the run still finishes normally.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ConfigurationError, ReaperConfig};
use crate::error::{ReaperError, ReaperResult};
use crate::logging::log_error;
use crate::membership::MembershipSnapshot;
use crate::reaper::{
    AbortStage, ReaperOutcome, RunReport, VolumePolicy, VolumeReaper, WorkerReaper,
};
use crate::services::{CloudIdentity, NodeSource, WorkerServiceConnector};
use crate::shutdown::ShutdownSignal;

/// Source of "now" for retention checks
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Drives one reconciliation run over injected collaborators
pub struct RunCoordinator {
    config: ReaperConfig,
    nodes: Arc<dyn NodeSource>,
    ci: Arc<dyn WorkerServiceConnector>,
    cloud: Option<Arc<dyn CloudIdentity>>,
    shutdown: ShutdownSignal,
    clock: Clock,
}

impl std::fmt::Debug for RunCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCoordinator")
            .field("node_source", &self.nodes.source_name())
            .field("volume_cleanup", &self.config.volumes.enabled)
            .field("cloud", &self.cloud.is_some())
            .finish()
    }
}

impl RunCoordinator {
    pub fn new(
        config: ReaperConfig,
        nodes: Arc<dyn NodeSource>,
        ci: Arc<dyn WorkerServiceConnector>,
    ) -> Self {
        Self {
            config,
            nodes,
            ci,
            cloud: None,
            shutdown: ShutdownSignal::never(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Required when volume cleanup is enabled
    pub fn with_cloud(mut self, cloud: Arc<dyn CloudIdentity>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Execute the reconciliation sequence once.
    ///
    /// Returns `Err` only for fatal conditions: membership capture failure,
    /// cloud authentication failure, or volume cleanup enabled without a cloud
    /// identity. Every other failure is reported inside the [`RunReport`].
    pub async fn run(&self) -> ReaperResult<RunReport> {
        let run_id = Uuid::new_v4();
        self.run_with_id(run_id).await
    }

    #[instrument(name = "reconcile_run", skip_all, fields(run_id = %run_id))]
    async fn run_with_id(&self, run_id: Uuid) -> ReaperResult<RunReport> {
        let started_at = Utc::now();
        info!(
            volume_cleanup = self.config.volumes.enabled,
            "RECONCILE: Starting reconciliation run"
        );

        let snapshot = match MembershipSnapshot::capture(self.nodes.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "RECONCILE: Membership snapshot failed, no deletions attempted");
                return Err(e);
            }
        };

        if self.shutdown.is_requested() {
            warn!("RECONCILE: Shutdown requested after membership capture, ending run");
            let aborted = || ReaperOutcome::Aborted {
                stage: AbortStage::Shutdown,
                error: ReaperError::shutdown("after membership capture").to_string(),
            };
            let volumes = if self.config.volumes.enabled {
                aborted()
            } else {
                ReaperOutcome::Disabled
            };
            return Ok(self.finish(run_id, started_at, &snapshot, aborted(), volumes));
        }

        let workers = self.reap_workers(&snapshot).await;
        report_outcome("workers", &workers);

        let volumes = if !self.config.volumes.enabled {
            info!("RECONCILE: Volume cleanup disabled");
            ReaperOutcome::Disabled
        } else if self.shutdown.is_requested() {
            warn!("RECONCILE: Shutdown requested, skipping volume cleanup");
            ReaperOutcome::Aborted {
                stage: AbortStage::Shutdown,
                error: ReaperError::shutdown("before volume cleanup").to_string(),
            }
        } else {
            let outcome = self.reap_volumes(&snapshot).await?;
            report_outcome("volumes", &outcome);
            outcome
        };

        Ok(self.finish(run_id, started_at, &snapshot, workers, volumes))
    }

    async fn reap_workers(&self, snapshot: &MembershipSnapshot) -> ReaperOutcome {
        let service = match self.ci.connect().await {
            Ok(service) => service,
            Err(e) => {
                log_error("worker_reaper", "connect", &e.to_string(), Some(&self.config.ci.url));
                return ReaperOutcome::Aborted {
                    stage: AbortStage::Connect,
                    error: e.to_string(),
                };
            }
        };

        WorkerReaper::new(service, self.config.ci.worker_prefix.clone())
            .with_concurrency(self.config.run.delete_concurrency)
            .with_shutdown(self.shutdown.clone())
            .reap(snapshot)
            .await
    }

    async fn reap_volumes(&self, snapshot: &MembershipSnapshot) -> ReaperResult<ReaperOutcome> {
        let cloud = self.cloud.as_ref().ok_or_else(|| {
            ConfigurationError::missing_required_field(
                "cloud",
                "--os-auth-url and application credentials",
            )
        })?;

        let session = match cloud.authenticate().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "RECONCILE: Cloud authentication failed, volume cleanup not attempted");
                return Err(e);
            }
        };

        let scope = match cloud.resolve_scope(&session).await {
            Ok(scope) => scope,
            Err(e) => {
                log_error("volume_reaper", "resolve_scope", &e.to_string(), None);
                return Ok(ReaperOutcome::Aborted {
                    stage: AbortStage::ResolveScope,
                    error: e.to_string(),
                });
            }
        };

        let service = match cloud.volume_service(&session) {
            Ok(service) => service,
            Err(e) => {
                log_error("volume_reaper", "connect", &e.to_string(), Some(&scope));
                return Ok(ReaperOutcome::Aborted {
                    stage: AbortStage::Connect,
                    error: e.to_string(),
                });
            }
        };

        let now = (self.clock)();
        Ok(VolumeReaper::new(service, VolumePolicy::from(&self.config.volumes))
            .with_concurrency(self.config.run.delete_concurrency)
            .with_shutdown(self.shutdown.clone())
            .reap(&scope, snapshot, now)
            .await)
    }

    fn finish(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        snapshot: &MembershipSnapshot,
        workers: ReaperOutcome,
        volumes: ReaperOutcome,
    ) -> RunReport {
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            live_nodes: snapshot.len(),
            workers,
            volumes,
        };

        info!(
            total_deleted = report.total_deleted(),
            duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "RECONCILE: Run finished"
        );
        report
    }
}

fn report_outcome(reaper: &str, outcome: &ReaperOutcome) {
    match outcome {
        ReaperOutcome::Completed(report) => info!(
            reaper,
            examined = report.examined.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "RECONCILE: Reaper completed"
        ),
        ReaperOutcome::Aborted { stage, error } => warn!(
            reaper,
            stage = %stage,
            error = %error,
            "RECONCILE: Reaper aborted"
        ),
        ReaperOutcome::Disabled => info!(reaper, "RECONCILE: Reaper disabled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Worker, WorkerState};
    use crate::services::WorkerService;
    use async_trait::async_trait;

    struct StaticNodes(Result<Vec<String>, String>);

    #[async_trait]
    impl NodeSource for StaticNodes {
        fn source_name(&self) -> &'static str {
            "static"
        }

        async fn list_live_nodes(&self) -> ReaperResult<Vec<String>> {
            self.0.clone().map_err(ReaperError::membership)
        }
    }

    struct OneWorker;

    #[async_trait]
    impl WorkerService for OneWorker {
        async fn list_workers(&self) -> ReaperResult<Vec<Worker>> {
            Ok(vec![Worker::new("ci-gone", WorkerState::Stalled)])
        }

        async fn prune_worker(&self, _name: &str) -> ReaperResult<()> {
            Ok(())
        }
    }

    struct Connector(bool);

    #[async_trait]
    impl WorkerServiceConnector for Connector {
        async fn connect(&self) -> ReaperResult<Arc<dyn WorkerService>> {
            if self.0 {
                Ok(Arc::new(OneWorker))
            } else {
                Err(ReaperError::authentication("concourse", "401"))
            }
        }
    }

    fn config() -> ReaperConfig {
        let mut config = ReaperConfig::default();
        config.ci.worker_prefix = "ci-".to_string();
        config
    }

    #[tokio::test]
    async fn test_membership_failure_is_fatal() {
        let coordinator = RunCoordinator::new(
            config(),
            Arc::new(StaticNodes(Err("api down".to_string()))),
            Arc::new(Connector(true)),
        );
        let err = coordinator.run().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_ci_connect_failure_aborts_worker_reaper_only() {
        let coordinator = RunCoordinator::new(
            config(),
            Arc::new(StaticNodes(Ok(vec![]))),
            Arc::new(Connector(false)),
        );
        let report = coordinator.run().await.unwrap();
        assert!(matches!(
            report.workers,
            ReaperOutcome::Aborted {
                stage: AbortStage::Connect,
                ..
            }
        ));
        assert_eq!(report.volumes, ReaperOutcome::Disabled);
    }

    #[tokio::test]
    async fn test_volume_cleanup_without_cloud_identity_is_a_configuration_error() {
        let mut config = config();
        config.volumes.enabled = true;
        let coordinator = RunCoordinator::new(
            config,
            Arc::new(StaticNodes(Ok(vec![]))),
            Arc::new(Connector(true)),
        );
        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, ReaperError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_shutdown_before_reaping_deletes_nothing() {
        let (trigger, signal) = ShutdownSignal::channel();
        trigger.trigger();
        let coordinator = RunCoordinator::new(
            config(),
            Arc::new(StaticNodes(Ok(vec![]))),
            Arc::new(Connector(true)),
        )
        .with_shutdown(signal);

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.total_deleted(), 0);
        assert!(report.workers.is_aborted());
    }
}
