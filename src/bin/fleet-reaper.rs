//! # Fleet Reaper
//!
//! Runs one reconciliation pass and exits. Intended to be scheduled
//! periodically (cron, Kubernetes CronJob, CI timer).
//!
//! ## Usage
//!
//! ```bash
//! CONCOURSE_URL=https://ci.example.com CONCOURSE_USER=reaper \
//!   CONCOURSE_PASSWORD=... fleet-reaper --worker-prefix ci-worker-
//!
//! fleet-reaper --config reaper.toml --volume-cleanup -v
//! ```
//!
//! Exit status is 1 on configuration errors, membership failures and cloud
//! authentication failures, and 0 otherwise.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};

use fleet_reaper::config::loader::{CiLayer, CloudLayer, ClusterLayer, LoggingLayer, RunLayer, VolumeLayer};
use fleet_reaper::config::{ConfigLayer, ConfigLoader, LogFormat};
use fleet_reaper::logging::init_structured_logging;
use fleet_reaper::services::kubernetes::KubeEnvironment;
use fleet_reaper::services::openstack::KeystoneConfig;
use fleet_reaper::services::{ConcourseConnector, KeystoneIdentity, KubeAccess, KubeNodeSource};
use fleet_reaper::{ReaperConfig, RunCoordinator, RunReport, ShutdownSignal, ShutdownTrigger};

#[derive(Parser, Debug)]
#[command(name = "fleet-reaper")]
#[command(about = "Prune stale CI workers and orphaned volumes against live cluster membership")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (TOML or YAML); falls back to REAPER_CONFIG
    #[arg(long)]
    config: Option<PathBuf>,

    /// Kubeconfig file; otherwise KUBECONFIG, in-cluster, then ~/.kube/config
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of current-context
    #[arg(long)]
    context: Option<String>,

    /// Concourse base URL (CONCOURSE_URL)
    #[arg(long)]
    concourse_url: Option<String>,

    /// Concourse username (CONCOURSE_USER)
    #[arg(long)]
    concourse_user: Option<String>,

    /// Concourse password (CONCOURSE_PASSWORD)
    #[arg(long)]
    concourse_password: Option<String>,

    /// Name prefix of workers owned by this reconciler (WORKER_PREFIX)
    #[arg(long)]
    worker_prefix: Option<String>,

    /// Enable orphaned volume cleanup (VOLUME_CLEANUP)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    volume_cleanup: Option<bool>,

    /// Name prefix of volumes owned by this reconciler (VOLUME_PREFIX)
    #[arg(long)]
    volume_prefix: Option<String>,

    /// Only volumes in this status are deleted (VOLUME_DELETABLE_STATE)
    #[arg(long)]
    volume_deletable_state: Option<String>,

    /// Minimum volume age in seconds before deletion (VOLUME_MIN_RETENTION_SECS)
    #[arg(long)]
    volume_min_retention_secs: Option<u64>,

    /// Keystone v3 endpoint (OS_AUTH_URL)
    #[arg(long)]
    os_auth_url: Option<String>,

    /// Application credential id (OS_APPLICATION_CREDENTIAL_ID)
    #[arg(long)]
    os_application_credential_id: Option<String>,

    /// Application credential secret (OS_APPLICATION_CREDENTIAL_SECRET)
    #[arg(long)]
    os_application_credential_secret: Option<String>,

    /// Region used to pick the block-storage endpoint (OS_REGION_NAME)
    #[arg(long)]
    os_region_name: Option<String>,

    /// Maximum concurrent delete calls per reaper (REAPER_DELETE_CONCURRENCY)
    #[arg(long)]
    delete_concurrency: Option<usize>,

    /// Log format: text or json (REAPER_LOG_FORMAT)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn flag_layer(&self) -> ConfigLayer {
        ConfigLayer {
            cluster: ClusterLayer {
                kubeconfig: self.kubeconfig.clone(),
                context: self.context.clone(),
            },
            ci: CiLayer {
                url: self.concourse_url.clone(),
                username: self.concourse_user.clone(),
                password: self.concourse_password.clone(),
                worker_prefix: self.worker_prefix.clone(),
                auth_timeout_ms: None,
            },
            volumes: VolumeLayer {
                enabled: self.volume_cleanup,
                prefix: self.volume_prefix.clone(),
                deletable_state: self.volume_deletable_state.clone(),
                min_retention_secs: self.volume_min_retention_secs,
                team_tag_key: None,
                worker_tag_key: None,
            },
            cloud: CloudLayer {
                auth_url: self.os_auth_url.clone(),
                application_credential_id: self.os_application_credential_id.clone(),
                application_credential_secret: self.os_application_credential_secret.clone(),
                region: self.os_region_name.clone(),
                auth_timeout_ms: None,
            },
            logging: LoggingLayer {
                format: self.log_format,
            },
            run: RunLayer {
                delete_concurrency: self.delete_concurrency,
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let sources = ConfigLoader::standard_sources(cli.config.clone(), cli.flag_layer());
    let config = match ConfigLoader::resolve(&sources) {
        Ok(config) => config,
        Err(e) => {
            init_structured_logging(cli.log_format.unwrap_or_default(), cli.verbose);
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_structured_logging(config.logging.format, cli.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting fleet-reaper {}", env!("CARGO_PKG_VERSION"));
    debug!(config = %config.sanitized(), "Resolved configuration");

    let (trigger, shutdown) = ShutdownSignal::channel();
    tokio::spawn(watch_for_shutdown(trigger));

    match run(config, shutdown).await {
        Ok(report) => {
            match serde_json::to_string(&report) {
                Ok(summary) => info!(summary = %summary, "Reconciliation summary"),
                Err(e) => warn!("Failed to serialize run summary: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Reconciliation failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ReaperConfig, shutdown: ShutdownSignal) -> anyhow::Result<RunReport> {
    let access = KubeAccess::resolve(&config.cluster, &KubeEnvironment::from_process())
        .context("resolving cluster access")?;
    let nodes = Arc::new(KubeNodeSource::new(&access).context("building cluster client")?);
    let ci = Arc::new(ConcourseConnector::new((&config.ci).into()));

    let mut coordinator = RunCoordinator::new(config.clone(), nodes, ci).with_shutdown(shutdown);
    if config.volumes.enabled {
        let identity = KeystoneIdentity::new(KeystoneConfig::from(&config.cloud))
            .context("building cloud identity client")?;
        coordinator = coordinator.with_cloud(Arc::new(identity));
    }

    Ok(coordinator.run().await?)
}

/// Flip the shutdown flag on Ctrl+C or SIGTERM
async fn watch_for_shutdown(trigger: ShutdownTrigger) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C, finishing in-flight deletions"),
        _ = terminate => warn!("Received SIGTERM, finishing in-flight deletions"),
    }
    trigger.trigger();
}
