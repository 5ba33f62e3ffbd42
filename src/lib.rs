#![allow(clippy::doc_markdown)] // Allow technical terms like OpenStack, Kubernetes in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fleet Reaper
//!
//! Periodic fleet-hygiene reconciler for CI infrastructure.
//!
//! ## Overview
//!
//! CI workers run on Kubernetes nodes and provision block-storage volumes in
//! an OpenStack project. When nodes disappear, the CI control plane keeps
//! stalled worker registrations and the cloud keeps their volumes. One run of
//! this crate captures the live node set once, prunes stale Concourse workers
//! and optionally deletes orphaned volumes.
//!
//! ## Module Organization
//!
//! - [`config`] - Ordered configuration resolution and validation
//! - [`membership`] - Immutable snapshot of live cluster nodes
//! - [`reaper`] - Eligibility predicates and the two reapers
//! - [`coordinator`] - Run sequencing and outcome aggregation
//! - [`services`] - Trait seams and HTTP adapters for external systems
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured console logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleet_reaper::config::{ConfigLayer, ConfigLoader};
//! use fleet_reaper::services::{ConcourseConnector, KubeAccess, KubeNodeSource};
//! use fleet_reaper::services::kubernetes::KubeEnvironment;
//! use fleet_reaper::RunCoordinator;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sources = ConfigLoader::standard_sources(None, ConfigLayer::default());
//! let config = ConfigLoader::resolve(&sources)?;
//! config.validate()?;
//!
//! let access = KubeAccess::resolve(&config.cluster, &KubeEnvironment::from_process())?;
//! let nodes = Arc::new(KubeNodeSource::new(&access)?);
//! let ci = Arc::new(ConcourseConnector::new((&config.ci).into()));
//!
//! let report = RunCoordinator::new(config, nodes, ci).run().await?;
//! println!("deleted {} resources", report.total_deleted());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod membership;
pub mod models;
pub mod reaper;
pub mod services;
pub mod shutdown;

pub use config::{ConfigurationError, ReaperConfig};
pub use coordinator::{Clock, RunCoordinator};
pub use error::{ReaperError, ReaperResult};
pub use membership::MembershipSnapshot;
pub use models::{Volume, VolumeStatus, Worker, WorkerState};
pub use reaper::{
    volume_decision, worker_decision, Decision, KeepReason, ReapReport, ReaperOutcome, RunReport,
};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
