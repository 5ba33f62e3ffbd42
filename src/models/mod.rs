//! # Data Models
//!
//! Read-only views of the resources the reapers reconcile. Both are owned by
//! external systems; nothing here is persisted beyond a single run.

pub mod volume;
pub mod worker;

pub use volume::{Volume, VolumeStatus};
pub use worker::{Worker, WorkerState};
