//! Outcome reporting for reapers and whole runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Resource type a reaper reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Worker,
    Volume,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Worker => write!(f, "worker"),
            Self::Volume => write!(f, "volume"),
        }
    }
}

/// Identity of one reconciled resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ResourceRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Some(id.into()),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} ({})", self.name, id),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A deletion attempt that failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletionFailure {
    pub resource: ResourceRef,
    pub error: String,
}

/// What one reaper saw and did during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReapReport {
    pub resource: ResourceKind,
    /// Every resource in the listing, eligible or not
    pub examined: Vec<ResourceRef>,
    pub deleted: Vec<ResourceRef>,
    pub failed: Vec<DeletionFailure>,
    /// Eligible resources not attempted because shutdown was requested
    pub skipped: Vec<ResourceRef>,
}

impl ReapReport {
    pub fn new(resource: ResourceKind) -> Self {
        Self {
            resource,
            examined: Vec::new(),
            deleted: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn eligible_count(&self) -> usize {
        self.deleted.len() + self.failed.len() + self.skipped.len()
    }

    pub fn deleted_names(&self) -> Vec<&str> {
        self.deleted.iter().map(|r| r.name.as_str()).collect()
    }
}

/// Stage at which a reaper gave up before deleting anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortStage {
    Connect,
    ResolveScope,
    List,
    Shutdown,
}

impl fmt::Display for AbortStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::ResolveScope => write!(f, "resolve_scope"),
            Self::List => write!(f, "list"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Per-reaper outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReaperOutcome {
    Completed(ReapReport),
    Aborted { stage: AbortStage, error: String },
    Disabled,
}

impl ReaperOutcome {
    pub fn report(&self) -> Option<&ReapReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn deleted_count(&self) -> usize {
        self.report().map_or(0, |r| r.deleted.len())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub live_nodes: usize,
    pub workers: ReaperOutcome,
    pub volumes: ReaperOutcome,
}

impl RunReport {
    pub fn total_deleted(&self) -> usize {
        self.workers.deleted_count() + self.volumes.deleted_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_with_tag() {
        let mut report = ReapReport::new(ResourceKind::Volume);
        report.deleted.push(ResourceRef::with_id("vol-1", "abc"));

        let json = serde_json::to_value(ReaperOutcome::Completed(report)).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["resource"], "volume");
        assert_eq!(json["deleted"][0]["id"], "abc");

        let json = serde_json::to_value(ReaperOutcome::Aborted {
            stage: AbortStage::ResolveScope,
            error: "no project".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "aborted");
        assert_eq!(json["stage"], "resolve_scope");
    }

    #[test]
    fn test_counts() {
        let mut report = ReapReport::new(ResourceKind::Worker);
        report.deleted.push(ResourceRef::named("w-1"));
        report.failed.push(DeletionFailure {
            resource: ResourceRef::named("w-2"),
            error: "boom".to_string(),
        });
        report.skipped.push(ResourceRef::named("w-3"));

        assert_eq!(report.eligible_count(), 3);
        assert_eq!(report.deleted_names(), vec!["w-1"]);
        assert_eq!(ReaperOutcome::Completed(report).deleted_count(), 1);
        assert_eq!(ReaperOutcome::Disabled.deleted_count(), 0);
        assert_eq!(ResourceRef::with_id("vol", "id-1").to_string(), "vol (id-1)");
    }
}
