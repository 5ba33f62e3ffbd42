//! # Membership Snapshot
//!
//! One-time, read-only capture of the live cluster node names. It is the only
//! liveness oracle used during a run; nodes that join or leave after capture
//! are invisible until the next run.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::info;

use crate::error::{ReaperError, ReaperResult};
use crate::services::NodeSource;

/// Immutable set of live node identifiers
#[derive(Debug, Clone)]
pub struct MembershipSnapshot {
    nodes: HashSet<String>,
    captured_at: DateTime<Utc>,
}

impl MembershipSnapshot {
    /// Query the node source exactly once. Any listing error is fatal for
    /// the run because no deletion decision is safe without membership.
    pub async fn capture(source: &dyn NodeSource) -> ReaperResult<Self> {
        let nodes = source
            .list_live_nodes()
            .await
            .map_err(|e| match e {
                ReaperError::Membership { .. } => e,
                other => ReaperError::membership(other.to_string()),
            })?;

        let snapshot = Self::from_nodes(nodes);
        info!(
            live_nodes = snapshot.len(),
            source = source.source_name(),
            "Captured membership snapshot"
        );
        Ok(snapshot)
    }

    pub fn from_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            captured_at: Utc::now(),
        }
    }

    /// True iff `node_name` exactly matches a captured node identifier
    pub fn is_live(&self, node_name: &str) -> bool {
        self.nodes.contains(node_name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}
