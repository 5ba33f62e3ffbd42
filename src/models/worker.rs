use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A CI worker as reported by the CI service.
///
/// Identity is the name alone; by convention it equals the name of the
/// cluster node hosting the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub state: WorkerState,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

impl Worker {
    pub fn new(name: impl Into<String>, state: WorkerState) -> Self {
        Self {
            name: name.into(),
            state,
            platform: None,
            team: None,
        }
    }
}

/// Worker lifecycle states reported by the CI service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkerState {
    Running,
    Stalled,
    Landing,
    Landed,
    Retiring,
    /// Any state this reconciler does not recognise; never reapable
    Other(String),
}

impl WorkerState {
    /// Terminal-but-undeleted states a worker can be pruned from
    pub fn is_reapable(&self) -> bool {
        matches!(self, Self::Stalled | Self::Landed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stalled => write!(f, "stalled"),
            Self::Landing => write!(f, "landing"),
            Self::Landed => write!(f, "landed"),
            Self::Retiring => write!(f, "retiring"),
            Self::Other(state) => write!(f, "{state}"),
        }
    }
}

impl FromStr for WorkerState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "running" => Self::Running,
            "stalled" => Self::Stalled,
            "landing" => Self::Landing,
            "landed" => Self::Landed,
            "retiring" => Self::Retiring,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<String> for WorkerState {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }
}

impl From<WorkerState> for String {
    fn from(state: WorkerState) -> Self {
        state.to_string()
    }
}
