//! Error taxonomy of the discovery core
//!
//! - `ProbeError`: per node, routine. Folded into resolution as "no vote".
//! - `ConfigError`: per group, raised only at registration.
//! - `ResolutionError`: per tick, transient. Recorded, never thrown to the scheduler.

use super::endpoint::NodeAddress;

/// Classification of a failed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorKind {
    Unreachable,
    MalformedResponse,
    PermissionDenied,
}

impl ProbeErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::MalformedResponse => "malformed_response",
            Self::PermissionDenied => "permission_denied",
        }
    }
}

/// Failure to probe a single data source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("Data source {node} unreachable: {reason}")]
    Unreachable { node: String, reason: String },
    #[error("Malformed response from {node}: {reason}")]
    MalformedResponse { node: String, reason: String },
    #[error("Permission denied on {node}: {reason}")]
    PermissionDenied { node: String, reason: String },
}

impl ProbeError {
    pub fn unreachable(node: &str, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed(node: &str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    pub fn permission_denied(node: &str, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            Self::Unreachable { .. } => ProbeErrorKind::Unreachable,
            Self::MalformedResponse { .. } => ProbeErrorKind::MalformedResponse,
            Self::PermissionDenied { .. } => ProbeErrorKind::PermissionDenied,
        }
    }

    pub fn node(&self) -> &str {
        match self {
            Self::Unreachable { node, .. }
            | Self::MalformedResponse { node, .. }
            | Self::PermissionDenied { node, .. } => node,
        }
    }
}

/// Group misconfiguration detected at registration time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Group {group} has no data sources to validate")]
    NoEndpoints { group: String },
    #[error("No data source of group {group} is reachable: {last}")]
    Unreachable { group: String, last: ProbeError },
    #[error("Validation probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("MGR plugin is not active on {node}")]
    PluginInactive { node: String },
    #[error("MGR member count is {count} on {node}, expected at least 1")]
    NoMembers { node: String, count: u64 },
    #[error("group_replication_group_name is `{actual}` on {node}, expected `{expected}`")]
    GroupNameMismatch {
        node: String,
        expected: String,
        actual: String,
    },
    #[error("MGR is not in single primary mode on {node}")]
    NotSinglePrimary { node: String },
}

/// Per-tick failure to determine the primary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("No data source of group {group} responded")]
    NoReachableNode { group: String },
    #[error("Group {group} has no primary among its configured data sources (reported: {reported:?})")]
    NoQuorum {
        group: String,
        reported: Option<NodeAddress>,
    },
    #[error("Data sources of group {group} disagree on the primary: {candidates:?}")]
    AmbiguousPrimary {
        group: String,
        candidates: Vec<NodeAddress>,
    },
}

impl ResolutionError {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoReachableNode { .. } => "no_reachable_node",
            Self::NoQuorum { .. } => "no_quorum",
            Self::AmbiguousPrimary { .. } => "ambiguous_primary",
        }
    }
}

/// Rejected topology mutation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("Data source {node} is not configured in group {group}")]
    UnknownNode { group: String, node: String },
    #[error("Data source {node} of group {group} is disabled")]
    DisabledNode { group: String, node: String },
}
