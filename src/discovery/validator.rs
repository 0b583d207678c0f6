//! Registration-time check that a group is manageable
//!
//! The group's configuration is symmetric, so one reachable member is enough.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::pool::SqlExecutor;

use super::endpoint::DataSourceEndpoint;
use super::error::{ConfigError, ProbeErrorKind};
use super::probe::{MemberSnapshot, NodeProbe};

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate `group_name` against the first reachable non-disabled endpoint
    pub async fn validate(
        executor: &dyn SqlExecutor,
        group_name: &str,
        endpoints: &[DataSourceEndpoint],
        disabled: &BTreeSet<String>,
    ) -> Result<(), ConfigError> {
        let mut last_unreachable = None;

        for endpoint in endpoints.iter().filter(|e| !disabled.contains(e.id())) {
            match NodeProbe::snapshot(executor, endpoint).await {
                Ok(snapshot) => {
                    Self::check(group_name, &snapshot)?;
                    info!(
                        group_name = %group_name,
                        node = %endpoint.id(),
                        members = snapshot.member_count,
                        "MGR configuration validated"
                    );
                    return Ok(());
                }
                Err(e) if e.kind() == ProbeErrorKind::Unreachable => {
                    debug!(node = %endpoint.id(), error = %e, "Skipping unreachable data source");
                    last_unreachable = Some(e);
                }
                Err(e) => return Err(ConfigError::Probe(e)),
            }
        }

        match last_unreachable {
            Some(last) => Err(ConfigError::Unreachable {
                group: group_name.to_string(),
                last,
            }),
            None => Err(ConfigError::NoEndpoints {
                group: group_name.to_string(),
            }),
        }
    }

    /// Apply the MGR checks to one member's snapshot
    pub fn check(group_name: &str, snapshot: &MemberSnapshot) -> Result<(), ConfigError> {
        let node = snapshot.node_id.clone();
        if !snapshot.plugin_active {
            return Err(ConfigError::PluginInactive { node });
        }
        if snapshot.member_count < 1 {
            return Err(ConfigError::NoMembers {
                node,
                count: snapshot.member_count,
            });
        }
        if snapshot.group_name != group_name {
            return Err(ConfigError::GroupNameMismatch {
                node,
                expected: group_name.to_string(),
                actual: snapshot.group_name.clone(),
            });
        }
        if !snapshot.single_primary {
            return Err(ConfigError::NotSinglePrimary { node });
        }
        Ok(())
    }
}
