//! Node probe: diagnostic queries against one MGR member
//!
//! Reads the introspection views of Group Replication:
//! 1. `information_schema.PLUGINS` for the plugin status
//! 2. `replication_group_members` for the member count
//! 3. `group_replication_group_name`
//! 4. `group_replication_single_primary_mode`
//!
//! plus the primary member's address, which is also what each resolution tick asks.

use tracing::debug;

use crate::pool::SqlExecutor;
use crate::protocol::Row;

use super::endpoint::{DataSourceEndpoint, NodeAddress};
use super::error::ProbeError;

pub const PLUGIN_STATUS: &str =
    "SELECT * FROM information_schema.PLUGINS WHERE PLUGIN_NAME='group_replication'";

pub const MEMBER_COUNT: &str = "SELECT count(*) FROM performance_schema.replication_group_members";

pub const GROUP_NAME: &str = "SELECT * FROM performance_schema.global_variables WHERE VARIABLE_NAME='group_replication_group_name'";

pub const SINGLE_PRIMARY: &str = "SELECT * FROM performance_schema.global_variables WHERE VARIABLE_NAME='group_replication_single_primary_mode'";

pub const PRIMARY_MEMBER: &str = "SELECT MEMBER_HOST, MEMBER_PORT FROM performance_schema.replication_group_members WHERE MEMBER_ID = \
     (SELECT VARIABLE_VALUE FROM performance_schema.global_status WHERE VARIABLE_NAME = 'group_replication_primary_member')";

pub const MEMBER_STATES: &str =
    "SELECT MEMBER_HOST, MEMBER_PORT, MEMBER_STATE FROM performance_schema.replication_group_members";

/// What one member reports about the group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub node_id: String,
    pub plugin_active: bool,
    pub member_count: u64,
    pub group_name: String,
    pub single_primary: bool,
    /// Primary named by this member's metadata, when it could be read
    pub primary: Option<NodeAddress>,
}

/// One row of the membership view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberState {
    pub address: NodeAddress,
    pub state: String,
}

impl MemberState {
    pub fn is_online(&self) -> bool {
        self.state.eq_ignore_ascii_case("ONLINE")
    }
}

/// Stateless prober for a single data source
pub struct NodeProbe;

impl NodeProbe {
    /// Run the four diagnostic queries and read the primary member
    pub async fn snapshot(
        executor: &dyn SqlExecutor,
        endpoint: &DataSourceEndpoint,
    ) -> Result<MemberSnapshot, ProbeError> {
        let plugin_active = Self::plugin_active(executor, endpoint).await?;
        let member_count = Self::member_count(executor, endpoint).await?;
        let group_name = Self::variable(executor, endpoint, GROUP_NAME).await?;
        let single_primary = is_on(&Self::variable(executor, endpoint, SINGLE_PRIMARY).await?);

        let primary = match Self::primary_member(executor, endpoint).await {
            Ok(primary) => primary,
            Err(e) => {
                debug!(node = %endpoint.id(), error = %e, "Primary member not readable");
                None
            }
        };

        Ok(MemberSnapshot {
            node_id: endpoint.id().to_string(),
            plugin_active,
            member_count,
            group_name,
            single_primary,
            primary,
        })
    }

    /// Address of the member this node's metadata names as primary
    ///
    /// `Ok(None)` means the node answered but knows no primary (e.g. it is
    /// recovering or has been expelled).
    pub async fn primary_member(
        executor: &dyn SqlExecutor,
        endpoint: &DataSourceEndpoint,
    ) -> Result<Option<NodeAddress>, ProbeError> {
        let rows = executor.query(endpoint, PRIMARY_MEMBER).await?;
        match rows.first() {
            Some(row) => member_address(endpoint, row),
            None => Ok(None),
        }
    }

    /// All members with their replication state, as seen by this node
    pub async fn member_states(
        executor: &dyn SqlExecutor,
        endpoint: &DataSourceEndpoint,
    ) -> Result<Vec<MemberState>, ProbeError> {
        let rows = executor.query(endpoint, MEMBER_STATES).await?;
        let mut states = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(address) = member_address(endpoint, row)? else {
                continue;
            };
            let state = row.get_by_name("MEMBER_STATE").unwrap_or_default().to_string();
            states.push(MemberState { address, state });
        }
        Ok(states)
    }

    async fn plugin_active(
        executor: &dyn SqlExecutor,
        endpoint: &DataSourceEndpoint,
    ) -> Result<bool, ProbeError> {
        let rows = executor.query(endpoint, PLUGIN_STATUS).await?;
        let row = rows.first().ok_or_else(|| {
            ProbeError::malformed(endpoint.id(), "group_replication plugin is not installed")
        })?;
        Ok(row
            .get_by_name("PLUGIN_STATUS")
            .is_some_and(|s| s.eq_ignore_ascii_case("ACTIVE")))
    }

    async fn member_count(
        executor: &dyn SqlExecutor,
        endpoint: &DataSourceEndpoint,
    ) -> Result<u64, ProbeError> {
        let rows = executor.query(endpoint, MEMBER_COUNT).await?;
        let raw = rows
            .first()
            .and_then(|r| r.get(0))
            .ok_or_else(|| ProbeError::malformed(endpoint.id(), "member count returned no value"))?;
        raw.trim().parse().map_err(|_| {
            ProbeError::malformed(endpoint.id(), format!("member count `{}` is not a number", raw))
        })
    }

    async fn variable(
        executor: &dyn SqlExecutor,
        endpoint: &DataSourceEndpoint,
        sql: &str,
    ) -> Result<String, ProbeError> {
        let rows = executor.query(endpoint, sql).await?;
        rows.first()
            .and_then(|r| r.get_by_name("VARIABLE_VALUE"))
            .map(str::to_string)
            .ok_or_else(|| ProbeError::malformed(endpoint.id(), "global variable not found"))
    }
}

fn is_on(value: &str) -> bool {
    value.eq_ignore_ascii_case("ON") || value == "1"
}

fn member_address(endpoint: &DataSourceEndpoint, row: &Row) -> Result<Option<NodeAddress>, ProbeError> {
    let host = row.get_by_name("MEMBER_HOST").unwrap_or_default();
    let port = row.get_by_name("MEMBER_PORT").unwrap_or_default();
    if host.is_empty() {
        return Ok(None);
    }
    let port = port.trim().parse::<u16>().map_err(|_| {
        ProbeError::malformed(endpoint.id(), format!("MEMBER_PORT `{}` is not a port", port))
    })?;
    Ok(Some(NodeAddress::new(host, port)))
}
