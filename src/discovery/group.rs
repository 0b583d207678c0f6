//! Per-group monitoring configuration

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Default probe cadence: every 5 seconds (Quartz-style, seconds first)
pub const DEFAULT_KEEP_ALIVE_CRON: &str = "0/5 * * * * ?";

/// Monitoring configuration of one replication group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    /// MGR group name (`group_replication_group_name`), also the group id
    pub group_name: String,
    /// Probe cadence
    #[serde(default = "default_keep_alive_cron")]
    pub keep_alive_cron: String,
    /// Coordination store address, as configured for the surrounding proxy
    #[serde(default)]
    pub zk_server_lists: String,
    /// Data sources taken out of rotation by an operator
    #[serde(default)]
    pub disabled: BTreeSet<String>,
}

fn default_keep_alive_cron() -> String {
    DEFAULT_KEEP_ALIVE_CRON.to_string()
}

impl GroupConfig {
    pub fn new(group_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            keep_alive_cron: default_keep_alive_cron(),
            zk_server_lists: String::new(),
            disabled: BTreeSet::new(),
        }
    }

    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.keep_alive_cron = cron.into();
        self
    }

    pub fn with_disabled<I, S>(mut self, disabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = disabled.into_iter().map(Into::into).collect();
        self
    }
}
