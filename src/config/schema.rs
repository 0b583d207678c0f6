use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use serde::Deserialize;

use crate::discovery::{
    ConnectOptions, DataSourceEndpoint, EndpointError, GroupConfig, NodeAddress, ResolverConfig,
    DEFAULT_KEEP_ALIVE_CRON,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Replication groups to monitor
    #[serde(default)]
    pub groups: Vec<GroupSection>,
}

// ============================================================================
// Monitor Configuration
// ============================================================================

/// Probe fan-out limits shared by every group
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Timeout for each member probe (milliseconds)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Bound on one whole resolution (milliseconds)
    #[serde(default = "default_tick_deadline_ms")]
    pub tick_deadline_ms: u64,
    /// Probes in flight at once per group
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    /// Timeout for establishing a backend connection (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_tick_deadline_ms() -> u64 {
    5000
}

fn default_max_concurrent_probes() -> usize {
    8
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            tick_deadline_ms: default_tick_deadline_ms(),
            max_concurrent_probes: default_max_concurrent_probes(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl From<&MonitorConfig> for ResolverConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            tick_deadline: Duration::from_millis(config.tick_deadline_ms),
            max_concurrent_probes: config.max_concurrent_probes,
        }
    }
}

// ============================================================================
// Coordination Configuration
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinationConfig {
    /// Prefix of every persisted path
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Coordination cluster address, recorded with each group
    #[serde(default)]
    pub server_lists: String,
    /// Identity used for leadership; random when unset
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Leadership lease, renewed by every tick of the leader
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
}

fn default_namespace() -> String {
    "mgr-elasticjob".to_string()
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            server_lists: String::new(),
            instance_id: None,
            lease_ttl_ms: default_lease_ttl_ms(),
        }
    }
}

impl CoordinationConfig {
    /// Configured instance id, or a fresh one unique to this process
    pub fn instance_id(&self) -> String {
        self.instance_id.clone().unwrap_or_else(|| {
            format!(
                "athena-discovery@-@{}-{:08x}",
                std::process::id(),
                rand::random::<u32>()
            )
        })
    }
}

// ============================================================================
// Metrics Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Address of the Prometheus endpoint; no server when unset
    #[serde(default)]
    pub listen_addr: Option<String>,
}

// ============================================================================
// Group / DataSource Configuration
// ============================================================================

/// One monitored replication group
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSection {
    /// Logical name used in logs (e.g. the proxied schema)
    pub name: String,
    /// `group_replication_group_name` every member must report
    pub group_name: String,
    #[serde(default = "default_keep_alive_cron")]
    pub keep_alive_cron: String,
    /// Data source ids taken out of rotation
    #[serde(default)]
    pub disabled: Vec<String>,
    pub data_sources: Vec<DataSourceConfig>,
}

fn default_keep_alive_cron() -> String {
    DEFAULT_KEEP_ALIVE_CRON.to_string()
}

/// A member of the group, given either as host/port or as a JDBC URL
#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceConfig {
    pub id: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `jdbc:mysql://host:port/db?...`, overrides host and port
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    /// `host:port` the group reports for this member, when it differs from
    /// the address we connect to
    #[serde(default)]
    pub report_address: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

impl DataSourceConfig {
    pub fn to_endpoint(&self) -> Result<DataSourceEndpoint, EndpointError> {
        let endpoint = match &self.url {
            Some(url) => DataSourceEndpoint::from_url(&self.id, url, &self.user, &self.password),
            None => Ok(DataSourceEndpoint::new(
                self.id.clone(),
                ConnectOptions {
                    host: self.host.clone(),
                    port: self.port,
                    user: self.user.clone(),
                    password: self.password.clone(),
                    database: self.database.clone(),
                },
            )),
        }?;

        match &self.report_address {
            Some(addr) => {
                let advertised = NodeAddress::parse(addr).ok_or_else(|| EndpointError {
                    url: addr.clone(),
                    reason: "report_address must be host:port",
                })?;
                Ok(endpoint.with_advertised(advertised))
            }
            None => Ok(endpoint),
        }
    }
}

impl GroupSection {
    pub fn to_group_config(&self, server_lists: &str) -> GroupConfig {
        GroupConfig {
            group_name: self.group_name.clone(),
            keep_alive_cron: self.keep_alive_cron.clone(),
            zk_server_lists: server_lists.to_string(),
            disabled: self.disabled.iter().cloned().collect::<BTreeSet<_>>(),
        }
    }

    pub fn endpoints(&self) -> Result<Vec<DataSourceEndpoint>, EndpointError> {
        self.data_sources.iter().map(DataSourceConfig::to_endpoint).collect()
    }
}

impl Config {
    /// Structural checks that do not need a database
    pub fn validate(&self) -> Result<(), super::ConfigLoadError> {
        self.check().map_err(super::ConfigLoadError::Invalid)
    }

    fn check(&self) -> Result<(), String> {
        let mut group_names = HashSet::new();
        for group in &self.groups {
            if !group_names.insert(group.group_name.as_str()) {
                return Err(format!("group_name `{}` configured twice", group.group_name));
            }
            if group.data_sources.is_empty() {
                return Err(format!("group `{}` has no data sources", group.name));
            }
            let mut ids = HashSet::new();
            for ds in &group.data_sources {
                if !ids.insert(ds.id.as_str()) {
                    return Err(format!("group `{}`: data source `{}` configured twice", group.name, ds.id));
                }
            }
            if let Some(unknown) = group.disabled.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(format!("group `{}`: disabled data source `{}` is not configured", group.name, unknown));
            }
        }
        if self.monitor.max_concurrent_probes == 0 {
            return Err("monitor.max_concurrent_probes must be at least 1".to_string());
        }
        if self.coordination.lease_ttl_ms == 0 {
            return Err("coordination.lease_ttl_ms must be positive".to_string());
        }
        Ok(())
    }
}
