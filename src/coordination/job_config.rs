//! Records persisted per monitor job
//!
//! `/<jobName>/config` holds the scheduler-facing job record, whose YAML layout
//! is shared with other consumers of the registry and must not drift.
//! `/<jobName>/discovery` holds the monitor-owned part of the group config.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::discovery::GroupConfig;

use super::error::CoordinationError;

const JOB_NAME_PREFIX: &str = "MGR-";

pub fn job_name(group_id: &str) -> String {
    format!("{}{}", JOB_NAME_PREFIX, group_id)
}

pub fn config_path(job_name: &str) -> String {
    format!("/{}/config", job_name)
}

pub fn discovery_path(job_name: &str) -> String {
    format!("/{}/discovery", job_name)
}

pub fn leader_path(job_name: &str) -> String {
    format!("/{}/leader/election/instance", job_name)
}

/// Scheduler job record; fields serialize in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfiguration {
    pub cron: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub failover: bool,
    pub job_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_parameter: Option<String>,
    #[serde(default = "default_max_time_diff_seconds")]
    pub max_time_diff_seconds: i32,
    #[serde(default)]
    pub misfire: bool,
    #[serde(default)]
    pub monitor_execution: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub reconcile_interval_minutes: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharding_item_parameters: Option<String>,
    #[serde(default = "default_sharding_total_count")]
    pub sharding_total_count: u32,
    #[serde(default)]
    pub static_sharding: bool,
}

fn default_max_time_diff_seconds() -> i32 {
    -1
}

fn default_sharding_total_count() -> u32 {
    1
}

impl JobConfiguration {
    /// Record for the monitor job of `group_id`
    pub fn for_group(group_id: &str, cron: &str) -> Self {
        Self {
            cron: cron.to_string(),
            description: None,
            disabled: false,
            failover: false,
            job_name: job_name(group_id),
            job_parameter: None,
            max_time_diff_seconds: default_max_time_diff_seconds(),
            misfire: false,
            monitor_execution: false,
            overwrite: false,
            reconcile_interval_minutes: 0,
            sharding_item_parameters: None,
            sharding_total_count: default_sharding_total_count(),
            static_sharding: false,
        }
    }

    pub fn to_yaml(&self) -> Result<String, CoordinationError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CoordinationError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Monitor-owned part of a group's configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub group_name: String,
    #[serde(default)]
    pub zk_server_lists: String,
    #[serde(default)]
    pub disabled_nodes: BTreeSet<String>,
}

impl DiscoveryRecord {
    pub fn to_yaml(&self) -> Result<String, CoordinationError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CoordinationError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

impl From<&GroupConfig> for DiscoveryRecord {
    fn from(config: &GroupConfig) -> Self {
        Self {
            group_name: config.group_name.clone(),
            zk_server_lists: config.zk_server_lists.clone(),
            disabled_nodes: config.disabled.clone(),
        }
    }
}

/// Reassemble a group config from its two records
pub fn group_config(job: &JobConfiguration, record: Option<DiscoveryRecord>, group_id: &str) -> GroupConfig {
    let mut config = GroupConfig::new(group_id).with_cron(job.cron.clone());
    if let Some(record) = record {
        config.group_name = record.group_name;
        config.zk_server_lists = record.zk_server_lists;
        config.disabled = record.disabled_nodes;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP_NAME_YAML: &str = "cron: 0/5 * * * * ?\n\
        disabled: false\n\
        failover: false\n\
        jobName: MGR-group_name\n\
        maxTimeDiffSeconds: -1\n\
        misfire: false\n\
        monitorExecution: false\n\
        overwrite: false\n\
        reconcileIntervalMinutes: 0\n\
        shardingTotalCount: 1\n\
        staticSharding: false\n";

    #[test]
    fn test_default_record_layout() {
        let record = JobConfiguration::for_group("group_name", "0/5 * * * * ?");
        assert_eq!(record.to_yaml().unwrap(), GROUP_NAME_YAML);
    }

    #[test]
    fn test_optional_fields_keep_alphabetical_order() {
        let mut record = JobConfiguration::for_group("g", "0/5 * * * * ?");
        record.description = Some("mgr".into());
        record.job_parameter = Some("p".into());
        let yaml = record.to_yaml().unwrap();

        let keys: Vec<&str> = yaml.lines().filter_map(|l| l.split(':').next()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(yaml.contains("description: mgr\n"));
    }

    #[test]
    fn test_parse_round_trip() {
        let record = JobConfiguration::from_yaml(GROUP_NAME_YAML).unwrap();
        assert_eq!(record, JobConfiguration::for_group("group_name", "0/5 * * * * ?"));
    }

    #[test]
    fn test_parse_fills_defaults() {
        let record = JobConfiguration::from_yaml("cron: 0/10 * * * * ?\njobName: MGR-x\n").unwrap();
        assert_eq!(record.max_time_diff_seconds, -1);
        assert_eq!(record.sharding_total_count, 1);
        assert!(!record.overwrite);
    }

    #[test]
    fn test_paths() {
        let name = job_name("group_name");
        assert_eq!(name, "MGR-group_name");
        assert_eq!(config_path(&name), "/MGR-group_name/config");
        assert_eq!(leader_path(&name), "/MGR-group_name/leader/election/instance");
    }

    #[test]
    fn test_group_config_reassembly() {
        let config = GroupConfig::new("group_name")
            .with_cron("0/10 * * * * ?")
            .with_disabled(["ds_2"]);
        let job = JobConfiguration::for_group("group_name", &config.keep_alive_cron);
        let record = DiscoveryRecord::from(&config);
        let yaml = record.to_yaml().unwrap();

        let loaded = group_config(&job, Some(DiscoveryRecord::from_yaml(&yaml).unwrap()), "group_name");
        assert_eq!(loaded, config);
    }
}
