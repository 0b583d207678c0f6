//! Discovery manager implementation

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::{Config, ConfigLoadError};
use crate::coordination::{
    CoordinationBridge, CoordinationError, CoordinationStore, CronScheduler, JobHandle,
    MemoryStore, Scheduler,
};
use crate::discovery::{
    ConfigError, ConfigValidator, DataSourceEndpoint, EndpointError, GroupConfig, MonitorJob,
    ResolverConfig, TickOutcome, TopologyError, TopologyEvent, TopologySnapshot,
};
use crate::pool::{ExecutorConfig, MysqlExecutor, SqlExecutor};

/// Anything the manager's operations can fail with
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Unknown group {0}")]
    UnknownGroup(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    ConfigLoad(#[from] ConfigLoadError),
}

/// Manages all monitored groups
///
/// Provides:
/// - Registration with up-front validation of the MGR setup
/// - Primary and topology lookup by group name
/// - Change subscriptions for routing consumers
pub struct DiscoveryManager {
    executor: Arc<dyn SqlExecutor>,
    bridge: CoordinationBridge,
    resolver_config: ResolverConfig,
}

impl DiscoveryManager {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        store: Arc<dyn CoordinationStore>,
        scheduler: Arc<dyn Scheduler>,
        instance_id: impl Into<String>,
        resolver_config: ResolverConfig,
    ) -> Self {
        Self {
            executor,
            bridge: CoordinationBridge::new(store, scheduler, instance_id),
            resolver_config,
        }
    }

    /// Leadership lease of every group this manager registers
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.bridge = self.bridge.with_lease_ttl(ttl);
        self
    }

    /// Build from configuration and register every configured group
    ///
    /// Fails on the first group that cannot be registered.
    pub async fn from_config(config: &Config) -> Result<Self, DiscoveryError> {
        config.validate()?;

        let executor = Arc::new(MysqlExecutor::new(ExecutorConfig {
            connect_timeout: Duration::from_millis(config.monitor.connect_timeout_ms),
            ..ExecutorConfig::default()
        }));
        let store = Arc::new(MemoryStore::new(config.coordination.namespace.clone()));
        let manager = Self::new(
            executor,
            store,
            Arc::new(CronScheduler::new()),
            config.coordination.instance_id(),
            ResolverConfig::from(&config.monitor),
        )
        .with_lease_ttl(Duration::from_millis(config.coordination.lease_ttl_ms));

        for group in &config.groups {
            let group_config = group.to_group_config(&config.coordination.server_lists);
            let endpoints = group.endpoints()?;
            manager.register_group(group_config, endpoints).await?;
            info!(name = %group.name, group = %group.group_name, "Registered group");
        }

        Ok(manager)
    }

    /// Validate the group against its members, then start monitoring it
    ///
    /// Registering a group that is already monitored returns its handle
    /// without probing again.
    pub async fn register_group(
        &self,
        config: GroupConfig,
        endpoints: Vec<DataSourceEndpoint>,
    ) -> Result<JobHandle, DiscoveryError> {
        let group_id = config.group_name.clone();
        if let Some(handle) = self.bridge.handle(&group_id) {
            return Ok(handle);
        }

        ConfigValidator::validate(
            self.executor.as_ref(),
            &group_id,
            &endpoints,
            &config.disabled,
        )
        .await?;

        let executor = self.executor.clone();
        let resolver_config = self.resolver_config.clone();
        let job_config = config.clone();
        let handle = self
            .bridge
            .register(&group_id, &config, move || {
                Arc::new(MonitorJob::new(job_config, endpoints, executor, resolver_config))
            })
            .await?;
        Ok(handle)
    }

    /// Stop monitoring a group and discard its topology
    pub async fn deregister_group(&self, group_id: &str) -> Result<(), DiscoveryError> {
        let handle = self.handle(group_id)?;
        self.bridge.deregister(&handle).await?;
        for endpoint in handle.job().endpoints() {
            self.executor.evict(endpoint).await;
        }
        Ok(())
    }

    /// Change a group's probe cadence
    pub async fn reconfigure(&self, group_id: &str, cron: &str) -> Result<(), DiscoveryError> {
        self.bridge.reconfigure(group_id, cron).await?;
        Ok(())
    }

    /// Replace the set of data sources taken out of rotation
    pub async fn set_disabled<I, S>(&self, group_id: &str, disabled: I) -> Result<(), DiscoveryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handle = self.handle(group_id)?;
        let disabled: BTreeSet<String> = disabled.into_iter().map(Into::into).collect();
        let topology = handle.job().topology();
        if let Some(unknown) = disabled.iter().find(|id| !topology.is_configured(id)) {
            return Err(TopologyError::UnknownNode {
                group: group_id.to_string(),
                node: unknown.clone(),
            }
            .into());
        }
        self.bridge.set_disabled(group_id, disabled).await?;
        Ok(())
    }

    /// Resolve the primary of a group now, outside its schedule
    pub async fn refresh(&self, group_id: &str) -> Result<TickOutcome, DiscoveryError> {
        let handle = self.handle(group_id)?;
        let outcome = handle.job().on_tick().await;
        debug!(group = %group_id, outcome = ?outcome, "On-demand resolution");
        Ok(outcome)
    }

    /// Last resolved primary; None before the first resolution or for unknown groups
    pub fn current_primary(&self, group_id: &str) -> Option<String> {
        self.bridge
            .handle(group_id)
            .and_then(|h| h.job().topology().current_primary())
    }

    pub fn topology(&self, group_id: &str) -> Option<Arc<TopologySnapshot>> {
        self.bridge
            .handle(group_id)
            .map(|h| h.job().topology().snapshot())
    }

    pub fn subscribe(
        &self,
        group_id: &str,
    ) -> Result<broadcast::Receiver<TopologyEvent>, DiscoveryError> {
        Ok(self.handle(group_id)?.job().topology().subscribe())
    }

    /// Get list of all monitored group names
    pub fn group_ids(&self) -> Vec<String> {
        self.bridge.group_ids()
    }

    pub fn bridge(&self) -> &CoordinationBridge {
        &self.bridge
    }

    fn handle(&self, group_id: &str) -> Result<JobHandle, DiscoveryError> {
        self.bridge
            .handle(group_id)
            .ok_or_else(|| DiscoveryError::UnknownGroup(group_id.to_string()))
    }
}
