//! Coordination bridge: job registry, persisted config, leadership
//!
//! Jobs are registered at most once per group. Several instances may register
//! the same group against one store; only the instance holding
//! `/<jobName>/leader/election/instance` runs ticks.
//!
//! That node is a lease renewed by every tick of the leader. An instance that
//! dies without deregistering stops renewing it, and a follower takes over on
//! its first tick after the lease has run out. The lease therefore has to
//! outlast the interval between two ticks.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::discovery::{GroupConfig, MonitorJob};
use crate::metrics::metrics;

use super::error::CoordinationError;
use super::job_config::{
    config_path, discovery_path, group_config, job_name, leader_path, DiscoveryRecord,
    JobConfiguration,
};
use super::scheduler::{parse_cron, Scheduler, TickTarget};
use super::store::CoordinationStore;

/// A registered monitor job
#[derive(Clone)]
pub struct JobHandle {
    group_id: String,
    job_name: String,
    job: Arc<MonitorJob>,
}

impl JobHandle {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn job(&self) -> &Arc<MonitorJob> {
        &self.job
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("group_id", &self.group_id)
            .field("job_name", &self.job_name)
            .finish()
    }
}

/// How long a leader keeps its job without ticking
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// Leadership node for one job, as seen by one instance
struct Leadership {
    store: Arc<dyn CoordinationStore>,
    path: String,
    instance_id: String,
    ttl: Duration,
    held: AtomicBool,
}

impl Leadership {
    /// Claim the lease if vacant or expired, renew it if ours
    async fn acquire(&self) -> Result<bool, CoordinationError> {
        let held = self
            .store
            .acquire_lease(&self.path, &self.instance_id, self.ttl)
            .await?;
        if held != self.held.swap(held, Ordering::Relaxed) {
            if held {
                info!(path = %self.path, instance = %self.instance_id, "Leadership acquired");
            } else {
                warn!(path = %self.path, instance = %self.instance_id, "Leadership lost");
            }
        }
        Ok(held)
    }

    async fn release(&self) -> Result<(), CoordinationError> {
        self.held.store(false, Ordering::Relaxed);
        if self.store.get(&self.path).await?.as_deref() == Some(self.instance_id.as_str()) {
            self.store.remove(&self.path).await?;
            info!(path = %self.path, instance = %self.instance_id, "Leadership released");
        }
        Ok(())
    }
}

/// What the scheduler fires: leadership check, config refresh, then the job
struct GatedTick {
    group_id: String,
    job_name: String,
    job: Arc<MonitorJob>,
    leadership: Leadership,
}

#[async_trait]
impl TickTarget for GatedTick {
    async fn tick(&self) {
        match self.leadership.acquire().await {
            Ok(true) => {}
            Ok(false) => {
                debug!(group = %self.group_id, "Not the leader, skipping tick");
                metrics().record_skipped_tick(&self.group_id, "not_leader");
                return;
            }
            Err(e) => {
                warn!(group = %self.group_id, error = %e, "Leadership check failed, skipping tick");
                metrics().record_skipped_tick(&self.group_id, "not_leader");
                return;
            }
        }

        // Keep the last loaded config when the store cannot be read
        match load(self.leadership.store.as_ref(), &self.group_id, &self.job_name).await {
            Ok(config) => self.job.apply_config(config),
            Err(e) => debug!(group = %self.group_id, error = %e, "Using last loaded config"),
        }

        self.job.on_tick().await;
    }
}

async fn load(
    store: &dyn CoordinationStore,
    group_id: &str,
    job_name: &str,
) -> Result<GroupConfig, CoordinationError> {
    let path = config_path(job_name);
    let yaml = store
        .get(&path)
        .await?
        .ok_or(CoordinationError::NotFound(path))?;
    let job = JobConfiguration::from_yaml(&yaml)?;
    let record = match store.get(&discovery_path(job_name)).await? {
        Some(yaml) => Some(DiscoveryRecord::from_yaml(&yaml)?),
        None => None,
    };
    Ok(group_config(&job, record, group_id))
}

pub struct CoordinationBridge {
    store: Arc<dyn CoordinationStore>,
    scheduler: Arc<dyn Scheduler>,
    instance_id: String,
    lease_ttl: Duration,
    jobs: DashMap<String, JobHandle>,
}

impl CoordinationBridge {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        scheduler: Arc<dyn Scheduler>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            scheduler,
            instance_id: instance_id.into(),
            lease_ttl: DEFAULT_LEASE_TTL,
            jobs: DashMap::new(),
        }
    }

    /// Leadership lease; must exceed the longest interval between ticks
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn handle(&self, group_id: &str) -> Option<JobHandle> {
        self.jobs.get(group_id).map(|h| h.clone())
    }

    pub fn group_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Register the monitor job of `group_id`
    ///
    /// A second call for the same group returns the existing handle and does
    /// not call `build_job`.
    pub async fn register<F>(
        &self,
        group_id: &str,
        config: &GroupConfig,
        build_job: F,
    ) -> Result<JobHandle, CoordinationError>
    where
        F: FnOnce() -> Arc<MonitorJob>,
    {
        if let Some(handle) = self.handle(group_id) {
            debug!(group = %group_id, "Job already registered");
            return Ok(handle);
        }

        parse_cron(&config.keep_alive_cron)?;
        self.persist_config(group_id, config).await?;

        let name = job_name(group_id);
        let (handle, target) = match self.jobs.entry(group_id.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let job = build_job();
                let target = Arc::new(GatedTick {
                    group_id: group_id.to_string(),
                    job_name: name.clone(),
                    job: job.clone(),
                    leadership: self.leadership(&name),
                });
                self.scheduler
                    .schedule(&name, &config.keep_alive_cron, target.clone())?;
                let handle = slot
                    .insert(JobHandle {
                        group_id: group_id.to_string(),
                        job_name: name.clone(),
                        job,
                    })
                    .clone();
                (handle, target)
            }
        };
        metrics().groups_registered.inc();

        match target.leadership.acquire().await {
            Ok(leader) => info!(
                group = %group_id,
                job = %name,
                cron = %config.keep_alive_cron,
                leader,
                "Monitor job registered"
            ),
            Err(e) => warn!(group = %group_id, error = %e, "Leadership not decided at registration"),
        }
        Ok(handle)
    }

    /// Stop the job and give up its leadership; the persisted config stays
    pub async fn deregister(&self, handle: &JobHandle) -> Result<(), CoordinationError> {
        self.scheduler.cancel(handle.job_name());
        if self.jobs.remove(handle.group_id()).is_some() {
            metrics().groups_registered.dec();
        }
        self.leadership(handle.job_name()).release().await?;
        info!(group = %handle.group_id(), "Monitor job deregistered");
        Ok(())
    }

    pub async fn persist_config(
        &self,
        group_id: &str,
        config: &GroupConfig,
    ) -> Result<(), CoordinationError> {
        let name = job_name(group_id);
        let job = JobConfiguration::for_group(group_id, &config.keep_alive_cron);
        self.store.persist(&config_path(&name), &job.to_yaml()?).await?;
        self.store
            .persist(&discovery_path(&name), &DiscoveryRecord::from(config).to_yaml()?)
            .await?;
        Ok(())
    }

    pub async fn load_config(&self, group_id: &str) -> Result<GroupConfig, CoordinationError> {
        load(self.store.as_ref(), group_id, &job_name(group_id)).await
    }

    /// Change the cadence of a registered group; the job and its topology stay
    pub async fn reconfigure(&self, group_id: &str, cron: &str) -> Result<(), CoordinationError> {
        let handle = self
            .handle(group_id)
            .ok_or_else(|| CoordinationError::NotRegistered(group_id.to_string()))?;
        parse_cron(cron)?;

        let config = handle.job().config().with_cron(cron);
        self.persist_config(group_id, &config).await?;
        self.scheduler.reschedule(handle.job_name(), cron)?;
        handle.job().apply_config(config);
        info!(group = %group_id, cron = %cron, "Monitor job rescheduled");
        Ok(())
    }

    /// Replace the administratively disabled set of a registered group
    pub async fn set_disabled(
        &self,
        group_id: &str,
        disabled: BTreeSet<String>,
    ) -> Result<(), CoordinationError> {
        let handle = self
            .handle(group_id)
            .ok_or_else(|| CoordinationError::NotRegistered(group_id.to_string()))?;

        let mut config = handle.job().config();
        config.disabled = disabled;
        self.persist_config(group_id, &config).await?;
        info!(group = %group_id, disabled = ?config.disabled, "Disabled data sources updated");
        handle.job().apply_config(config);
        Ok(())
    }

    /// Whether this instance currently runs the ticks of `group_id`
    pub async fn is_leader(&self, group_id: &str) -> Result<bool, CoordinationError> {
        let path = leader_path(&job_name(group_id));
        Ok(self.store.get(&path).await?.as_deref() == Some(self.instance_id.as_str()))
    }

    fn leadership(&self, job_name: &str) -> Leadership {
        Leadership {
            store: self.store.clone(),
            path: leader_path(job_name),
            instance_id: self.instance_id.clone(),
            ttl: self.lease_ttl,
            held: AtomicBool::new(false),
        }
    }
}
