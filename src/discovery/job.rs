//! Monitor job: one resolution per scheduler tick
//!
//! Phases per tick: `Idle -> Probing -> Resolved | Failed -> Idle`.
//! Ticks of the same job never overlap; an overlapping tick is skipped.
//! Failures are recorded and logged, never returned to the scheduler.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::metrics::metrics;
use crate::pool::SqlExecutor;

use super::endpoint::DataSourceEndpoint;
use super::error::ResolutionError;
use super::group::GroupConfig;
use super::probe::NodeProbe;
use super::resolver::{PrimaryResolver, PrimaryResult, ResolverConfig};
use super::topology::TopologyState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Probing,
    Resolved,
    Failed,
}

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Resolved { primary: String, changed: bool },
    Failed(ResolutionError),
    /// Another tick of this group was still running
    Skipped,
}

/// Counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub ticks: u64,
    pub resolved: u64,
    pub failed: u64,
    pub skipped: u64,
    pub last_error: Option<ResolutionError>,
}

pub struct MonitorJob {
    group_id: String,
    endpoints: Vec<DataSourceEndpoint>,
    config: RwLock<GroupConfig>,
    executor: Arc<dyn SqlExecutor>,
    resolver: PrimaryResolver,
    topology: Arc<TopologyState>,
    /// Held for the whole tick
    flight: tokio::sync::Mutex<()>,
    phase: Mutex<JobPhase>,
    stats: Mutex<JobStats>,
}

impl MonitorJob {
    pub fn new(
        config: GroupConfig,
        endpoints: Vec<DataSourceEndpoint>,
        executor: Arc<dyn SqlExecutor>,
        resolver_config: ResolverConfig,
    ) -> Self {
        let group_id = config.group_name.clone();
        let topology = Arc::new(TopologyState::new(
            group_id.clone(),
            endpoints.iter().map(|e| e.id().to_string()),
        ));
        Self {
            resolver: PrimaryResolver::new(executor.clone(), resolver_config),
            group_id,
            endpoints,
            config: RwLock::new(config),
            executor,
            topology,
            flight: tokio::sync::Mutex::new(()),
            phase: Mutex::new(JobPhase::Idle),
            stats: Mutex::new(JobStats::default()),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn endpoints(&self) -> &[DataSourceEndpoint] {
        &self.endpoints
    }

    pub fn topology(&self) -> Arc<TopologyState> {
        self.topology.clone()
    }

    pub fn phase(&self) -> JobPhase {
        *self.phase.lock()
    }

    pub fn stats(&self) -> JobStats {
        self.stats.lock().clone()
    }

    /// Configuration the next tick will use
    pub fn config(&self) -> GroupConfig {
        self.config.read().clone()
    }

    /// Swap in a reloaded configuration
    ///
    /// Topology survives, except that a primary which is now disabled is
    /// withdrawn at once rather than at the next tick.
    pub fn apply_config(&self, config: GroupConfig) {
        if self.topology.withdraw_disabled(&config.disabled).is_some() {
            metrics().record_primary_change(&self.group_id);
        }
        *self.config.write() = config;
    }

    /// Scheduler entry point
    pub async fn on_tick(&self) -> TickOutcome {
        let Ok(_flight) = self.flight.try_lock() else {
            debug!(group = %self.group_id, "Previous tick still running, skipping");
            self.stats.lock().skipped += 1;
            metrics().record_skipped_tick(&self.group_id, "in_flight");
            return TickOutcome::Skipped;
        };

        self.set_phase(JobPhase::Probing);
        self.stats.lock().ticks += 1;
        let started = std::time::Instant::now();

        let disabled = self.config.read().disabled.clone();
        let outcome = match self
            .resolver
            .resolve(&self.group_id, &self.endpoints, &disabled)
            .await
        {
            Ok(result) => self.apply(result, &disabled).await,
            Err(e) => TickOutcome::Failed(e),
        };

        let elapsed = started.elapsed().as_secs_f64();

        match &outcome {
            TickOutcome::Resolved { primary, changed } => {
                self.set_phase(JobPhase::Resolved);
                self.stats.lock().resolved += 1;
                metrics().record_tick(&self.group_id, "resolved", elapsed);
                if *changed {
                    metrics().record_primary_change(&self.group_id);
                }
                debug!(group = %self.group_id, primary = %primary, "Primary resolved");
            }
            TickOutcome::Failed(e) => {
                self.set_phase(JobPhase::Failed);
                {
                    let mut stats = self.stats.lock();
                    stats.failed += 1;
                    stats.last_error = Some(e.clone());
                }
                metrics().record_tick(&self.group_id, e.label(), elapsed);
                warn!(
                    group = %self.group_id,
                    error = %e,
                    last_known_primary = ?self.topology.current_primary(),
                    "Primary resolution failed, keeping last known primary"
                );
            }
            TickOutcome::Skipped => {}
        }

        self.set_phase(JobPhase::Idle);
        outcome
    }

    async fn apply(&self, result: PrimaryResult, disabled: &BTreeSet<String>) -> TickOutcome {
        match self.topology.update(&result.node_id, disabled) {
            Ok(event) => {
                self.sync_members(&result).await;
                TickOutcome::Resolved {
                    primary: result.node_id,
                    changed: event.is_some(),
                }
            }
            Err(e) => {
                error!(group = %self.group_id, error = %e, "Resolved primary rejected by topology");
                TickOutcome::Failed(ResolutionError::NoQuorum {
                    group: self.group_id.clone(),
                    reported: Some(result.address),
                })
            }
        }
    }

    /// Mark configured members the primary does not see ONLINE as unavailable
    async fn sync_members(&self, result: &PrimaryResult) {
        let Some(primary) = self.endpoints.iter().find(|e| e.id() == result.node_id) else {
            return;
        };

        let states = match tokio::time::timeout(
            self.resolver.config().probe_timeout,
            NodeProbe::member_states(self.executor.as_ref(), primary),
        )
        .await
        {
            Ok(Ok(states)) => states,
            Ok(Err(e)) => {
                debug!(group = %self.group_id, error = %e, "Member states not readable");
                return;
            }
            Err(_) => {
                debug!(group = %self.group_id, "Member states query timed out");
                return;
            }
        };

        let unavailable = self
            .endpoints
            .iter()
            .filter(|e| {
                !states
                    .iter()
                    .any(|s| s.is_online() && e.is_target(&s.address))
            })
            .map(|e| e.id().to_string())
            .collect();
        self.topology.set_unavailable(unavailable);
    }

    fn set_phase(&self, phase: JobPhase) {
        *self.phase.lock() = phase;
    }
}
