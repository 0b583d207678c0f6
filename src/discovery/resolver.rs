//! Primary resolution for one tick
//!
//! Every non-disabled member is asked which member is primary. The answers are
//! network addresses, translated back to configured data source ids. Only the
//! answers of the current tick are considered.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::metrics::metrics;
use crate::pool::SqlExecutor;

use super::endpoint::{DataSourceEndpoint, NodeAddress};
use super::error::{ProbeError, ResolutionError};
use super::probe::NodeProbe;

/// Fan-out limits for one resolution
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Bound on each member's probe
    pub probe_timeout: Duration,
    /// Bound on the whole fan-out; later answers are abandoned
    pub tick_deadline: Duration,
    /// Probes in flight at once
    pub max_concurrent_probes: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(3000),
            tick_deadline: Duration::from_millis(5000),
            max_concurrent_probes: 8,
        }
    }
}

/// A successfully resolved primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryResult {
    pub node_id: String,
    pub address: NodeAddress,
    /// Members that answered this tick
    pub responders: usize,
    /// Members that named `address`
    pub votes: usize,
}

/// One member's answer within a tick
pub type Answer = (String, Result<Option<NodeAddress>, ProbeError>);

pub struct PrimaryResolver {
    executor: Arc<dyn SqlExecutor>,
    config: ResolverConfig,
}

impl PrimaryResolver {
    pub fn new(executor: Arc<dyn SqlExecutor>, config: ResolverConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Determine the current primary of `group_id`
    pub async fn resolve(
        &self,
        group_id: &str,
        endpoints: &[DataSourceEndpoint],
        disabled: &BTreeSet<String>,
    ) -> Result<PrimaryResult, ResolutionError> {
        let active: Vec<&DataSourceEndpoint> = endpoints
            .iter()
            .filter(|e| !disabled.contains(e.id()))
            .collect();

        let answers = self.collect(group_id, &active).await;
        Self::decide(group_id, &active, answers)
    }

    /// Probe all members concurrently, keeping what arrives before the deadline
    async fn collect(&self, group_id: &str, active: &[&DataSourceEndpoint]) -> Vec<Answer> {
        let deadline = tokio::time::Instant::now() + self.config.tick_deadline;
        let probe_timeout = self.config.probe_timeout;
        let executor = self.executor.as_ref();

        // Collected up front; a lazily mapped stream over borrowed endpoints
        // makes the tick future !Send
        let pending: Vec<_> = active
            .iter()
            .copied()
            .map(|endpoint| async move {
                let answer =
                    match tokio::time::timeout(probe_timeout, NodeProbe::primary_member(executor, endpoint))
                        .await
                    {
                        Ok(answer) => answer,
                        Err(_) => Err(ProbeError::unreachable(
                            endpoint.id(),
                            format!("probe timed out after {:?}", probe_timeout),
                        )),
                    };
                (endpoint.id().to_string(), answer)
            })
            .collect();
        let mut probes =
            futures::stream::iter(pending).buffer_unordered(self.config.max_concurrent_probes.max(1));

        let mut answers = Vec::with_capacity(active.len());
        loop {
            match tokio::time::timeout_at(deadline, probes.next()).await {
                Ok(Some(answer)) => answers.push(answer),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        group = %group_id,
                        answered = answers.len(),
                        pending = active.len() - answers.len(),
                        "Tick deadline reached, abandoning outstanding probes"
                    );
                    break;
                }
            }
        }
        answers
    }

    /// Apply the decision rule to one tick's answers
    pub fn decide(
        group_id: &str,
        active: &[&DataSourceEndpoint],
        answers: Vec<Answer>,
    ) -> Result<PrimaryResult, ResolutionError> {
        let mut responders = 0;
        let mut candidates: Vec<(NodeAddress, usize)> = Vec::new();

        for (node, answer) in answers {
            match answer {
                Ok(Some(address)) => {
                    responders += 1;
                    match candidates.iter_mut().find(|(a, _)| a.same_member(&address)) {
                        Some((_, votes)) => *votes += 1,
                        None => candidates.push((address, 1)),
                    }
                }
                Ok(None) => {
                    responders += 1;
                    debug!(group = %group_id, node = %node, "Member knows no primary");
                }
                Err(e) => {
                    metrics().record_probe_failure(e.kind().label());
                    debug!(group = %group_id, node = %node, error = %e, "Probe failed");
                }
            }
        }

        if responders == 0 {
            return Err(ResolutionError::NoReachableNode {
                group: group_id.to_string(),
            });
        }

        if candidates.len() > 1 {
            let mut candidates: Vec<NodeAddress> = candidates.into_iter().map(|(a, _)| a).collect();
            candidates.sort();
            return Err(ResolutionError::AmbiguousPrimary {
                group: group_id.to_string(),
                candidates,
            });
        }

        let Some((address, votes)) = candidates.pop() else {
            return Err(ResolutionError::NoQuorum {
                group: group_id.to_string(),
                reported: None,
            });
        };

        match active.iter().find(|e| e.is_target(&address)) {
            Some(endpoint) => Ok(PrimaryResult {
                node_id: endpoint.id().to_string(),
                address,
                responders,
                votes,
            }),
            None => Err(ResolutionError::NoQuorum {
                group: group_id.to_string(),
                reported: Some(address),
            }),
        }
    }
}
