//! Topology state of one replication group
//!
//! Readers get an immutable `Arc<TopologySnapshot>`; the single writer (the
//! group's monitor job) publishes a new snapshot on every change. Every
//! published change bumps `sequence`, so consumers of the event channel can
//! drop out-of-order deliveries.
//!
//! The published primary is never an administratively disabled member:
//! disabling it withdraws it until a later tick resolves an eligible one.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::error::TopologyError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Immutable view of a group's topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub group_id: String,
    /// None until the first successful resolution
    pub primary: Option<String>,
    pub sequence: u64,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Configured members the group does not report as ONLINE
    pub unavailable: BTreeSet<String>,
}

/// Change notification for routing consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    PrimaryChanged {
        group_id: String,
        old_primary: Option<String>,
        new_primary: String,
        sequence: u64,
    },
    /// The primary was disabled; no primary is published until the next resolution
    PrimaryWithdrawn {
        group_id: String,
        old_primary: String,
        sequence: u64,
    },
    AvailabilityChanged {
        group_id: String,
        node_id: String,
        available: bool,
        sequence: u64,
    },
}

impl TopologyEvent {
    pub fn group_id(&self) -> &str {
        match self {
            Self::PrimaryChanged { group_id, .. }
            | Self::PrimaryWithdrawn { group_id, .. }
            | Self::AvailabilityChanged { group_id, .. } => group_id,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Self::PrimaryChanged { sequence, .. }
            | Self::PrimaryWithdrawn { sequence, .. }
            | Self::AvailabilityChanged { sequence, .. } => *sequence,
        }
    }
}

pub struct TopologyState {
    group_id: String,
    configured: BTreeSet<String>,
    current: RwLock<Arc<TopologySnapshot>>,
    events: broadcast::Sender<TopologyEvent>,
}

impl TopologyState {
    pub fn new<I, S>(group_id: impl Into<String>, configured: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group_id = group_id.into();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(Arc::new(TopologySnapshot {
                group_id: group_id.clone(),
                primary: None,
                sequence: 0,
                resolved_at: None,
                unavailable: BTreeSet::new(),
            })),
            configured: configured.into_iter().map(Into::into).collect(),
            group_id,
            events,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.current.read().clone()
    }

    pub fn current_primary(&self) -> Option<String> {
        self.current.read().primary.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.events.subscribe()
    }

    pub fn is_configured(&self, node_id: &str) -> bool {
        self.configured.contains(node_id)
    }

    /// Record a successful resolution naming `new_primary`
    ///
    /// Returns the emitted event, or None when the primary is unchanged.
    pub fn update(
        &self,
        new_primary: &str,
        disabled: &BTreeSet<String>,
    ) -> Result<Option<TopologyEvent>, TopologyError> {
        if !self.is_configured(new_primary) {
            return Err(TopologyError::UnknownNode {
                group: self.group_id.clone(),
                node: new_primary.to_string(),
            });
        }
        if disabled.contains(new_primary) {
            return Err(TopologyError::DisabledNode {
                group: self.group_id.clone(),
                node: new_primary.to_string(),
            });
        }

        let mut current = self.current.write();
        let mut next = TopologySnapshot::clone(&current);
        next.resolved_at = Some(Utc::now());

        if current.primary.as_deref() == Some(new_primary) {
            *current = Arc::new(next);
            return Ok(None);
        }

        next.sequence += 1;
        let old_primary = next.primary.replace(new_primary.to_string());
        let event = TopologyEvent::PrimaryChanged {
            group_id: self.group_id.clone(),
            old_primary: old_primary.clone(),
            new_primary: new_primary.to_string(),
            sequence: next.sequence,
        };
        *current = Arc::new(next);

        info!(
            group = %self.group_id,
            old_primary = ?old_primary,
            new_primary = %new_primary,
            sequence = event.sequence(),
            "Primary data source changed"
        );
        // No receivers is fine: consumers may poll `snapshot` instead
        let _ = self.events.send(event.clone());
        Ok(Some(event))
    }

    /// Clear the primary if it is in `disabled`
    ///
    /// Returns the emitted event, or None when the primary is still eligible.
    pub fn withdraw_disabled(&self, disabled: &BTreeSet<String>) -> Option<TopologyEvent> {
        let mut current = self.current.write();
        let old_primary = current.primary.clone().filter(|p| disabled.contains(p))?;

        let mut next = TopologySnapshot::clone(&current);
        next.primary = None;
        next.sequence += 1;
        let event = TopologyEvent::PrimaryWithdrawn {
            group_id: self.group_id.clone(),
            old_primary: old_primary.clone(),
            sequence: next.sequence,
        };
        *current = Arc::new(next);
        drop(current);

        warn!(
            group = %self.group_id,
            old_primary = %old_primary,
            sequence = event.sequence(),
            "Primary data source disabled, withdrawn from routing"
        );
        let _ = self.events.send(event.clone());
        Some(event)
    }

    /// Replace the unavailable set, emitting one event per member that flipped
    pub fn set_unavailable(&self, unavailable: BTreeSet<String>) -> Vec<TopologyEvent> {
        let unavailable: BTreeSet<String> = unavailable
            .into_iter()
            .filter(|id| self.is_configured(id))
            .collect();

        let mut current = self.current.write();
        if current.unavailable == unavailable {
            return Vec::new();
        }

        let mut next = TopologySnapshot::clone(&current);
        let mut events = Vec::new();
        for node in unavailable.symmetric_difference(&current.unavailable) {
            next.sequence += 1;
            events.push(TopologyEvent::AvailabilityChanged {
                group_id: self.group_id.clone(),
                node_id: node.clone(),
                available: !unavailable.contains(node),
                sequence: next.sequence,
            });
        }
        next.unavailable = unavailable;
        *current = Arc::new(next);

        for event in &events {
            if let TopologyEvent::AvailabilityChanged { node_id, available, .. } = event {
                info!(group = %self.group_id, node = %node_id, available = *available, "Data source availability changed");
            }
            let _ = self.events.send(event.clone());
        }
        events
    }
}
