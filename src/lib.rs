//! MySQL Group Replication discovery for the Athena proxy
//!
//! Validates single-primary MGR groups, tracks their primary on a cron
//! cadence and publishes primary changes to routing consumers.

pub mod config;
pub mod coordination;
pub mod discovery;
pub mod group;
pub mod metrics;
pub mod pool;
pub mod protocol;

pub use discovery::{GroupConfig, TopologyEvent, TopologySnapshot};
pub use group::{DiscoveryError, DiscoveryManager};
