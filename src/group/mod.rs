//! Discovery manager
//!
//! The façade the proxy talks to: one monitor job per replication group,
//! keyed by the MGR group name.

mod manager;

pub use manager::{DiscoveryError, DiscoveryManager};
