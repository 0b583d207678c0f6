//! Coordination with the surrounding cluster
//!
//! Persists each group's job record, schedules its ticks and decides which
//! instance runs them.

mod bridge;
mod error;
mod job_config;
mod scheduler;
mod store;

pub use bridge::{CoordinationBridge, JobHandle, DEFAULT_LEASE_TTL};
pub use error::{CoordinationError, SchedulerError};
pub use job_config::{
    config_path, discovery_path, job_name, leader_path, DiscoveryRecord, JobConfiguration,
};
pub use scheduler::{parse_cron, CronScheduler, Scheduler, TickTarget};
pub use store::{CoordinationStore, MemoryStore};
