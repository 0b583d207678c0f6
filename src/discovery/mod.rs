//! MGR discovery core
//!
//! Validates a replication group at registration, then resolves its primary
//! once per tick and publishes the result to routing consumers.

mod endpoint;
mod error;
mod group;
mod job;
mod probe;
mod resolver;
mod topology;
mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use endpoint::{ConnectOptions, DataSourceEndpoint, EndpointError, NodeAddress};
pub use error::{ConfigError, ProbeError, ProbeErrorKind, ResolutionError, TopologyError};
pub use group::{GroupConfig, DEFAULT_KEEP_ALIVE_CRON};
pub use job::{JobPhase, JobStats, MonitorJob, TickOutcome};
pub use probe::{
    MemberSnapshot, MemberState, NodeProbe, GROUP_NAME, MEMBER_COUNT, MEMBER_STATES,
    PLUGIN_STATUS, PRIMARY_MEMBER, SINGLE_PRIMARY,
};
pub use resolver::{Answer, PrimaryResolver, PrimaryResult, ResolverConfig};
pub use topology::{TopologyEvent, TopologySnapshot, TopologyState};
pub use validator::ConfigValidator;
