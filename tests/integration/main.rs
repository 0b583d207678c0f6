//! Integration test entry point
//!
//! Run with: ATHENA_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Requires a running single-primary MGR cluster.
//!
//! Environment variables:
//! - ATHENA_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - ATHENA_TEST_MGR_NODES: Comma-separated host:port list (default: 127.0.0.1:3306,127.0.0.1:3307,127.0.0.1:3308)
//! - ATHENA_TEST_MGR_REPORT_ADDRS: Comma-separated host:port list the group reports
//!   for each node, when it differs from ATHENA_TEST_MGR_NODES
//! - ATHENA_TEST_MGR_USER: Monitor user (default: root)
//! - ATHENA_TEST_MGR_PASS: Monitor password (default: empty)

mod discovery;
mod probe;

use athena_discovery::discovery::{ConnectOptions, DataSourceEndpoint, NodeAddress};
use mysql::prelude::*;
use mysql::{Error as MySqlError, OptsBuilder, Pool, PooledConn};
use std::env;

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("ATHENA_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set ATHENA_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// MGR cluster connection config
#[derive(Debug, Clone)]
pub struct MgrTestConfig {
    pub nodes: Vec<NodeAddress>,
    pub report_addrs: Vec<NodeAddress>,
    pub user: String,
    pub password: String,
}

fn parse_addrs(list: &str) -> Vec<NodeAddress> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| NodeAddress::parse(s).unwrap_or_else(|| panic!("Invalid node address: {}", s)))
        .collect()
}

/// Get cluster config from environment
pub fn get_mgr_config() -> MgrTestConfig {
    let nodes = parse_addrs(
        &env::var("ATHENA_TEST_MGR_NODES")
            .unwrap_or_else(|_| "127.0.0.1:3306,127.0.0.1:3307,127.0.0.1:3308".to_string()),
    );
    let report_addrs = env::var("ATHENA_TEST_MGR_REPORT_ADDRS")
        .map(|v| parse_addrs(&v))
        .unwrap_or_default();
    MgrTestConfig {
        nodes,
        report_addrs,
        user: env::var("ATHENA_TEST_MGR_USER").unwrap_or_else(|_| "root".to_string()),
        password: env::var("ATHENA_TEST_MGR_PASS").unwrap_or_default(),
    }
}

impl MgrTestConfig {
    /// Endpoints `ds_0..ds_n` for the configured nodes
    pub fn endpoints(&self) -> Vec<DataSourceEndpoint> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let endpoint = DataSourceEndpoint::new(
                    format!("ds_{}", i),
                    ConnectOptions {
                        host: node.host.clone(),
                        port: node.port,
                        user: self.user.clone(),
                        password: self.password.clone(),
                        database: None,
                    },
                );
                match self.report_addrs.get(i) {
                    Some(reported) => endpoint.with_advertised(reported.clone()),
                    None => endpoint,
                }
            })
            .collect()
    }

    /// Direct connection to one node, bypassing the crate's wire client
    pub fn conn(&self, index: usize) -> PooledConn {
        let node = &self.nodes[index];
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(&node.host))
            .tcp_port(node.port)
            .user(Some(&self.user))
            .pass(Some(&self.password));
        Pool::new(opts)
            .expect("Failed to create connection pool")
            .get_conn()
            .expect("Failed to get connection")
    }

    /// `group_replication_group_name` as reported by the first node
    pub fn group_name(&self) -> String {
        let name: Option<String> = self
            .conn(0)
            .query_first("SELECT @@group_replication_group_name")
            .expect("SELECT @@group_replication_group_name should succeed");
        name.expect("Node is not part of a replication group")
    }

    /// Primary address as the first node reports it
    pub fn primary_address(&self) -> Result<Option<NodeAddress>, MySqlError> {
        let row: Option<(String, u16)> = self.conn(0).query_first(
            "SELECT MEMBER_HOST, MEMBER_PORT FROM performance_schema.replication_group_members \
             WHERE MEMBER_ROLE = 'PRIMARY'",
        )?;
        Ok(row.map(|(host, port)| NodeAddress::new(host, port)))
    }
}
