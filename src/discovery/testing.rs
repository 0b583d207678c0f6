//! Scripted `SqlExecutor` for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::pool::SqlExecutor;
use crate::protocol::Row;

use super::endpoint::{ConnectOptions, DataSourceEndpoint};
use super::error::ProbeError;
use super::probe::{GROUP_NAME, MEMBER_COUNT, PLUGIN_STATUS, PRIMARY_MEMBER, SINGLE_PRIMARY};

type Script = HashMap<(String, String), Result<Vec<Row>, ProbeError>>;

/// Answers statements from a per-node script
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<Script>,
    down: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, node: &str, sql: &str, rows: Vec<Row>) {
        self.script
            .lock()
            .insert((node.to_string(), sql.to_string()), Ok(rows));
    }

    pub fn fail(&self, node: &str, sql: &str, err: ProbeError) {
        self.script
            .lock()
            .insert((node.to_string(), sql.to_string()), Err(err));
    }

    pub fn set_down(&self, node: &str) {
        self.down.lock().insert(node.to_string());
    }

    pub fn set_up(&self, node: &str) {
        self.down.lock().remove(node);
    }

    pub fn delay(&self, node: &str, delay: Duration) {
        self.delays.lock().insert(node.to_string(), delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn query(&self, endpoint: &DataSourceEndpoint, sql: &str) -> Result<Vec<Row>, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let node = endpoint.id();

        let delay = self.delays.lock().get(node).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.down.lock().contains(node) {
            return Err(ProbeError::unreachable(node, "connection refused"));
        }

        self.script
            .lock()
            .get(&(node.to_string(), sql.to_string()))
            .cloned()
            .unwrap_or_else(|| Err(ProbeError::malformed(node, format!("unscripted: {}", sql))))
    }
}

pub fn endpoint(id: &str, port: u16) -> DataSourceEndpoint {
    DataSourceEndpoint::new(
        id,
        ConnectOptions {
            host: "127.0.0.1".to_string(),
            port,
            user: "root".to_string(),
            password: String::new(),
            database: None,
        },
    )
}

/// `ds_0..ds_{n-1}` on 127.0.0.1:3306, 3307, ...
pub fn endpoints(n: u16) -> Vec<DataSourceEndpoint> {
    (0..n).map(|i| endpoint(&format!("ds_{}", i), 3306 + i)).collect()
}

pub fn primary_answer(executor: &ScriptedExecutor, node: &str, host: &str, port: u16) {
    executor.respond(
        node,
        PRIMARY_MEMBER,
        vec![Row::from_pairs([
            ("MEMBER_HOST", host.to_string()),
            ("MEMBER_PORT", port.to_string()),
        ])],
    );
}

/// Script a member that passes every validation check
pub fn healthy_member(
    executor: &ScriptedExecutor,
    node: &str,
    group_name: &str,
    member_count: u64,
    primary: Option<(&str, u16)>,
) {
    executor.respond(
        node,
        PLUGIN_STATUS,
        vec![Row::from_pairs([
            ("PLUGIN_NAME", "group_replication"),
            ("PLUGIN_STATUS", "ACTIVE"),
        ])],
    );
    executor.respond(
        node,
        MEMBER_COUNT,
        vec![Row::from_pairs([("count(*)", member_count.to_string())])],
    );
    executor.respond(
        node,
        GROUP_NAME,
        vec![Row::from_pairs([
            ("VARIABLE_NAME", "group_replication_group_name"),
            ("VARIABLE_VALUE", group_name),
        ])],
    );
    executor.respond(
        node,
        SINGLE_PRIMARY,
        vec![Row::from_pairs([
            ("VARIABLE_NAME", "group_replication_single_primary_mode"),
            ("VARIABLE_VALUE", "ON"),
        ])],
    );
    match primary {
        Some((host, port)) => primary_answer(executor, node, host, port),
        None => executor.respond(node, PRIMARY_MEMBER, Vec::new()),
    }
}
