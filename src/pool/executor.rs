//! SQL execution seam used by the probes
//!
//! `SqlExecutor` is the only way discovery code talks to a data source, so the
//! resolution logic can be driven by scripted fakes in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::discovery::{DataSourceEndpoint, ProbeError};
use crate::protocol::Row;

use super::connection::{BackendConnection, ConnectionError};

/// Runs read-only statements against a data source
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute `sql` on `endpoint` and return all rows
    async fn query(&self, endpoint: &DataSourceEndpoint, sql: &str) -> Result<Vec<Row>, ProbeError>;

    /// Drop any cached state for a data source that left the configuration
    async fn evict(&self, _endpoint: &DataSourceEndpoint) {}
}

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Timeout for TCP connect plus authentication
    pub connect_timeout: Duration,
    /// Recycle monitoring connections older than this
    pub max_connection_age: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            max_connection_age: Duration::from_secs(30 * 60),
        }
    }
}

type ConnectionSlot = Arc<Mutex<Option<BackendConnection>>>;

/// `SqlExecutor` over the MySQL wire protocol
///
/// Keeps one persistent connection per data source and reconnects once when
/// the cached connection turns out to be broken.
pub struct MysqlExecutor {
    slots: DashMap<String, ConnectionSlot>,
    config: ExecutorConfig,
}

impl Default for MysqlExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl MysqlExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            slots: DashMap::new(),
            config,
        }
    }

    /// Number of data sources with a connection slot
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, endpoint: &DataSourceEndpoint) -> ConnectionSlot {
        self.slots
            .entry(slot_key(endpoint))
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn connect(&self, endpoint: &DataSourceEndpoint) -> Result<BackendConnection, ConnectionError> {
        tokio::time::timeout(
            self.config.connect_timeout,
            BackendConnection::connect(endpoint.options()),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout))?
    }

    async fn run(
        &self,
        endpoint: &DataSourceEndpoint,
        sql: &str,
    ) -> Result<Vec<Row>, ConnectionError> {
        let slot = self.slot(endpoint);
        let mut cached = slot.lock().await;

        if let Some(conn) = cached.as_mut() {
            if conn.is_usable() && !conn.is_expired(self.config.max_connection_age) {
                match conn.query(sql).await {
                    Ok(rows) => return Ok(rows),
                    Err(e) if e.is_transport() => {
                        debug!(node = %endpoint.id(), error = %e, "Cached connection failed, reconnecting");
                    }
                    Err(e) => return Err(e),
                }
            }
            if let Some(stale) = cached.take() {
                stale.close().await;
            }
        }

        let mut conn = self.connect(endpoint).await?;
        let result = conn.query(sql).await;
        if conn.is_usable() {
            *cached = Some(conn);
        }
        result
    }
}

#[async_trait]
impl SqlExecutor for MysqlExecutor {
    async fn query(&self, endpoint: &DataSourceEndpoint, sql: &str) -> Result<Vec<Row>, ProbeError> {
        self.run(endpoint, sql)
            .await
            .map_err(|e| classify(endpoint.id(), e))
    }

    async fn evict(&self, endpoint: &DataSourceEndpoint) {
        if let Some((_, slot)) = self.slots.remove(&slot_key(endpoint)) {
            if let Some(conn) = slot.lock().await.take() {
                conn.close().await;
            }
        }
    }
}

/// Connections are shared by endpoints with the same credentials and target,
/// whatever group or logical id they are configured under
fn slot_key(endpoint: &DataSourceEndpoint) -> String {
    let options = endpoint.options();
    format!(
        "{}@{}/{}",
        options.user,
        options.addr(),
        options.database.as_deref().unwrap_or_default()
    )
}

/// Map a wire-level failure onto the probe error taxonomy
pub fn classify(node: &str, err: ConnectionError) -> ProbeError {
    match err {
        ConnectionError::Server(server) if server.is_permission_denied() => {
            ProbeError::permission_denied(node, server.message)
        }
        ConnectionError::Auth(reason) => ProbeError::permission_denied(node, reason),
        ConnectionError::Server(server) => {
            ProbeError::malformed(node, format!("error {}: {}", server.code, server.message))
        }
        ConnectionError::Protocol(reason) => ProbeError::malformed(node, reason),
        e @ (ConnectionError::Connect(_)
        | ConnectionError::Io(_)
        | ConnectionError::Timeout(_)
        | ConnectionError::Disconnected) => ProbeError::unreachable(node, e.to_string()),
    }
}
