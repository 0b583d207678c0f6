//! Hierarchical coordination store
//!
//! Paths look like `/MGR-group/config`. Each store handle is bound to a
//! namespace that prefixes every path it touches, so several deployments can
//! share one backing store without colliding.
//!
//! A node written through [`CoordinationStore::acquire_lease`] behaves like an
//! ephemeral node: once its holder stops renewing it for `ttl`, it reads as
//! absent and any instance may claim it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::error::CoordinationError;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<String>, CoordinationError>;

    /// Create or overwrite `path`
    async fn persist(&self, path: &str, value: &str) -> Result<(), CoordinationError>;

    /// Create `path` unless it exists; true when this call created it
    async fn create_if_absent(&self, path: &str, value: &str) -> Result<bool, CoordinationError>;

    /// Hold `path` for `owner` until `ttl` passes without another call
    ///
    /// Claims the node when it is vacant or its lease ran out, renews it when
    /// `owner` already holds it. True when `owner` holds it afterwards.
    async fn acquire_lease(
        &self,
        path: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError>;

    /// Remove `path` and everything below it
    async fn remove(&self, path: &str) -> Result<(), CoordinationError>;

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        Ok(self.get(path).await?.is_some())
    }
}

/// In-process store
///
/// Handles created with [`MemoryStore::with_namespace`] share the same data,
/// which is how several discovery instances of one process see each other.
pub struct MemoryStore {
    namespace: String,
    shared: Arc<RwLock<Data>>,
}

#[derive(Default)]
struct Data {
    nodes: BTreeMap<String, String>,
    /// Expiry of leased nodes, by full path
    leases: HashMap<String, Instant>,
}

impl Data {
    fn live(&self, full: &str) -> Option<&String> {
        match self.leases.get(full) {
            Some(expiry) if *expiry <= Instant::now() => None,
            _ => self.nodes.get(full),
        }
    }

    fn put(&mut self, full: String, value: String) {
        self.leases.remove(&full);
        self.nodes.insert(full, value);
    }
}

impl MemoryStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            shared: Arc::default(),
        }
    }

    /// Another handle onto the same data under `namespace`
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            shared: self.shared.clone(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn full_path(&self, path: &str) -> Result<String, CoordinationError> {
        validate_path(path)?;
        if self.namespace.is_empty() {
            Ok(path.to_string())
        } else {
            Ok(format!("/{}{}", self.namespace, path))
        }
    }
}

fn validate_path(path: &str) -> Result<(), CoordinationError> {
    let valid = path.starts_with('/')
        && path.len() > 1
        && !path.ends_with('/')
        && !path[1..].split('/').any(str::is_empty);
    if valid {
        Ok(())
    } else {
        Err(CoordinationError::InvalidPath(path.to_string()))
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<String>, CoordinationError> {
        let full = self.full_path(path)?;
        Ok(self.shared.read().live(&full).cloned())
    }

    async fn persist(&self, path: &str, value: &str) -> Result<(), CoordinationError> {
        let full = self.full_path(path)?;
        self.shared.write().put(full, value.to_string());
        Ok(())
    }

    async fn create_if_absent(&self, path: &str, value: &str) -> Result<bool, CoordinationError> {
        let full = self.full_path(path)?;
        let mut data = self.shared.write();
        if data.live(&full).is_some() {
            return Ok(false);
        }
        data.put(full, value.to_string());
        Ok(true)
    }

    async fn acquire_lease(
        &self,
        path: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let full = self.full_path(path)?;
        let mut data = self.shared.write();
        if data.live(&full).is_some_and(|holder| holder != owner) {
            return Ok(false);
        }
        data.nodes.insert(full.clone(), owner.to_string());
        data.leases.insert(full, Instant::now() + ttl);
        Ok(true)
    }

    async fn remove(&self, path: &str) -> Result<(), CoordinationError> {
        let full = self.full_path(path)?;
        let prefix = format!("{}/", full);
        let mut data = self.shared.write();
        let doomed: Vec<String> = data
            .nodes
            .keys()
            .filter(|k| **k == full || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &doomed {
            data.nodes.remove(key);
            data.leases.remove(key);
        }
        Ok(())
    }
}
