use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::TopologyStore;
use crate::error::StoreError;
use crate::types::{Client, ExternalClient, Host, HostId, Node, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read topology document: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse topology document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialized form of a whole topology, as loaded by the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyDocument {
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub external_clients: Vec<ExternalClient>,
    /// Node pairs that must not see each other.
    #[serde(default)]
    pub denied: Vec<(NodeId, NodeId)>,
}

impl TopologyDocument {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Default)]
struct Inner {
    hosts: HashMap<HostId, Host>,
    nodes: Vec<Node>,
    external_clients: Vec<ExternalClient>,
}

/// Topology held in process memory.
///
/// Nodes keep their insertion order so client lists, and therefore the
/// payloads built from them, are stable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: &TopologyDocument) -> Self {
        let inner = Inner {
            hosts: doc.hosts.iter().map(|h| (h.id, h.clone())).collect(),
            nodes: doc.nodes.clone(),
            external_clients: doc.external_clients.clone(),
        };
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub async fn insert_host(&self, host: Host) {
        self.inner.write().await.hosts.insert(host.id, host);
    }

    /// Inserts or replaces a node, keeping the original position on replace.
    pub async fn upsert_node(&self, node: Node) {
        let mut inner = self.inner.write().await;
        match inner.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => inner.nodes.push(node),
        }
    }
}

#[async_trait]
impl TopologyStore for MemoryStore {
    async fn network_clients(&self, network: &str) -> Result<Vec<Client>, StoreError> {
        let inner = self.inner.read().await;
        let mut found = false;
        let mut clients = Vec::new();
        for node in inner.nodes.iter().filter(|n| n.network == network) {
            found = true;
            match inner.hosts.get(&node.host_id) {
                Some(host) => clients.push(Client::new(host.clone(), node.clone())),
                None => warn!("node {} references missing host {}", node.id, node.host_id),
            }
        }
        if !found {
            return Err(StoreError::NetworkNotFound(network.to_string()));
        }
        debug!("network {} has {} clients", network, clients.len());
        Ok(clients)
    }

    async fn node(&self, id: &NodeId) -> Result<Node, StoreError> {
        let inner = self.inner.read().await;
        inner
            .nodes
            .iter()
            .find(|n| &n.id == id)
            .cloned()
            .ok_or(StoreError::NodeNotFound(*id))
    }

    async fn host(&self, id: &HostId) -> Result<Host, StoreError> {
        let inner = self.inner.read().await;
        inner
            .hosts
            .get(id)
            .cloned()
            .ok_or(StoreError::HostNotFound(*id))
    }

    async fn external_clients(&self, network: &str) -> Result<Vec<ExternalClient>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .external_clients
            .iter()
            .filter(|ec| ec.network == network)
            .cloned()
            .collect())
    }
}
