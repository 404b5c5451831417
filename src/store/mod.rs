use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Client, ExternalClient, Host, HostId, Node, NodeId};

pub mod memory;
pub use memory::{DocumentError, MemoryStore, TopologyDocument};

/// Read access to the persisted mesh topology.
///
/// Each call must be internally consistent; consecutive calls may observe
/// different states.
#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Every host/node pair in `network`.
    async fn network_clients(&self, network: &str) -> Result<Vec<Client>, StoreError>;

    async fn node(&self, id: &NodeId) -> Result<Node, StoreError>;

    async fn host(&self, id: &HostId) -> Result<Host, StoreError>;

    /// Ingress-gateway address leases of `network`.
    async fn external_clients(&self, network: &str) -> Result<Vec<ExternalClient>, StoreError>;
}
