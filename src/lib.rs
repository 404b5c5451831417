//! Peer-topology control plane for a WireGuard mesh.
//!
//! Given the hosts and nodes of a network, with their relay and gateway
//! roles, this crate derives the WireGuard peer configuration every host
//! must hold and pushes it to each host's update topic.  Relay creation and
//! removal fan out as independent, cancellable per-host tasks.

pub mod acl;
pub mod allowed_ips;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod peer_update;
pub mod publish;
pub mod relay;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use acl::{AclOracle, StaticAcl};
pub use allowed_ips::{base_allowed_ips, Resolver, Snapshot};
pub use config::Config;
pub use error::{
    BroadcastError, DispatchError, InvalidCall, KeyError, MetricsError, PeerUpdateError,
    PublishError, StoreError,
};
pub use events::{run_event_loop, ControlEvent, Dispatcher};
pub use metrics::{MemoryMetricsStore, Metric, Metrics, MetricsStore};
pub use peer_update::{compute_peer_actions, compute_topology_actions, PeerUpdater};
pub use publish::{peer_update_topic, run_publish_sink, ChannelPublisher, OutboundMessage, Publisher};
pub use relay::{BroadcastSummary, RelayOrchestrator};
pub use store::{MemoryStore, TopologyDocument, TopologyStore};
pub use types::{
    Action, AllowedIps, Client, Endpoint, ExternalClient, Host, HostId, Node, NodeId, PeerAction,
    PeerConfig, PublicKey, RelayRequest,
};
