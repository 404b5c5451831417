//! Error types for the control plane.

use thiserror::Error;

use crate::types::{HostId, NetworkId, NodeId};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("host not found: {0}")]
    HostNotFound(HostId),

    #[error("network not found: {0}")]
    NetworkNotFound(NetworkId),

    #[error("topology store unavailable: {0}")]
    Unavailable(String),
}

/// A WireGuard public key that did not decode.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid base64 key: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("key must be 32 bytes, got {0}")]
    Length(usize),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode peer update: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publish channel closed")]
    ChannelClosed,
}

/// A peer update was requested for a topology it does not apply to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidCall {
    #[error("node {node} is not in the relayed list of relay {relay}")]
    NotRelayedBy { node: NodeId, relay: NodeId },
}

/// Why a single host's update was not (fully) published.
#[derive(Debug, Error)]
pub enum PeerUpdateError {
    #[error(transparent)]
    InvalidCall(#[from] InvalidCall),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Lookup(#[from] StoreError),

    #[error("update cancelled before publish")]
    Cancelled,
}

/// Failures that stop a broadcast before any per-host work starts.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to fetch clients of network {network}: {source}")]
    FetchClients {
        network: NetworkId,
        #[source]
        source: StoreError,
    },

    #[error("relay node {0} is not a client of the network")]
    RelayNotInNetwork(NodeId),
}

pub type Result<T, E = BroadcastError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a control event could not be applied.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
