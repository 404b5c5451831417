//! Topology fixtures shared by unit tests.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::types::{Client, Host, HostId, Node, NodeId, PublicKey};

static NEXT_KEY: AtomicU8 = AtomicU8::new(1);

/// A client in network `n1` with the given IPv4 address and a fresh key.
pub fn client(v4: &str) -> Client {
    let byte = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
    let host = Host {
        id: HostId::new(),
        name: format!("host-{v4}"),
        public_key: PublicKey::from_bytes([byte; 32]),
        endpoint_ip: "198.51.100.1".parse().unwrap(),
        listen_port: 51820,
    };
    let node = Node {
        id: NodeId::new(),
        host_id: host.id,
        network: "n1".to_string(),
        address: Some(v4.parse().unwrap()),
        address6: None,
        is_relay: false,
        relayed_nodes: Vec::new(),
        is_relayed: false,
        relayed_by: None,
        is_egress_gateway: false,
        egress_gateway_ranges: Vec::new(),
        is_ingress_gateway: false,
        persistent_keepalive: Duration::from_secs(20),
    };
    Client::new(host, node)
}

/// Makes `relay` front every client in `relayed`, keeping both sides of the
/// relationship in sync.
pub fn make_relay(relay: &mut Client, relayed: &mut [&mut Client]) {
    relay.node.is_relay = true;
    for c in relayed.iter_mut() {
        c.node.is_relayed = true;
        c.node.relayed_by = Some(relay.node.id);
        relay.node.relayed_nodes.push(c.node.id);
    }
}
