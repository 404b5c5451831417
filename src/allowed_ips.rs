//! Allowed-IP resolution for relays and gateways.
//!
//! Everything here is synchronous and works on a [`Snapshot`] taken once
//! per update pass.  Lookups that fail and stored ranges that do not parse
//! are logged and skipped; one bad record never empties a whole peer entry.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use log::{debug, warn};

use crate::acl::AclOracle;
use crate::types::{AllowedIps, Client, ExternalClient, Node, NodeId};

/// Read-only view of one network used for a single computation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    nodes: HashMap<NodeId, Node>,
    external_clients: Vec<ExternalClient>,
}

impl Snapshot {
    pub fn new(clients: &[Client], external_clients: Vec<ExternalClient>) -> Self {
        Self {
            nodes: clients
                .iter()
                .map(|c| (c.node.id, c.node.clone()))
                .collect(),
            external_clients,
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn external_clients(&self) -> &[ExternalClient] {
        &self.external_clients
    }
}

/// The node's own addresses as host routes.
pub fn base_allowed_ips(node: &Node) -> AllowedIps {
    let mut ips = AllowedIps::new();
    if let Some(v4) = node.address {
        ips.insert(IpNet::V4(Ipv4Net::from(v4)));
    }
    if let Some(v6) = node.address6 {
        ips.insert(IpNet::V6(Ipv6Net::from(v6)));
    }
    ips
}

/// Egress ranges of a gateway, kept exactly as stored (host bits included).
pub fn egress_ranges(node: &Node) -> AllowedIps {
    let mut ips = AllowedIps::new();
    for range in &node.egress_gateway_ranges {
        match range.trim().parse::<IpNet>() {
            Ok(net) => {
                ips.insert(net);
            }
            Err(e) => warn!("node {}: skipping egress range {:?}: {}", node.id, range, e),
        }
    }
    ips
}

/// Addresses of the external clients terminated by `node`.
pub fn ingress_ranges(node: &Node, external_clients: &[ExternalClient]) -> AllowedIps {
    let mut ips = AllowedIps::new();
    for ec in external_clients
        .iter()
        .filter(|ec| ec.ingress_gateway_id == node.id)
    {
        for stored in [&ec.address, &ec.address6] {
            if stored.is_empty() {
                continue;
            }
            match parse_lease(stored) {
                Some(net) => {
                    ips.insert(net);
                }
                None => warn!(
                    "external client {}: skipping malformed address {:?}",
                    ec.client_id, stored
                ),
            }
        }
    }
    ips
}

/// Leases may be stored as CIDRs or as bare addresses.
fn parse_lease(stored: &str) -> Option<IpNet> {
    let stored = stored.trim();
    stored
        .parse::<IpNet>()
        .ok()
        .or_else(|| stored.parse::<IpAddr>().ok().map(IpNet::from))
}

/// Resolves what a viewer may route through relays.
pub struct Resolver<'a> {
    snapshot: &'a Snapshot,
    acl: &'a dyn AclOracle,
}

impl<'a> Resolver<'a> {
    pub fn new(snapshot: &'a Snapshot, acl: &'a dyn AclOracle) -> Self {
        Self { snapshot, acl }
    }

    pub fn nodes_allowed(&self, a: &Node, b: &Node) -> bool {
        self.acl.nodes_allowed(&a.network, &a.id, &b.id)
    }

    /// A peer's own addresses plus the gateway ranges it advertises.
    pub fn peer_allowed_ips(&self, node: &Node) -> AllowedIps {
        let mut ips = base_allowed_ips(node);
        if node.is_egress_gateway {
            ips.extend(egress_ranges(node));
        }
        if node.is_ingress_gateway {
            ips.extend(ingress_ranges(node, self.snapshot.external_clients()));
        }
        ips
    }

    /// Everything `relay` fronts that `viewer` is itself allowed to see,
    /// following nested relays.
    ///
    /// The viewer's own addresses are never included, and a node reached a
    /// second time is treated as a malformed cycle and not expanded again.
    pub fn relay_allowed_ips(&self, viewer: &Node, relay: &Node) -> AllowedIps {
        let mut visited = HashSet::from([viewer.id, relay.id]);
        let mut ips = AllowedIps::new();
        self.collect(viewer, relay, &mut visited, &mut ips);
        ips
    }

    fn collect(
        &self,
        viewer: &Node,
        relay: &Node,
        visited: &mut HashSet<NodeId>,
        ips: &mut AllowedIps,
    ) {
        for id in &relay.relayed_nodes {
            let Some(node) = self.snapshot.node(id) else {
                warn!("relay {}: relayed node {} not found", relay.id, id);
                continue;
            };
            if !visited.insert(node.id) {
                if node.id != viewer.id {
                    warn!(
                        "relay {}: node {} reached twice, relay chain truncated",
                        relay.id, node.id
                    );
                }
                continue;
            }
            if !self.nodes_allowed(viewer, node) {
                debug!("node {} hidden from {} by acl", node.id, viewer.id);
                continue;
            }
            ips.extend(self.peer_allowed_ips(node));
            if node.is_relay {
                self.collect(viewer, node, visited, ips);
            }
        }
    }
}
