//! Peer-list computation for a single host.
//!
//! Three policies decide what a host sees, checked in order:
//!
//! * a **relay** sees every other peer with its addresses, unfiltered;
//! * a node **relayed** by the relay in context sees only that relay, which
//!   carries the addresses of everything it may reach;
//! * everyone else gets a direct entry per peer, ACL-filtered, with relays
//!   widened to cover what they front.
//!
//! The computation is pure ([`compute_peer_actions`], or
//! [`compute_topology_actions`] when every established relay applies);
//! [`PeerUpdater`] wraps it with the store reads and publishes around it.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::acl::AclOracle;
use crate::allowed_ips::{base_allowed_ips, Resolver, Snapshot};
use crate::error::{InvalidCall, PeerUpdateError, PublishError};
use crate::publish::{peer_update_topic, Publisher};
use crate::store::TopologyStore;
use crate::types::{Action, Client, Host, NodeId, PeerAction, PeerConfig};

/// Builds the actions `client` must receive, in publish order.
pub fn compute_peer_actions(
    client: &Client,
    relay: Option<&Client>,
    peers: &[Client],
    resolver: &Resolver<'_>,
) -> Result<Vec<PeerAction>, InvalidCall> {
    if client.node.is_relay {
        return Ok(vec![relay_view(client, peers, resolver)]);
    }
    if let Some(relay) = relay {
        if client.node.is_relayed_by(&relay.node.id) {
            return relayed_view(client, relay, peers, resolver);
        }
    }
    let behind_relay = |peer: &Client| relay.is_some_and(|r| peer.node.is_relayed_by(&r.node.id));
    Ok(vec![direct_view(client, peers, resolver, behind_relay)])
}

/// Like [`compute_peer_actions`], with every relay already established in
/// `peers` taken into account instead of a single relay in context.
///
/// A node counts as relayed only when it names the relay and the relay
/// lists it back.  Such nodes see their relay alone, and every other
/// non-relay viewer drops them.
pub fn compute_topology_actions(
    client: &Client,
    peers: &[Client],
    resolver: &Resolver<'_>,
) -> Result<Vec<PeerAction>, InvalidCall> {
    if client.node.is_relay {
        return Ok(vec![relay_view(client, peers, resolver)]);
    }
    if let Some(relay) = established_relay(client, peers) {
        return relayed_view(client, relay, peers, resolver);
    }
    let behind_relay = |peer: &Client| established_relay(peer, peers).is_some();
    Ok(vec![direct_view(client, peers, resolver, behind_relay)])
}

/// The relay in `peers` that `client` is relayed by, if both sides agree.
pub fn established_relay<'a>(client: &Client, peers: &'a [Client]) -> Option<&'a Client> {
    let relay_id = client.node.relayed_by?;
    peers.iter().find(|p| {
        p.node.id == relay_id && p.node.is_relay && p.node.relayed_nodes.contains(&client.node.id)
    })
}

fn relay_view(client: &Client, peers: &[Client], resolver: &Resolver<'_>) -> PeerAction {
    let mut action = PeerAction::new(Action::UpdatePeer);
    for peer in peers.iter().filter(|p| p.host.id != client.host.id) {
        let mut update = PeerConfig::replace_for(peer);
        update.allowed_ips = resolver.peer_allowed_ips(&peer.node);
        action.peers.push(update);
    }
    action
}

fn relayed_view(
    client: &Client,
    relay: &Client,
    peers: &[Client],
    resolver: &Resolver<'_>,
) -> Result<Vec<PeerAction>, InvalidCall> {
    if !relay.node.relayed_nodes.contains(&client.node.id) {
        return Err(InvalidCall::NotRelayedBy {
            node: client.node.id,
            relay: relay.node.id,
        });
    }

    let mut removals = PeerAction::new(Action::RemovePeer);
    removals.peers.extend(
        hidden_peers(client, relay, peers).map(|p| PeerConfig::removal(p.host.public_key)),
    );

    let mut via_relay = PeerConfig::replace_for(relay);
    via_relay.allowed_ips = base_allowed_ips(&relay.node);
    for peer in hidden_peers(client, relay, peers)
        .filter(|p| resolver.nodes_allowed(&client.node, &p.node))
    {
        via_relay
            .allowed_ips
            .extend(resolver.peer_allowed_ips(&peer.node));
    }
    let mut update = PeerAction::new(Action::UpdatePeer);
    update.peers.push(via_relay);

    Ok(vec![removals, update])
}

/// Peers a relayed client must not reach directly.
fn hidden_peers<'a>(
    client: &'a Client,
    relay: &'a Client,
    peers: &'a [Client],
) -> impl Iterator<Item = &'a Client> + 'a {
    peers
        .iter()
        .filter(move |p| p.host.id != relay.host.id && p.host.id != client.host.id)
}

fn direct_view(
    client: &Client,
    peers: &[Client],
    resolver: &Resolver<'_>,
    behind_relay: impl Fn(&Client) -> bool,
) -> PeerAction {
    let mut action = PeerAction::new(Action::UpdatePeer);
    for peer in peers.iter().filter(|p| p.host.id != client.host.id) {
        let mut update = PeerConfig::replace_for(peer);
        update.remove = !resolver.nodes_allowed(&client.node, &peer.node);
        // relayed peers are only reachable through their relay
        if behind_relay(peer) {
            update.remove = true;
        }
        if !update.remove {
            update.allowed_ips = resolver.peer_allowed_ips(&peer.node);
            if peer.node.is_relay {
                update
                    .allowed_ips
                    .extend(resolver.relay_allowed_ips(&client.node, &peer.node));
            }
        }
        action.peers.push(update);
    }
    action
}

/// Tells a host to drop `host` as a peer.
pub fn removal_action(host: &Host) -> PeerAction {
    let mut action = PeerAction::new(Action::RemovePeer);
    action.peers.push(PeerConfig::removal(host.public_key));
    action
}

/// The relay as seen by `viewer`: its own addresses plus everything behind
/// it that the viewer may reach.
pub fn relay_update_action(viewer: &Client, relay: &Client, resolver: &Resolver<'_>) -> PeerAction {
    let mut entry = PeerConfig::replace_for(relay);
    entry.allowed_ips = resolver.peer_allowed_ips(&relay.node);
    entry
        .allowed_ips
        .extend(resolver.relay_allowed_ips(&viewer.node, &relay.node));
    let mut action = PeerAction::new(Action::UpdatePeer);
    action.peers.push(entry);
    action
}

/// Computes and publishes peer updates for hosts of a network.
#[derive(Clone)]
pub struct PeerUpdater {
    store: Arc<dyn TopologyStore>,
    acl: Arc<dyn AclOracle>,
    publisher: Arc<dyn Publisher>,
    server_id: Arc<str>,
    cancel: CancellationToken,
}

impl PeerUpdater {
    pub fn new(
        store: Arc<dyn TopologyStore>,
        acl: Arc<dyn AclOracle>,
        publisher: Arc<dyn Publisher>,
        server_id: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            store,
            acl,
            publisher,
            server_id: server_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// A copy whose publishes stop once `token` is cancelled.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    pub fn store(&self) -> &Arc<dyn TopologyStore> {
        &self.store
    }

    /// Snapshot of `network` built from an already fetched client list.
    ///
    /// External clients that cannot be listed only narrow ingress ranges,
    /// so the failure is logged rather than returned.
    pub async fn snapshot(&self, network: &str, peers: &[Client]) -> Snapshot {
        let external = match self.store.external_clients(network).await {
            Ok(ec) => ec,
            Err(e) => {
                warn!("network {}: external clients unavailable: {}", network, e);
                Vec::new()
            }
        };
        Snapshot::new(peers, external)
    }

    /// Publishes `client`'s full peer list.
    ///
    /// `relay` is the relay being set up, if any.  Nothing is published when
    /// the call is invalid, when encoding fails or when cancelled first.
    /// Errors are logged here; callers only need them for accounting.
    pub async fn compute_and_publish(
        &self,
        client: &Client,
        relay: Option<&Client>,
        peers: &[Client],
    ) -> Result<usize, PeerUpdateError> {
        let snapshot = self.snapshot(&client.node.network, peers).await;
        let resolver = Resolver::new(&snapshot, self.acl.as_ref());
        let actions = match compute_peer_actions(client, relay, peers, &resolver) {
            Ok(actions) => actions,
            Err(e) => {
                error!("invalid peer update for {}: {}", client.host.name, e);
                return Err(e.into());
            }
        };
        self.publish_actions(&client.host, &actions).await
    }

    /// Publishes `client`'s peer list as the current topology dictates,
    /// honouring every established relay of the network.
    pub async fn publish_topology_view(
        &self,
        client: &Client,
        peers: &[Client],
    ) -> Result<usize, PeerUpdateError> {
        let snapshot = self.snapshot(&client.node.network, peers).await;
        let resolver = Resolver::new(&snapshot, self.acl.as_ref());
        let actions = match compute_topology_actions(client, peers, &resolver) {
            Ok(actions) => actions,
            Err(e) => {
                error!("invalid peer update for {}: {}", client.host.name, e);
                return Err(e.into());
            }
        };
        self.publish_actions(&client.host, &actions).await
    }

    /// Tells every peer except `host` itself to drop `host`.
    ///
    /// Returns how many peers were told; failures are logged and skipped.
    pub async fn remove_host_from_peers(&self, host: &Host, peers: &[Client]) -> usize {
        let action = removal_action(host);
        let mut sent = 0;
        for peer in peers.iter().filter(|p| p.host.id != host.id) {
            match self.publish_actions(&peer.host, std::slice::from_ref(&action)).await {
                Ok(_) => sent += 1,
                Err(PeerUpdateError::Cancelled) => break,
                Err(e) => warn!("remove {} from {}: {}", host.name, peer.host.name, e),
            }
        }
        sent
    }

    /// Pushes the relay entry to every peer except the relay and `skip`.
    pub async fn publish_relay_to_peers(
        &self,
        relay: &Client,
        peers: &[Client],
        skip: &HashSet<NodeId>,
    ) -> usize {
        let snapshot = self.snapshot(&relay.node.network, peers).await;
        let resolver = Resolver::new(&snapshot, self.acl.as_ref());
        let mut sent = 0;
        for peer in peers
            .iter()
            .filter(|p| p.host.id != relay.host.id && !skip.contains(&p.node.id))
        {
            let action = relay_update_action(peer, relay, &resolver);
            match self.publish_actions(&peer.host, std::slice::from_ref(&action)).await {
                Ok(_) => sent += 1,
                Err(PeerUpdateError::Cancelled) => break,
                Err(e) => warn!("relay update to {}: {}", peer.host.name, e),
            }
        }
        sent
    }

    /// Encodes every action up front, then publishes them in order.
    async fn publish_actions(
        &self,
        host: &Host,
        actions: &[PeerAction],
    ) -> Result<usize, PeerUpdateError> {
        let payloads = actions
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                error!("marshal peer update for {}: {}", host.name, e);
                PeerUpdateError::from(PublishError::from(e))
            })?;

        let topic = peer_update_topic(&host.id, &self.server_id);
        for (sent, payload) in payloads.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                if sent == 0 {
                    debug!("update for {} cancelled before publish", host.name);
                } else {
                    warn!(
                        "update for {} cancelled after {} of {} message(s)",
                        host.name,
                        sent,
                        actions.len()
                    );
                }
                return Err(PeerUpdateError::Cancelled);
            }
            if let Err(e) = self.publisher.publish(host, &topic, payload).await {
                error!("publish to {} failed: {}", topic, e);
                return Err(e.into());
            }
        }
        info!("published {} peer update(s) to {}", actions.len(), topic);
        Ok(actions.len())
    }
}
