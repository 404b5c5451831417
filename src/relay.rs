//! Broadcasts triggered by relay lifecycle changes.
//!
//! Each affected host gets its own task.  Tasks share only the read-only
//! client list, are joined before the broadcast returns, and observe a
//! common shutdown token so a caller can abandon the whole pass.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{BroadcastError, InvalidCall, PeerUpdateError, Result};
use crate::peer_update::PeerUpdater;
use crate::types::{Client, NodeId, RelayRequest};

/// Per-task tally of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BroadcastSummary {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// How a network-wide flush treats relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flush {
    /// No relay context; every host gets direct entries.
    Direct,
    /// Established relays stay in force.
    Topology,
}

impl Flush {
    async fn publish(
        self,
        updater: &PeerUpdater,
        client: &Client,
        clients: &[Client],
    ) -> std::result::Result<usize, PeerUpdateError> {
        match self {
            Flush::Direct => updater.compute_and_publish(client, None, clients).await,
            Flush::Topology => updater.publish_topology_view(client, clients).await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl From<std::result::Result<usize, PeerUpdateError>> for TaskOutcome {
    fn from(res: std::result::Result<usize, PeerUpdateError>) -> Self {
        match res {
            Ok(_) => TaskOutcome::Completed,
            Err(PeerUpdateError::Cancelled) => TaskOutcome::Cancelled,
            Err(_) => TaskOutcome::Failed,
        }
    }
}

/// Fans peer updates out to every host a relay change affects.
#[derive(Clone)]
pub struct RelayOrchestrator {
    updater: PeerUpdater,
    shutdown: CancellationToken,
}

impl RelayOrchestrator {
    pub fn new(updater: PeerUpdater) -> Self {
        Self {
            updater,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancels every in-flight and future task of this orchestrator.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn fetch_clients(&self, network: &str) -> Result<Vec<Client>> {
        self.updater
            .store()
            .network_clients(network)
            .await
            .map_err(|source| BroadcastError::FetchClients {
                network: network.to_string(),
                source,
            })
    }

    /// Hides the newly relayed nodes behind their relay.
    ///
    /// Every relayed node is dropped from the other peers' lists and gets a
    /// relay-only view; afterwards the rest of the network learns the relay's
    /// widened allowed IPs.  A relayed node that cannot be resolved is
    /// skipped.
    pub async fn on_relay_established(&self, req: &RelayRequest) -> Result<BroadcastSummary> {
        let clients = Arc::new(self.fetch_clients(&req.network).await?);
        let relay = clients
            .iter()
            .find(|c| c.node.id == req.relay_node_id)
            .cloned()
            .ok_or(BroadcastError::RelayNotInNetwork(req.relay_node_id))?;
        let relay = Arc::new(relay);
        let others: Arc<Vec<Client>> = Arc::new(
            clients
                .iter()
                .filter(|c| c.node.id != relay.node.id)
                .cloned()
                .collect(),
        );

        info!(
            "relay {} established in {} for {} node(s)",
            relay.host.name,
            req.network,
            req.relayed_nodes.len()
        );

        let mut summary = BroadcastSummary::default();
        let mut tasks = JoinSet::new();
        for &node_id in &req.relayed_nodes {
            let (token, updater) = self.task_context();
            let clients = Arc::clone(&clients);
            let others = Arc::clone(&others);
            let relay = Arc::clone(&relay);
            summary.dispatched += 1;
            tasks.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => TaskOutcome::Cancelled,
                    outcome = hide_behind_relay(&updater, node_id, &relay, &clients, &others) => outcome,
                }
            });
        }
        join_all(&mut tasks, &mut summary).await;

        if self.shutdown.is_cancelled() {
            warn!("relay broadcast for {} cancelled", relay.host.name);
            return Ok(summary);
        }
        let skip: HashSet<NodeId> = req.relayed_nodes.iter().copied().collect();
        let sent = self
            .updater
            .with_cancellation(self.shutdown.child_token())
            .publish_relay_to_peers(&relay, &clients, &skip)
            .await;
        debug!("relay {} announced to {} peer(s)", relay.host.name, sent);
        Ok(summary)
    }

    /// Recomputes every host of `network` without relay context, so hosts
    /// drop relay-only filtering and reconnect directly.
    pub async fn on_relay_removed(&self, network: &str) -> Result<BroadcastSummary> {
        info!("relay removed in {}, flushing peers", network);
        self.flush_network(network, Flush::Direct).await
    }

    /// Generic peer-list change: recompute every host of `network`, keeping
    /// nodes behind an established relay hidden.
    pub async fn on_peers_changed(&self, network: &str) -> Result<BroadcastSummary> {
        debug!("peers changed in {}", network);
        self.flush_network(network, Flush::Topology).await
    }

    async fn flush_network(&self, network: &str, flush: Flush) -> Result<BroadcastSummary> {
        let clients = Arc::new(self.fetch_clients(network).await?);
        let mut summary = BroadcastSummary::default();
        let mut tasks = JoinSet::new();
        for index in 0..clients.len() {
            let (token, updater) = self.task_context();
            let clients = Arc::clone(&clients);
            summary.dispatched += 1;
            tasks.spawn(async move {
                let client = &clients[index];
                tokio::select! {
                    _ = token.cancelled() => TaskOutcome::Cancelled,
                    res = flush.publish(&updater, client, &clients) => TaskOutcome::from(res),
                }
            });
        }
        join_all(&mut tasks, &mut summary).await;
        info!(
            "flushed {}: {} ok, {} failed, {} cancelled",
            network, summary.completed, summary.failed, summary.cancelled
        );
        Ok(summary)
    }

    fn task_context(&self) -> (CancellationToken, PeerUpdater) {
        let token = self.shutdown.child_token();
        let updater = self.updater.with_cancellation(token.clone());
        (token, updater)
    }
}

async fn hide_behind_relay(
    updater: &PeerUpdater,
    node_id: NodeId,
    relay: &Client,
    clients: &[Client],
    others: &[Client],
) -> TaskOutcome {
    let node = match updater.store().node(&node_id).await {
        Ok(node) => node,
        Err(e) => {
            warn!("relayed node {} skipped: {}", node_id, e);
            return TaskOutcome::Failed;
        }
    };
    let host = match updater.store().host(&node.host_id).await {
        Ok(host) => host,
        Err(e) => {
            warn!("relayed node {} skipped: {}", node_id, e);
            return TaskOutcome::Failed;
        }
    };
    let relayed = Client::new(host, node);
    if !relay.node.relayed_nodes.contains(&node_id) || !relayed.node.is_relayed_by(&relay.node.id) {
        let e = InvalidCall::NotRelayedBy {
            node: node_id,
            relay: relay.node.id,
        };
        error!("not hiding {}: {}", relayed.host.name, e);
        return TaskOutcome::Failed;
    }

    updater.remove_host_from_peers(&relayed.host, others).await;
    updater
        .compute_and_publish(&relayed, Some(relay), clients)
        .await
        .into()
}

async fn join_all(tasks: &mut JoinSet<TaskOutcome>, summary: &mut BroadcastSummary) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => summary.record(outcome),
            Err(e) => {
                error!("peer update task failed: {}", e);
                summary.failed += 1;
            }
        }
    }
}
