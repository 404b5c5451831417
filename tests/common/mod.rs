#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use wgmesh::{
    Client, Host, HostId, MemoryStore, Node, NodeId, OutboundMessage, PeerAction, PeerUpdater,
    PublicKey, RelayOrchestrator, StaticAcl, TopologyDocument,
};

pub const SERVER_ID: &str = "test-server";

static NEXT_KEY: AtomicU8 = AtomicU8::new(1);

pub fn client(network: &str, v4: &str) -> Client {
    let byte = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
    let host = Host {
        id: HostId::new(),
        name: format!("host-{v4}"),
        public_key: PublicKey::from_bytes([byte; 32]),
        endpoint_ip: "198.51.100.7".parse().unwrap(),
        listen_port: 51820,
    };
    let node = Node {
        id: NodeId::new(),
        host_id: host.id,
        network: network.to_string(),
        address: Some(v4.parse().unwrap()),
        address6: None,
        is_relay: false,
        relayed_nodes: Vec::new(),
        is_relayed: false,
        relayed_by: None,
        is_egress_gateway: false,
        egress_gateway_ranges: Vec::new(),
        is_ingress_gateway: false,
        persistent_keepalive: Duration::from_secs(25),
    };
    Client::new(host, node)
}

pub fn make_relay(relay: &mut Client, relayed: &mut [&mut Client]) {
    relay.node.is_relay = true;
    for c in relayed.iter_mut() {
        c.node.is_relayed = true;
        c.node.relayed_by = Some(relay.node.id);
        relay.node.relayed_nodes.push(c.node.id);
    }
}

pub fn document(clients: &[&Client]) -> TopologyDocument {
    TopologyDocument {
        hosts: clients.iter().map(|c| c.host.clone()).collect(),
        nodes: clients.iter().map(|c| c.node.clone()).collect(),
        ..Default::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub orchestrator: RelayOrchestrator,
    pub rx: mpsc::Receiver<OutboundMessage>,
}

impl Harness {
    pub fn new(doc: &TopologyDocument) -> Self {
        let store = Arc::new(MemoryStore::from_document(doc));
        let acl = Arc::new(StaticAcl::from_pairs(doc.denied.iter().copied()));
        let (publisher, rx) = wgmesh::ChannelPublisher::new(1024);
        let updater = PeerUpdater::new(store.clone(), acl, Arc::new(publisher), SERVER_ID);
        Self {
            store,
            orchestrator: RelayOrchestrator::new(updater),
            rx,
        }
    }

    /// Everything published so far, grouped per destination host in
    /// publish order.
    pub fn drain(&mut self) -> HashMap<HostId, Vec<PeerAction>> {
        let mut by_host: HashMap<HostId, Vec<PeerAction>> = HashMap::new();
        while let Ok(msg) = self.rx.try_recv() {
            assert_eq!(
                msg.topic,
                format!("peer/host/{}/{}", msg.host_id, SERVER_ID)
            );
            let action: PeerAction = serde_json::from_slice(&msg.payload).unwrap();
            by_host.entry(msg.host_id).or_default().push(action);
        }
        by_host
    }
}
