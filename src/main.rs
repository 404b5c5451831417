//! wgmesh daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

use wgmesh::{
    run_event_loop, run_publish_sink, ChannelPublisher, Config, Dispatcher, MemoryMetricsStore,
    MemoryStore, PeerUpdater, RelayOrchestrator, StaticAcl, TopologyDocument,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting wgmesh with config: {:?}", cfg);

    // Topology snapshot
    let doc = match &cfg.topology_file {
        Some(path) => TopologyDocument::load(path)?,
        None => TopologyDocument::default(),
    };
    info!(
        "Loaded {} hosts, {} nodes, {} external clients",
        doc.hosts.len(),
        doc.nodes.len(),
        doc.external_clients.len()
    );
    let store = Arc::new(MemoryStore::from_document(&doc));
    let acl = Arc::new(StaticAcl::from_pairs(doc.denied.iter().copied()));

    // Outbound updates
    let (publisher, publish_rx) = ChannelPublisher::new(cfg.publish_buffer);
    let sink_handle = tokio::spawn(async move {
        if let Err(e) = run_publish_sink(publish_rx, tokio::io::stdout()).await {
            error!("Publish sink failed: {}", e);
        }
    });

    let updater = PeerUpdater::new(store, acl, Arc::new(publisher), cfg.server_id.as_str());
    let orchestrator = RelayOrchestrator::new(updater);
    let dispatcher = Dispatcher::new(orchestrator.clone(), Arc::new(MemoryMetricsStore::new()));

    // Control events
    let events_handle = tokio::spawn(async move {
        if let Err(e) = run_event_loop(tokio::io::stdin(), dispatcher).await {
            error!("Control event loop failed: {}", e);
        }
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    orchestrator.shutdown();
    events_handle.abort();
    sink_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}
