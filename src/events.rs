//! Control events that trigger peer broadcasts.
//!
//! Events arrive as one JSON object per line, tagged by `event`:
//!
//! ```json
//! {"event":"relay_established","network":"n1","relay_node_id":"…","relayed_nodes":["…"]}
//! {"event":"relay_removed","network":"n1"}
//! {"event":"peers_changed","network":"n1"}
//! {"event":"metrics_reported","node_id":"…","metrics":{…}}
//! ```

use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::error::DispatchError;
use crate::metrics::{Metrics, MetricsStore};
use crate::relay::{BroadcastSummary, RelayOrchestrator};
use crate::types::{NetworkId, NodeId, RelayRequest};

/// Longest accepted event line.
const MAX_LINE_LENGTH: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    RelayEstablished(RelayRequest),
    RelayRemoved { network: NetworkId },
    PeersChanged { network: NetworkId },
    MetricsReported { node_id: NodeId, metrics: Metrics },
}

/// Routes control events to the orchestrator and the metrics store.
#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: RelayOrchestrator,
    metrics: Arc<dyn MetricsStore>,
}

impl Dispatcher {
    pub fn new(orchestrator: RelayOrchestrator, metrics: Arc<dyn MetricsStore>) -> Self {
        Self {
            orchestrator,
            metrics,
        }
    }

    /// Applies one event. Broadcast events report their task tally.
    pub async fn dispatch(
        &self,
        event: ControlEvent,
    ) -> Result<Option<BroadcastSummary>, DispatchError> {
        match event {
            ControlEvent::RelayEstablished(req) => {
                Ok(Some(self.orchestrator.on_relay_established(&req).await?))
            }
            ControlEvent::RelayRemoved { network } => {
                Ok(Some(self.orchestrator.on_relay_removed(&network).await?))
            }
            ControlEvent::PeersChanged { network } => {
                Ok(Some(self.orchestrator.on_peers_changed(&network).await?))
            }
            ControlEvent::MetricsReported { node_id, metrics } => {
                self.metrics.update(&node_id, &metrics).await?;
                Ok(None)
            }
        }
    }
}

/// Reads newline-delimited events from `reader` until EOF.
///
/// Lines that fail to parse and events that fail to apply are logged; the
/// loop only stops on a read error or end of input.
pub async fn run_event_loop<R>(reader: R, dispatcher: Dispatcher) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    while let Some(line) = lines.next().await {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: ControlEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed control event: {}", e);
                continue;
            }
        };
        debug!("Received control event: {:?}", event);
        match dispatcher.dispatch(event).await {
            Ok(Some(summary)) => info!(
                "Broadcast finished: {} dispatched, {} failed",
                summary.dispatched, summary.failed
            ),
            Ok(None) => {}
            Err(e) => error!("Control event failed: {}", e),
        }
    }
    info!("Control event stream closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_events() {
        let relay: NodeId = "3b2a8f0e-8d7c-4c55-a1f2-0c6e9d4b5a17".parse().unwrap();
        let event: ControlEvent = serde_json::from_str(&format!(
            r#"{{"event":"relay_established","network":"n1","relay_node_id":"{relay}","relayed_nodes":[]}}"#
        ))
        .unwrap();
        assert_eq!(
            event,
            ControlEvent::RelayEstablished(RelayRequest {
                network: "n1".into(),
                relay_node_id: relay,
                relayed_nodes: Vec::new(),
            })
        );

        let event: ControlEvent =
            serde_json::from_str(r#"{"event":"relay_removed","network":"n1"}"#).unwrap();
        assert_eq!(
            event,
            ControlEvent::RelayRemoved {
                network: "n1".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(serde_json::from_str::<ControlEvent>(r#"{"event":"reboot"}"#).is_err());
    }
}
