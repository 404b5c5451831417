//! Delivery of peer updates to hosts.
//!
//! Publishing is fire-and-forget: failures are reported to the caller,
//! which logs them, and nothing is retried.  Hosts converge on the next
//! topology event.

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::PublishError;
use crate::types::{Host, HostId};

/// Topic a host listens on for peer updates from `server_id`.
pub fn peer_update_topic(host: &HostId, server_id: &str) -> String {
    format!("peer/host/{}/{}", host, server_id)
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, host: &Host, topic: &str, payload: Vec<u8>)
        -> Result<(), PublishError>;
}

/// A payload on its way to one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub host_id: HostId,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Hands payloads to a bounded channel drained by [`run_publish_sink`].
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ChannelPublisher {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(
        &self,
        host: &Host,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        debug!("queueing {} bytes for {} on {}", payload.len(), host.name, topic);
        self.tx
            .send(OutboundMessage {
                host_id: host.id,
                topic: topic.to_string(),
                payload,
            })
            .await
            .map_err(|_| PublishError::ChannelClosed)
    }
}

/// Writes every queued message as a `<topic> <payload>` line until the
/// channel closes.
pub async fn run_publish_sink<W>(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut out: W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let mut line = Vec::with_capacity(msg.topic.len() + msg.payload.len() + 2);
        line.extend_from_slice(msg.topic.as_bytes());
        line.push(b' ');
        line.extend_from_slice(&msg.payload);
        line.push(b'\n');
        if let Err(e) = out.write_all(&line).await {
            error!("Failed to write update for {}: {}", msg.topic, e);
            return Err(e.into());
        }
        out.flush().await?;
    }
    info!("Publish channel closed, shutting down");
    Ok(())
}
