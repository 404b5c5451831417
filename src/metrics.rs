//! Per-node connectivity metrics reported by hosts.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::MetricsError;
use crate::types::NodeId;

/// Connectivity from the reporting node to one peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metric {
    pub latency_ms: i64,
    pub total_time: i64,
    pub uptime: i64,
    pub percent_up: f64,
    /// Seconds.
    pub actual_uptime: u64,
    pub connected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub network: String,
    pub node_id: Option<NodeId>,
    pub node_name: String,
    pub connectivity: BTreeMap<NodeId, Metric>,
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// A node without stored metrics reads as empty metrics.
    async fn get(&self, node: &NodeId) -> Result<Metrics, MetricsError>;

    async fn update(&self, node: &NodeId, metrics: &Metrics) -> Result<(), MetricsError>;

    /// Returns whether a record existed.
    async fn delete(&self, node: &NodeId) -> Result<bool, MetricsError>;
}

/// Metrics kept as encoded records, the way a key-value table holds them.
#[derive(Debug, Default)]
pub struct MemoryMetricsStore {
    records: RwLock<HashMap<NodeId, String>>,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn get(&self, node: &NodeId) -> Result<Metrics, MetricsError> {
        let records = self.records.read().await;
        match records.get(node) {
            Some(record) => Ok(serde_json::from_str(record)?),
            None => Ok(Metrics::default()),
        }
    }

    async fn update(&self, node: &NodeId, metrics: &Metrics) -> Result<(), MetricsError> {
        let record = serde_json::to_string(metrics)?;
        debug!("storing metrics for {} ({} peers)", node, metrics.connectivity.len());
        self.records.write().await.insert(*node, record);
        Ok(())
    }

    async fn delete(&self, node: &NodeId) -> Result<bool, MetricsError> {
        Ok(self.records.write().await.remove(node).is_some())
    }
}
