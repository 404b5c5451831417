//! Data structures shared by the control plane.
//!
//! Hosts and nodes are read from the topology store and treated as an
//! immutable snapshot for the duration of one update pass.  A [`Client`]
//! joins the two and is the unit every peer computation works on.  The
//! peer-update payload types ([`PeerAction`], [`PeerConfig`]) serialise to
//! the exact JSON layout existing hosts expect on their update topic.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use base64::prelude::*;
use indexmap::IndexSet;
use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::KeyError;

/// Name of a mesh network.
pub type NetworkId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(Uuid);

impl HostId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HostId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// A Curve25519 WireGuard public key, base64 encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = BASE64_STANDARD.decode(s.trim())?;
        let len = raw.len();
        let bytes: [u8; 32] = raw.try_into().map_err(|_| KeyError::Length(len))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A physical or logical machine running the mesh agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    #[serde(default)]
    pub name: String,
    pub public_key: PublicKey,
    pub endpoint_ip: IpAddr,
    pub listen_port: u16,
}

/// A host's membership in one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub host_id: HostId,
    pub network: NetworkId,
    #[serde(default)]
    pub address: Option<Ipv4Addr>,
    #[serde(default)]
    pub address6: Option<Ipv6Addr>,
    #[serde(default)]
    pub is_relay: bool,
    #[serde(default)]
    pub relayed_nodes: Vec<NodeId>,
    #[serde(default)]
    pub is_relayed: bool,
    #[serde(default)]
    pub relayed_by: Option<NodeId>,
    #[serde(default)]
    pub is_egress_gateway: bool,
    /// Egress ranges as stored; parsed lazily so one bad entry never
    /// poisons the whole node.
    #[serde(default)]
    pub egress_gateway_ranges: Vec<String>,
    #[serde(default)]
    pub is_ingress_gateway: bool,
    #[serde(default, with = "duration_secs")]
    pub persistent_keepalive: Duration,
}

impl Node {
    pub fn is_relayed_by(&self, relay: &NodeId) -> bool {
        self.relayed_by.as_ref() == Some(relay)
    }
}

/// A client tunnel terminated by an ingress gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalClient {
    pub client_id: String,
    pub network: NetworkId,
    pub ingress_gateway_id: NodeId,
    /// Either a bare address or a CIDR, as stored.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub address6: String,
}

/// A host joined with one of its nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub host: Host,
    pub node: Node,
}

impl Client {
    pub fn new(host: Host, node: Node) -> Self {
        Self { host, node }
    }
}

/// Input describing a relay being set up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub network: NetworkId,
    pub relay_node_id: NodeId,
    #[serde(default)]
    pub relayed_nodes: Vec<NodeId>,
}

/// An insertion-ordered set of CIDR ranges.
///
/// WireGuard treats allowed IPs as a set, but keeping the first-seen order
/// makes payloads stable across runs over the same snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowedIps(IndexSet<IpNet>);

impl AllowedIps {
    pub fn new() -> Self {
        Self(IndexSet::new())
    }

    /// Returns false when the range was already present.
    pub fn insert(&mut self, net: IpNet) -> bool {
        self.0.insert(net)
    }

    pub fn contains(&self, net: &IpNet) -> bool {
        self.0.contains(net)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpNet> {
        self.0.iter()
    }
}

impl Extend<IpNet> for AllowedIps {
    fn extend<T: IntoIterator<Item = IpNet>>(&mut self, iter: T) {
        for net in iter {
            self.insert(net);
        }
    }
}

impl FromIterator<IpNet> for AllowedIps {
    fn from_iter<T: IntoIterator<Item = IpNet>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl IntoIterator for AllowedIps {
    type Item = IpNet;
    type IntoIter = indexmap::set::IntoIter<IpNet>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "IP")]
    pub ip: IpAddr,
    #[serde(rename = "Port")]
    pub port: u16,
}

/// One peer's WireGuard configuration delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerConfig {
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_nanos"
    )]
    pub persistent_keepalive_interval: Option<Duration>,
    #[serde(rename = "AllowedIPs", default)]
    pub allowed_ips: AllowedIps,
    #[serde(rename = "ReplaceAllowedIPs", default)]
    pub replace_allowed_ips: bool,
    #[serde(default)]
    pub remove: bool,
}

impl PeerConfig {
    /// A bare removal entry carrying only the key.
    pub fn removal(public_key: PublicKey) -> Self {
        Self {
            public_key,
            endpoint: None,
            persistent_keepalive_interval: None,
            allowed_ips: AllowedIps::new(),
            replace_allowed_ips: false,
            remove: true,
        }
    }

    /// A full-replace entry addressed at `peer`, with no allowed IPs yet.
    pub fn replace_for(peer: &Client) -> Self {
        Self {
            public_key: peer.host.public_key,
            endpoint: Some(Endpoint {
                ip: peer.host.endpoint_ip,
                port: peer.host.listen_port,
            }),
            persistent_keepalive_interval: Some(peer.node.persistent_keepalive),
            allowed_ips: AllowedIps::new(),
            replace_allowed_ips: true,
            remove: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    UpdatePeer,
    RemovePeer,
}

/// The unit pushed to exactly one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerAction {
    pub action: Action,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

impl PeerAction {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            peers: Vec::new(),
        }
    }
}

/// Keepalive stored as whole seconds in topology documents.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Keepalive on the wire is a Go `time.Duration`: integer nanoseconds.
mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> PublicKey {
        PublicKey::from_bytes([byte; 32])
    }

    #[test]
    fn public_key_parses_base64() {
        let encoded = key(7).to_base64();
        let parsed: PublicKey = encoded.parse().unwrap();
        assert_eq!(parsed, key(7));
    }

    #[test]
    fn public_key_rejects_short_input() {
        let short = BASE64_STANDARD.encode([1u8; 16]);
        assert!(matches!(
            short.parse::<PublicKey>(),
            Err(KeyError::Length(16))
        ));
    }

    #[test]
    fn allowed_ips_drop_duplicates_and_keep_order() {
        let a: IpNet = "10.0.0.1/32".parse().unwrap();
        let b: IpNet = "10.0.0.2/32".parse().unwrap();
        let set: AllowedIps = [b, a, b].into_iter().collect();
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![b, a]);
    }

    #[test]
    fn allowed_ips_insert_reports_duplicates() {
        let mut set: AllowedIps = (0..=255u8)
            .map(|i| IpNet::from(IpAddr::from([10, 9, 0, i])))
            .collect();
        assert!(!set.insert("10.9.0.7/32".parse().unwrap()));
        assert!(set.insert("10.9.1.0/24".parse().unwrap()));
        let encoded = serde_json::to_value(&set).unwrap();
        assert_eq!(encoded[0], "10.9.0.0/32");
        assert_eq!(encoded[256], "10.9.1.0/24");
        assert_eq!(encoded.as_array().unwrap().len(), 257);
    }

    #[test]
    fn peer_action_wire_layout() {
        let mut cfg = PeerConfig::removal(key(1));
        cfg.endpoint = Some(Endpoint {
            ip: "192.0.2.1".parse().unwrap(),
            port: 51821,
        });
        cfg.persistent_keepalive_interval = Some(Duration::from_secs(20));
        cfg.allowed_ips.insert("10.1.0.0/16".parse().unwrap());

        let action = PeerAction {
            action: Action::UpdatePeer,
            peers: vec![cfg],
        };
        let value = serde_json::to_value(&action).unwrap();

        assert_eq!(value["Action"], "UpdatePeer");
        let peer = &value["Peers"][0];
        assert_eq!(peer["PublicKey"], key(1).to_base64());
        assert_eq!(peer["Endpoint"]["IP"], "192.0.2.1");
        assert_eq!(peer["Endpoint"]["Port"], 51821);
        assert_eq!(peer["PersistentKeepaliveInterval"], 20_000_000_000u64);
        assert_eq!(peer["AllowedIPs"][0], "10.1.0.0/16");
        assert_eq!(peer["ReplaceAllowedIPs"], false);
        assert_eq!(peer["Remove"], true);
    }

    #[test]
    fn bare_removal_omits_optional_fields() {
        let value = serde_json::to_value(PeerConfig::removal(key(2))).unwrap();
        assert!(value.get("Endpoint").is_none());
        assert!(value.get("PersistentKeepaliveInterval").is_none());
        assert_eq!(value["AllowedIPs"], serde_json::json!([]));
    }

    #[test]
    fn node_defaults_optional_roles() {
        let node: Node = serde_json::from_value(serde_json::json!({
            "id": "6f1c0a53-6d39-4b53-9f7d-6b2d9a1b0c11",
            "host_id": "0b0f6a39-2f7c-4c1e-8d8a-1f3c2b6d7e90",
            "network": "n1",
            "address": "10.0.0.4",
            "persistent_keepalive": 25
        }))
        .unwrap();
        assert!(!node.is_relay);
        assert!(node.relayed_by.is_none());
        assert_eq!(node.persistent_keepalive, Duration::from_secs(25));
        assert!(node.address6.is_none());
    }
}
