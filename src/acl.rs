//! Node-to-node visibility decisions.

use std::collections::HashSet;

use crate::types::NodeId;

/// Decides whether two nodes of a network may peer with each other.
pub trait AclOracle: Send + Sync {
    fn nodes_allowed(&self, network: &str, a: &NodeId, b: &NodeId) -> bool;
}

/// Allow-all policy with an explicit set of denied pairs.
///
/// Denials are symmetric: denying `(a, b)` also denies `(b, a)`.
#[derive(Debug, Clone, Default)]
pub struct StaticAcl {
    denied: HashSet<(NodeId, NodeId)>,
}

impl StaticAcl {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let mut acl = Self::default();
        for (a, b) in pairs {
            acl.deny(a, b);
        }
        acl
    }

    pub fn deny(&mut self, a: NodeId, b: NodeId) {
        self.denied.insert(ordered(a, b));
    }
}

impl AclOracle for StaticAcl {
    fn nodes_allowed(&self, _network: &str, a: &NodeId, b: &NodeId) -> bool {
        !self.denied.contains(&ordered(*a, *b))
    }
}

fn ordered(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
