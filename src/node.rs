// =============================================================================
// FABRIC CORE — node.rs
// =============================================================================
//
// Data model of the fleet graph:
//   NodeKind / NodeStatus  — closed role and lifecycle sets
//   Node                   — one worker/service instance
//   ConnectionKind         — edge flavours
//   Connection             — undirected, weighted edge between two nodes
// =============================================================================

use crate::constants::DEFAULT_MAX_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

// -----------------------------------------------------------------------------
// NodeKind — role of a node in the fleet
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Orchestrator,
    Worker,
    Analyzer,
    Storage,
    Relay,
    Gateway,
}

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Orchestrator,
        NodeKind::Worker,
        NodeKind::Analyzer,
        NodeKind::Storage,
        NodeKind::Relay,
        NodeKind::Gateway,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Orchestrator => "orchestrator",
            NodeKind::Worker       => "worker",
            NodeKind::Analyzer     => "analyzer",
            NodeKind::Storage      => "storage",
            NodeKind::Relay        => "relay",
            NodeKind::Gateway      => "gateway",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        NodeKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown node kind: {}", s))
    }
}

// -----------------------------------------------------------------------------
// NodeStatus — lifecycle state
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Idle,
    Busy,
    Maintenance,
    Offline,
    Error,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 6] = [
        NodeStatus::Active,
        NodeStatus::Idle,
        NodeStatus::Busy,
        NodeStatus::Maintenance,
        NodeStatus::Offline,
        NodeStatus::Error,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NodeStatus::Active      => "active",
            NodeStatus::Idle        => "idle",
            NodeStatus::Busy        => "busy",
            NodeStatus::Maintenance => "maintenance",
            NodeStatus::Offline     => "offline",
            NodeStatus::Error       => "error",
        }
    }

    /// Eligible to receive new work
    pub fn is_available(&self) -> bool {
        matches!(self, NodeStatus::Active | NodeStatus::Idle)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        NodeStatus::ALL
            .into_iter()
            .find(|st| st.name() == s)
            .ok_or_else(|| format!("unknown node status: {}", s))
    }
}

// -----------------------------------------------------------------------------
// ConnectionKind
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Direct,
    AffinityEntangled,
    Federated,
    Bridged,
    Cached,
}

impl ConnectionKind {
    pub const ALL: [ConnectionKind; 5] = [
        ConnectionKind::Direct,
        ConnectionKind::AffinityEntangled,
        ConnectionKind::Federated,
        ConnectionKind::Bridged,
        ConnectionKind::Cached,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionKind::Direct            => "direct",
            ConnectionKind::AffinityEntangled => "affinity_entangled",
            ConnectionKind::Federated         => "federated",
            ConnectionKind::Bridged           => "bridged",
            ConnectionKind::Cached            => "cached",
        }
    }

    /// Edges the high-priority fast path may traverse
    pub fn is_fast_path(&self) -> bool {
        match self {
            ConnectionKind::Direct | ConnectionKind::AffinityEntangled => true,
            ConnectionKind::Federated | ConnectionKind::Bridged | ConnectionKind::Cached => false,
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConnectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase().replace('-', "_");
        ConnectionKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown connection kind: {}", s))
    }
}

// -----------------------------------------------------------------------------
// Node
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub capabilities: BTreeSet<String>,
    pub location: String,
    pub current_load: f64,
    pub max_capacity: f64,
    pub last_heartbeat: Instant,
    /// peer id → kind; mirrored on the peer
    pub connections: BTreeMap<String, ConnectionKind>,
    pub parent: Option<String>,
    pub metrics: HashMap<String, f64>,
}

impl Node {
    pub fn new(node_id: &str, kind: NodeKind, capabilities: BTreeSet<String>, location: &str) -> Self {
        Node {
            node_id: node_id.to_string(),
            kind,
            status: NodeStatus::Active,
            capabilities,
            location: location.to_string(),
            current_load: 0.0,
            max_capacity: DEFAULT_MAX_CAPACITY,
            last_heartbeat: Instant::now(),
            connections: BTreeMap::new(),
            parent: None,
            metrics: HashMap::new(),
        }
    }

    pub fn has_capabilities<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        required.into_iter().all(|c| self.capabilities.contains(c))
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn view(&self) -> NodeView {
        NodeView {
            node_id: self.node_id.clone(),
            kind: self.kind,
            status: self.status,
            capabilities: self.capabilities.iter().cloned().collect(),
            location: self.location.clone(),
            current_load: self.current_load,
            max_capacity: self.max_capacity,
            connections: self.connections.keys().cloned().collect(),
            parent: self.parent.clone(),
            heartbeat_age_secs: self.last_heartbeat.elapsed().as_secs_f64(),
        }
    }
}

/// Plain record of a node for callers outside the fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub node_id: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub capabilities: Vec<String>,
    pub location: String,
    pub current_load: f64,
    pub max_capacity: f64,
    pub connections: Vec<String>,
    pub parent: Option<String>,
    pub heartbeat_age_secs: f64,
}

// -----------------------------------------------------------------------------
// Connection
// -----------------------------------------------------------------------------

/// The unordered endpoint pair, stored sorted: one id per pair whatever
/// characters the node ids contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId {
    lo: String,
    hi: String,
}

impl ConnectionId {
    pub fn between(a: &str, b: &str) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        ConnectionId { lo: lo.to_string(), hi: hi.to_string() }
    }

    pub fn endpoints(&self) -> (&str, &str) {
        (&self.lo, &self.hi)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.lo, self.hi)
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub endpoints: (String, String),
    pub kind: ConnectionKind,
    pub strength: f64,
    pub latency_ms: f64,
    pub bandwidth_mbps: f64,
    pub last_activity: Instant,
    pub active: bool,
}

impl Connection {
    pub fn new(a: &str, b: &str, kind: ConnectionKind, strength: f64) -> Self {
        Connection {
            id: ConnectionId::between(a, b),
            endpoints: (a.to_string(), b.to_string()),
            kind,
            strength: strength.clamp(0.0, 1.0),
            latency_ms: 0.0,
            bandwidth_mbps: 0.0,
            last_activity: Instant::now(),
            active: true,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.endpoints.0 == node_id || self.endpoints.1 == node_id
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_is_unordered() {
        assert_eq!(ConnectionId::between("a", "b"), ConnectionId::between("b", "a"));
        assert_ne!(ConnectionId::between("a", "b"), ConnectionId::between("a", "c"));
        // same rendering, different pairs
        let left = ConnectionId::between("a<->b", "c");
        let right = ConnectionId::between("a", "b<->c");
        assert_eq!(left.to_string(), right.to_string());
        assert_ne!(left, right);
        assert_eq!(right.endpoints(), ("a", "b<->c"));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("Worker".parse::<NodeKind>(), Ok(NodeKind::Worker));
        assert_eq!("idle".parse::<NodeStatus>(), Ok(NodeStatus::Idle));
        assert_eq!(
            "affinity-entangled".parse::<ConnectionKind>(),
            Ok(ConnectionKind::AffinityEntangled)
        );
        assert!("nope".parse::<NodeKind>().is_err());
    }

    #[test]
    fn test_capability_check() {
        let caps: BTreeSet<String> = ["gpu".to_string(), "ml".to_string()].into_iter().collect();
        let node = Node::new("n1", NodeKind::Worker, caps, "eu");
        let need = vec!["gpu".to_string()];
        assert!(node.has_capabilities(&need));
        let need = vec!["gpu".to_string(), "ssd".to_string()];
        assert!(!node.has_capabilities(&need));
        assert!(node.status.is_available());
    }
}
