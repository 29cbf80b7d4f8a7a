// =============================================================================
// FABRIC CORE — topology.rs
// =============================================================================
//
// TopologyManager — the fleet graph.
//
//   Arena      — nodes live in generational slots; a NodeHandle from a removed
//                node never resolves again, even after its slot is reused
//   Adjacency  — every node keeps an ordered peer map, mirrored on the peer
//   FindPath   — BFS over active edges, bounded by max_hops; ordered peer maps
//                make the returned shortest path deterministic
//   Version    — bumped on every structural change; routing caches compare it
// =============================================================================

use crate::error::{FabricError, Result};
use crate::node::{Connection, ConnectionId, ConnectionKind, Node, NodeKind, NodeStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

// -----------------------------------------------------------------------------
// NodeHandle — stable index into the arena
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

// -----------------------------------------------------------------------------
// TopologyManager
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub struct TopologyManager {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<String, NodeHandle>,
    connections: BTreeMap<ConnectionId, Connection>,
    max_connections_per_node: usize,
    version: u64,
}

impl TopologyManager {
    pub fn new(max_connections_per_node: usize) -> Self {
        TopologyManager {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            connections: BTreeMap::new(),
            max_connections_per_node,
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn max_connections_per_node(&self) -> usize {
        self.max_connections_per_node
    }

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    pub fn handle(&self, node_id: &str) -> Option<NodeHandle> {
        self.index.get(node_id).copied()
    }

    pub fn resolve(&self, handle: NodeHandle) -> Option<&Node> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.handle(node_id).and_then(|h| self.resolve(h))
    }

    fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        let handle = self.handle(node_id)?;
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn require_mut(&mut self, node_id: &str) -> Result<&mut Node> {
        self.node_mut(node_id)
            .ok_or_else(|| FabricError::NotFound(node_id.to_string()))
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    /// Nodes in arena order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().filter_map(|slot| slot.node.as_ref())
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connection(&self, a: &str, b: &str) -> Option<&Connection> {
        self.connections.get(&ConnectionId::between(a, b))
    }

    pub fn children(&self, node_id: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .nodes()
            .filter(|n| n.parent.as_deref() == Some(node_id))
            .map(|n| n.node_id.clone())
            .collect();
        out.sort();
        out
    }

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    pub fn add_node(
        &mut self,
        node_id: &str,
        kind: NodeKind,
        capabilities: BTreeSet<String>,
        location: &str,
    ) -> Result<NodeHandle> {
        if node_id.trim().is_empty() {
            return Err(FabricError::InvalidArgument("empty node id".to_string()));
        }
        if self.index.contains_key(node_id) {
            return Err(FabricError::AlreadyExists(node_id.to_string()));
        }

        let node = Node::new(node_id, kind, capabilities, location);
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeHandle { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, node: Some(node) });
                NodeHandle { index, generation: 0 }
            }
        };

        self.index.insert(node_id.to_string(), handle);
        self.version += 1;
        log::info!("➕ Node [{}] added ({})", node_id, kind);
        Ok(handle)
    }

    /// `add_node` with a parent that must already exist
    pub fn add_child_node(
        &mut self,
        node_id: &str,
        kind: NodeKind,
        capabilities: BTreeSet<String>,
        location: &str,
        parent: &str,
    ) -> Result<NodeHandle> {
        if !self.contains(parent) {
            return Err(FabricError::NotFound(parent.to_string()));
        }
        let handle = self.add_node(node_id, kind, capabilities, location)?;
        self.set_parent(node_id, Some(parent))?;
        Ok(handle)
    }

    pub fn set_parent(&mut self, node_id: &str, parent: Option<&str>) -> Result<()> {
        if !self.contains(node_id) {
            return Err(FabricError::NotFound(node_id.to_string()));
        }
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(FabricError::NotFound(parent.to_string()));
            }
            // walk up from the new parent; meeting node_id means a cycle
            let mut cursor = Some(parent.to_string());
            let mut steps = 0;
            while let Some(current) = cursor {
                if current == node_id {
                    return Err(FabricError::InvalidArgument(format!(
                        "{} cannot be parented under its own descendant {}",
                        node_id, parent
                    )));
                }
                steps += 1;
                if steps > self.index.len() {
                    break;
                }
                cursor = self.node(&current).and_then(|n| n.parent.clone());
            }
        }
        self.require_mut(node_id)?.parent = parent.map(str::to_string);
        Ok(())
    }

    /// Removes the node, severs its connections and hands its children to
    /// its own parent.
    pub fn remove_node(&mut self, node_id: &str) -> Result<Node> {
        let handle = self
            .index
            .remove(node_id)
            .ok_or_else(|| FabricError::NotFound(node_id.to_string()))?;

        let slot = &mut self.slots[handle.index as usize];
        let node = slot
            .node
            .take()
            .ok_or_else(|| FabricError::NotFound(node_id.to_string()))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);

        self.connections.retain(|_, conn| !conn.touches(node_id));
        for peer in node.connections.keys() {
            if let Some(peer_node) = self.node_mut(peer) {
                peer_node.connections.remove(node_id);
            }
        }

        let orphans = self.children(node_id);
        for child in &orphans {
            if let Some(child_node) = self.node_mut(child) {
                child_node.parent = node.parent.clone();
            }
        }

        self.version += 1;
        log::info!(
            "➖ Node [{}] removed: {} connections severed, {} children re-parented to {:?}",
            node_id,
            node.connections.len(),
            orphans.len(),
            node.parent
        );
        Ok(node)
    }

    pub fn update_node_status(
        &mut self,
        node_id: &str,
        status: NodeStatus,
        load: Option<f64>,
        metrics: Option<HashMap<String, f64>>,
    ) -> Result<()> {
        let node = self.require_mut(node_id)?;
        node.status = status;
        if let Some(load) = load {
            node.current_load = load.clamp(0.0, 1.0);
        }
        if let Some(metrics) = metrics {
            node.metrics.extend(metrics);
        }
        node.heartbeat();
        Ok(())
    }

    pub fn set_load(&mut self, node_id: &str, load: f64) -> Result<()> {
        let node = self.require_mut(node_id)?;
        node.current_load = load.clamp(0.0, 1.0);
        node.heartbeat();
        Ok(())
    }

    pub fn heartbeat(&mut self, node_id: &str) -> Result<()> {
        self.require_mut(node_id)?.heartbeat();
        Ok(())
    }

    pub fn neighbors(&self, node_id: &str) -> Result<Vec<String>> {
        self.node(node_id)
            .map(|n| n.connections.keys().cloned().collect())
            .ok_or_else(|| FabricError::NotFound(node_id.to_string()))
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    /// Idempotent: an existing pair returns its id unchanged.
    pub fn create_connection(
        &mut self,
        a: &str,
        b: &str,
        kind: ConnectionKind,
        strength: f64,
    ) -> Result<ConnectionId> {
        if a == b {
            return Err(FabricError::InvalidArgument(format!("self-connection on {}", a)));
        }
        let id = ConnectionId::between(a, b);
        if self.connections.contains_key(&id) {
            return Ok(id);
        }

        for endpoint in [a, b] {
            let node = match self.node(endpoint) {
                Some(node) => node,
                None => {
                    log::warn!("🔌 Connection {} refused: node [{}] not found", id, endpoint);
                    return Err(FabricError::NotFound(endpoint.to_string()));
                }
            };
            if node.connections.len() >= self.max_connections_per_node {
                log::warn!(
                    "🔌 Connection {} refused: node [{}] at limit {}",
                    id,
                    endpoint,
                    self.max_connections_per_node
                );
                return Err(FabricError::CapacityExceeded {
                    node_id: endpoint.to_string(),
                    limit: self.max_connections_per_node,
                });
            }
        }

        self.require_mut(a)?.connections.insert(b.to_string(), kind);
        self.require_mut(b)?.connections.insert(a.to_string(), kind);
        self.connections
            .insert(id.clone(), Connection::new(a, b, kind, strength));
        self.version += 1;
        log::debug!("🔗 Connection {} created ({})", id, kind);
        Ok(id)
    }

    pub fn remove_connection(&mut self, a: &str, b: &str) -> Result<Connection> {
        let id = ConnectionId::between(a, b);
        let conn = self
            .connections
            .remove(&id)
            .ok_or_else(|| FabricError::NotFound(id.to_string()))?;
        if let Some(node) = self.node_mut(a) {
            node.connections.remove(b);
        }
        if let Some(node) = self.node_mut(b) {
            node.connections.remove(a);
        }
        self.version += 1;
        Ok(conn)
    }

    /// Marks traffic on the edge and optionally replaces its strength.
    pub fn touch_connection(&mut self, a: &str, b: &str, strength: Option<f64>) -> Result<()> {
        let id = ConnectionId::between(a, b);
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or_else(|| FabricError::NotFound(id.to_string()))?;
        conn.touch();
        if let Some(strength) = strength {
            conn.strength = strength.clamp(0.0, 1.0);
        }
        Ok(())
    }

    pub fn set_connection_active(&mut self, a: &str, b: &str, active: bool) -> Result<()> {
        let id = ConnectionId::between(a, b);
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or_else(|| FabricError::NotFound(id.to_string()))?;
        if conn.active != active {
            conn.active = active;
            conn.touch();
            // inactive edges drop out of path search
            self.version += 1;
        }
        Ok(())
    }

    fn active_peers<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a String> + 'a {
        node.connections.keys().filter(move |peer| {
            self.connections
                .get(&ConnectionId::between(&node.node_id, peer))
                .map(|c| c.active)
                .unwrap_or(false)
        })
    }

    // -------------------------------------------------------------------------
    // Paths
    // -------------------------------------------------------------------------

    /// Shortest path by hop count over active edges, at most `max_hops` edges.
    pub fn find_path(&self, from: &str, to: &str, max_hops: usize) -> Option<Vec<String>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let parents = self.bfs(from, max_hops, Some(to));
        parents.contains_key(to).then(|| rebuild_path(&parents, from, to))
    }

    /// Every reachable node from `from` with its BFS path; the same paths
    /// `find_path` returns.
    pub fn shortest_paths_from(&self, from: &str, max_hops: usize) -> HashMap<String, Vec<String>> {
        let mut out = HashMap::new();
        if !self.contains(from) {
            return out;
        }
        let parents = self.bfs(from, max_hops, None);
        for target in parents.keys() {
            out.insert(target.clone(), rebuild_path(&parents, from, target));
        }
        out.insert(from.to_string(), vec![from.to_string()]);
        out
    }

    /// BFS parent map (child → parent). Stops early once `stop_at` is reached.
    fn bfs(&self, from: &str, max_hops: usize, stop_at: Option<&str>) -> HashMap<String, String> {
        let mut parents: HashMap<String, String> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();

        visited.insert(from);
        queue.push_back((from, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }
            let node = match self.node(current) {
                Some(node) => node,
                None => continue,
            };
            for peer in self.active_peers(node) {
                if !visited.insert(peer.as_str()) {
                    continue;
                }
                parents.insert(peer.clone(), current.to_string());
                if stop_at == Some(peer.as_str()) {
                    return parents;
                }
                queue.push_back((peer.as_str(), depth + 1));
            }
        }
        parents
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    pub fn cleanup_stale_nodes(&mut self, timeout: Duration) -> Vec<String> {
        self.cleanup_stale_nodes_at(Instant::now(), timeout)
    }

    /// Evicts nodes whose heartbeat is older than `timeout` at `now`.
    pub fn cleanup_stale_nodes_at(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut stale: Vec<String> = self
            .nodes()
            .filter(|n| now.saturating_duration_since(n.last_heartbeat) > timeout)
            .map(|n| n.node_id.clone())
            .collect();
        stale.sort();

        for node_id in &stale {
            if self.remove_node(node_id).is_ok() {
                log::info!("💀 Node [{}] evicted: heartbeat older than {:?}", node_id, timeout);
            }
        }
        stale
    }

    // -------------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------------

    pub fn stats(&self) -> TopologyStats {
        let mut nodes_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut nodes_by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_load = 0.0;
        for node in self.nodes() {
            *nodes_by_kind.entry(node.kind.name().to_string()).or_default() += 1;
            *nodes_by_status.entry(node.status.name().to_string()).or_default() += 1;
            total_load += node.current_load;
        }

        let mut connections_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_strength = 0.0;
        for conn in self.connections.values() {
            *connections_by_kind.entry(conn.kind.name().to_string()).or_default() += 1;
            total_strength += conn.strength;
        }

        let n = self.node_count();
        let e = self.connection_count();
        TopologyStats {
            total_nodes: n,
            total_connections: e,
            nodes_by_kind,
            nodes_by_status,
            connections_by_kind,
            avg_load: if n == 0 { 0.0 } else { total_load / n as f64 },
            avg_connection_strength: if e == 0 { 0.0 } else { total_strength / e as f64 },
            density: if n < 2 { 0.0 } else { 2.0 * e as f64 / (n as f64 * (n as f64 - 1.0)) },
            topology_version: self.version,
        }
    }
}

fn rebuild_path(parents: &HashMap<String, String>, from: &str, to: &str) -> Vec<String> {
    let mut path = vec![to.to_string()];
    let mut cursor = to;
    while cursor != from {
        match parents.get(cursor) {
            Some(parent) => {
                path.push(parent.clone());
                cursor = parent;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyStats {
    pub total_nodes: usize,
    pub total_connections: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub nodes_by_status: BTreeMap<String, usize>,
    pub connections_by_kind: BTreeMap<String, usize>,
    pub avg_load: f64,
    pub avg_connection_strength: f64,
    pub density: f64,
    pub topology_version: u64,
}

impl std::fmt::Display for TopologyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "topology v{}: nodes={} connections={} avg_load={:.3} avg_strength={:.3} density={:.3}",
            self.topology_version,
            self.total_nodes,
            self.total_connections,
            self.avg_load,
            self.avg_connection_strength,
            self.density,
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
