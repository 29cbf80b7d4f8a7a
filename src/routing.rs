// =============================================================================
// FABRIC CORE — routing.rs
// =============================================================================
//
// MessageRouter — paths, the bounded queue and the routing-table cache.
//
//   route_message   — fast 2-hop path for priority > 0.8, otherwise the cached
//                     shortest path; overloaded hops are only warned about
//   admission       — a full queue evicts its single lowest-priority entry, or
//                     rejects the newcomer when it is the lowest itself;
//                     the queue is keyed by priority, so both ends are cheap
//   process_queue   — priority order within a batch; ttl <= 0 is dropped
//   routing table   — all-pairs BFS, rebuilt when the topology version moves
//                     or the refresh interval has passed
// =============================================================================

use crate::constants::{FAST_PATH_PRIORITY, ROUTE_OVERLOAD_THRESHOLD};
use crate::error::{FabricError, Result};
use crate::message::Message;
use crate::topology::TopologyManager;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

// -----------------------------------------------------------------------------
// Admission — what happened to a routed message at the queue
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Admission {
    Queued,
    /// The queue was full; `evicted_id` made room.
    QueuedAfterEviction { evicted_id: String },
    /// The queue was full and this message had the lowest priority. It is
    /// not queued and only shows up in `dropped_on_admission`.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOutcome {
    pub message_id: String,
    pub route: Vec<String>,
    pub admission: Admission,
}

// -----------------------------------------------------------------------------
// MessageRouter
// -----------------------------------------------------------------------------

/// Lowest priority first; among equal priorities the newest sorts lowest,
/// so the last key is the oldest of the highest priority.
type QueueKey = (OrderedFloat<f64>, Reverse<u64>);

pub struct MessageRouter {
    queue: BTreeMap<QueueKey, Message>,
    next_seq: u64,
    max_queue_size: usize,
    max_hops: usize,
    refresh_interval: Duration,
    routing_table: HashMap<(String, String), Vec<String>>,
    table_version: Option<u64>,
    last_refresh: Option<Instant>,

    total_routed: u64,
    total_hops: u64,
    total_delivered: u64,
    dropped_ttl: u64,
    evicted: u64,
    dropped_on_admission: u64,
    overloaded_hop_warnings: u64,
    table_rebuilds: u64,
}

impl MessageRouter {
    pub fn new(max_queue_size: usize, max_hops: usize, refresh_interval: Duration) -> Self {
        MessageRouter {
            queue: BTreeMap::new(),
            next_seq: 0,
            max_queue_size,
            max_hops,
            refresh_interval,
            routing_table: HashMap::new(),
            table_version: None,
            last_refresh: None,
            total_routed: 0,
            total_hops: 0,
            total_delivered: 0,
            dropped_ttl: 0,
            evicted: 0,
            dropped_on_admission: 0,
            overloaded_hop_warnings: 0,
            table_rebuilds: 0,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued messages, highest priority first.
    pub fn queued(&self) -> impl Iterator<Item = &Message> {
        self.queue.values().rev()
    }

    fn enqueue(&mut self, msg: Message) {
        let key = (OrderedFloat(msg.priority), Reverse(self.next_seq));
        self.next_seq += 1;
        self.queue.insert(key, msg);
    }

    /// Computes a path, stamps it on `msg` and offers it to the queue.
    ///
    /// Not idempotent: every call enqueues a new message. A full queue never
    /// fails the call; check `Admission::Rejected` to learn the message was
    /// dropped in favour of higher-priority traffic.
    pub fn route_message(&mut self, topology: &TopologyManager, mut msg: Message) -> Result<RouteOutcome> {
        for endpoint in [&msg.source_id, &msg.target_id] {
            if !topology.contains(endpoint) {
                return Err(FabricError::NotFound(endpoint.clone()));
            }
        }

        let fast = if msg.priority > FAST_PATH_PRIORITY {
            fast_path(topology, &msg.source_id, &msg.target_id, self.max_hops)
        } else {
            None
        };
        let route = match fast {
            Some(route) => route,
            None => self.load_aware_path(topology, &msg.source_id, &msg.target_id)?,
        };

        self.total_routed += 1;
        self.total_hops += route.len().saturating_sub(1) as u64;
        msg.route = route.clone();
        let message_id = msg.message_id.clone();
        let admission = self.admit(msg);

        Ok(RouteOutcome { message_id, route, admission })
    }

    /// Cached shortest path. Overloaded intermediate hops are logged and the
    /// path is still used; there is no re-routing search.
    fn load_aware_path(&mut self, topology: &TopologyManager, from: &str, to: &str) -> Result<Vec<String>> {
        self.refresh_if_stale(topology);

        let path = self
            .routing_table
            .get(&(from.to_string(), to.to_string()))
            .cloned()
            .ok_or_else(|| FabricError::NoRouteFound {
                from: from.to_string(),
                to: to.to_string(),
                max_hops: self.max_hops,
            })?;

        if path.len() > 2 {
            for hop in &path[1..path.len() - 1] {
                if let Some(node) = topology.node(hop) {
                    if node.current_load > ROUTE_OVERLOAD_THRESHOLD {
                        self.overloaded_hop_warnings += 1;
                        log::warn!(
                            "⚠️ Route {} → {} passes overloaded node [{}] (load {:.2})",
                            from,
                            to,
                            hop,
                            node.current_load
                        );
                    }
                }
            }
        }
        Ok(path)
    }

    fn admit(&mut self, msg: Message) -> Admission {
        if self.queue.len() < self.max_queue_size {
            log::debug!("📥 Message {} queued (p={:.2})", msg.message_id, msg.priority);
            self.enqueue(msg);
            return Admission::Queued;
        }

        let lowest = self.queue.first_key_value().map(|((p, _), _)| p.0);

        match lowest {
            Some(priority) if msg.priority > priority => {
                let evicted = match self.queue.pop_first() {
                    Some((_, evicted)) => evicted,
                    None => return Admission::Rejected,
                };
                self.evicted += 1;
                log::warn!(
                    "📤 Queue full: evicted {} (p={:.2}) for {} (p={:.2})",
                    evicted.message_id,
                    evicted.priority,
                    msg.message_id,
                    msg.priority
                );
                self.enqueue(msg);
                Admission::QueuedAfterEviction { evicted_id: evicted.message_id }
            }
            _ => {
                self.dropped_on_admission += 1;
                log::warn!(
                    "📤 Queue full: rejected {} (p={:.2}, lowest priority)",
                    msg.message_id,
                    msg.priority
                );
                Admission::Rejected
            }
        }
    }

    /// Pops up to `batch_size` messages in priority order. Each popped
    /// message spends one ttl; one with nothing left is dropped instead.
    pub fn process_queue(&mut self, batch_size: usize) -> Vec<Message> {
        let take = batch_size.min(self.queue.len());

        let mut delivered = Vec::with_capacity(take);
        for _ in 0..take {
            let mut msg = match self.queue.pop_last() {
                Some((_, msg)) => msg,
                None => break,
            };
            if msg.ttl <= 0 {
                self.dropped_ttl += 1;
                log::debug!("⌛ Message {} dropped: ttl exhausted", msg.message_id);
                continue;
            }
            msg.ttl -= 1;
            delivered.push(msg);
        }

        self.total_delivered += delivered.len() as u64;
        delivered
    }

    // -------------------------------------------------------------------------
    // Routing table
    // -------------------------------------------------------------------------

    fn is_stale(&self, topology: &TopologyManager) -> bool {
        match (self.table_version, self.last_refresh) {
            (Some(version), Some(at)) => {
                version != topology.version() || at.elapsed() > self.refresh_interval
            }
            _ => true,
        }
    }

    /// Returns true when the table was rebuilt.
    pub fn refresh_if_stale(&mut self, topology: &TopologyManager) -> bool {
        if !self.is_stale(topology) {
            return false;
        }
        self.rebuild_table(topology);
        true
    }

    pub fn rebuild_table(&mut self, topology: &TopologyManager) {
        self.routing_table.clear();
        for node in topology.nodes() {
            for (target, path) in topology.shortest_paths_from(&node.node_id, self.max_hops) {
                self.routing_table.insert((node.node_id.clone(), target), path);
            }
        }
        self.table_version = Some(topology.version());
        self.last_refresh = Some(Instant::now());
        self.table_rebuilds += 1;
        log::debug!(
            "🗺️ Routing table rebuilt: {} entries at topology v{}",
            self.routing_table.len(),
            topology.version()
        );
    }

    pub fn cached_route(&self, from: &str, to: &str) -> Option<&Vec<String>> {
        self.routing_table.get(&(from.to_string(), to.to_string()))
    }

    pub fn stats(&self) -> RouterStats {
        let queue_size = self.queue.len();
        RouterStats {
            total_routed: self.total_routed,
            total_delivered: self.total_delivered,
            queue_size,
            max_queue_size: self.max_queue_size,
            avg_priority: if queue_size == 0 {
                0.0
            } else {
                self.queue.values().map(|m| m.priority).sum::<f64>() / queue_size as f64
            },
            avg_route_length: if self.total_routed == 0 {
                0.0
            } else {
                self.total_hops as f64 / self.total_routed as f64
            },
            routing_table_entries: self.routing_table.len(),
            dropped_ttl: self.dropped_ttl,
            evicted: self.evicted,
            dropped_on_admission: self.dropped_on_admission,
            overloaded_hop_warnings: self.overloaded_hop_warnings,
            table_rebuilds: self.table_rebuilds,
        }
    }
}

/// Direct edge, or one intermediate reached over direct/affinity edges only.
fn fast_path(topology: &TopologyManager, from: &str, to: &str, max_hops: usize) -> Option<Vec<String>> {
    if from == to {
        return Some(vec![from.to_string()]);
    }
    let usable = |a: &str, b: &str| {
        topology
            .connection(a, b)
            .map(|c| c.active && c.kind.is_fast_path())
            .unwrap_or(false)
    };

    if max_hops >= 1 && usable(from, to) {
        return Some(vec![from.to_string(), to.to_string()]);
    }
    if max_hops < 2 {
        return None;
    }
    let source = topology.node(from)?;
    source
        .connections
        .keys()
        .find(|mid| mid.as_str() != to && usable(from, mid) && usable(mid, to))
        .map(|mid| vec![from.to_string(), mid.clone(), to.to_string()])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    pub total_routed: u64,
    pub total_delivered: u64,
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub avg_priority: f64,
    /// mean hop count over every routed message
    pub avg_route_length: f64,
    pub routing_table_entries: usize,
    pub dropped_ttl: u64,
    pub evicted: u64,
    pub dropped_on_admission: u64,
    pub overloaded_hop_warnings: u64,
    pub table_rebuilds: u64,
}

impl std::fmt::Display for RouterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "router: routed={} delivered={} queue={}/{} avg_p={:.2} avg_hops={:.2} table={} \
             dropped_ttl={} evicted={} rejected={}",
            self.total_routed,
            self.total_delivered,
            self.queue_size,
            self.max_queue_size,
            self.avg_priority,
            self.avg_route_length,
            self.routing_table_entries,
            self.dropped_ttl,
            self.evicted,
            self.dropped_on_admission,
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuilder;
    use crate::node::{ConnectionKind, NodeKind};
    use std::collections::BTreeSet;

    fn topo_chain(ids: &[&str], kind: ConnectionKind) -> TopologyManager {
        let mut topo = TopologyManager::new(10);
        for id in ids {
            topo.add_node(id, NodeKind::Worker, BTreeSet::new(), "lab").unwrap();
        }
        for pair in ids.windows(2) {
            topo.create_connection(pair[0], pair[1], kind, 1.0).unwrap();
        }
        topo
    }

    fn router(max_queue: usize) -> MessageRouter {
        MessageRouter::new(max_queue, 5, Duration::from_secs(60))
    }

    fn msg(from: &str, to: &str, priority: f64, ttl: i32) -> Message {
        MessageBuilder::new(from).to(to).priority(priority).ttl(ttl).build()
    }

    #[test]
    fn test_route_and_no_route() {
        let mut topo = topo_chain(&["A", "B", "C"], ConnectionKind::Direct);
        topo.add_node("D", NodeKind::Worker, BTreeSet::new(), "lab").unwrap();
        let mut r = router(10);

        let out = r.route_message(&topo, msg("A", "C", 0.5, 3)).unwrap();
        assert_eq!(out.route, vec!["A", "B", "C"]);
        assert_eq!(out.admission, Admission::Queued);

        let err = r.route_message(&topo, msg("A", "D", 0.5, 3)).unwrap_err();
        assert_eq!(err.code(), "no_route");
        assert_eq!(r.queue_len(), 1);

        let err = r.route_message(&topo, msg("A", "ghost", 0.5, 3)).unwrap_err();
        assert_eq!(err, FabricError::NotFound("ghost".into()));
    }

    #[test]
    fn test_fast_path_skips_federated_edges() {
        // A-B federated, A-C-B direct: fast path ignores the federated edge
        let mut topo = topo_chain(&["A", "C", "B"], ConnectionKind::Direct);
        topo.create_connection("A", "B", ConnectionKind::Federated, 1.0).unwrap();
        let mut r = router(10);

        let hot = r.route_message(&topo, msg("A", "B", 0.9, 3)).unwrap();
        assert_eq!(hot.route, vec!["A", "C", "B"]);

        let cold = r.route_message(&topo, msg("A", "B", 0.5, 3)).unwrap();
        assert_eq!(cold.route, vec!["A", "B"]);
    }

    #[test]
    fn test_fast_path_needs_priority_above_threshold() {
        let mut topo = topo_chain(&["A", "C", "B"], ConnectionKind::Direct);
        topo.create_connection("A", "B", ConnectionKind::Federated, 1.0).unwrap();
        let mut r = router(10);

        let at = r.route_message(&topo, msg("A", "B", 0.8, 3)).unwrap();
        assert_eq!(at.route, vec!["A", "B"]);
        let above = r.route_message(&topo, msg("A", "B", 0.81, 3)).unwrap();
        assert_eq!(above.route, vec!["A", "C", "B"]);
    }

    #[test]
    fn test_equal_priorities_drain_oldest_first() {
        let topo = topo_chain(&["A", "B"], ConnectionKind::Direct);
        let mut r = router(2);
        let first = r.route_message(&topo, msg("A", "B", 0.4, 3)).unwrap();
        let second = r.route_message(&topo, msg("A", "B", 0.4, 3)).unwrap();
        // full: the newest of the lowest priority makes room
        let third = r.route_message(&topo, msg("A", "B", 0.7, 3)).unwrap();
        assert_eq!(
            third.admission,
            Admission::QueuedAfterEviction { evicted_id: second.message_id.clone() }
        );

        let ids: Vec<String> = r.process_queue(10).into_iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![third.message_id, first.message_id]);
    }

    #[test]
    fn test_overloaded_hop_only_warns() {
        // No re-routing around busy intermediates: the path is kept as-is.
        let mut topo = topo_chain(&["A", "B", "C"], ConnectionKind::Bridged);
        topo.set_load("B", 0.95).unwrap();
        let mut r = router(10);

        let out = r.route_message(&topo, msg("A", "C", 0.5, 3)).unwrap();
        assert_eq!(out.route, vec!["A", "B", "C"]);
        assert_eq!(r.stats().overloaded_hop_warnings, 1);
    }

    #[test]
    fn test_table_follows_topology_version() {
        let mut topo = topo_chain(&["A", "B"], ConnectionKind::Direct);
        let mut r = router(10);
        assert!(r.refresh_if_stale(&topo));
        assert!(!r.refresh_if_stale(&topo));
        assert_eq!(r.cached_route("A", "B").map(|p| p.len()), Some(2));

        topo.add_node("C", NodeKind::Worker, BTreeSet::new(), "lab").unwrap();
        topo.create_connection("B", "C", ConnectionKind::Direct, 1.0).unwrap();
        let out = r.route_message(&topo, msg("A", "C", 0.2, 3)).unwrap();
        assert_eq!(out.route.len(), 3);
        assert_eq!(r.stats().table_rebuilds, 2);
    }

    #[test]
    fn test_ttl_exhaustion() {
        let topo = topo_chain(&["A", "B"], ConnectionKind::Direct);
        let mut r = router(10);
        let once = r.route_message(&topo, msg("A", "B", 0.5, 1)).unwrap();
        let never = r.route_message(&topo, msg("A", "B", 0.6, 0)).unwrap();

        let delivered = r.process_queue(50);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].message_id, once.message_id);
        assert_eq!(delivered[0].ttl, 0);
        assert!(delivered.iter().all(|m| m.message_id != never.message_id));
        assert_eq!(r.queue_len(), 0);
        assert_eq!(r.stats().dropped_ttl, 1);

        assert!(r.process_queue(50).is_empty());
    }

    #[test]
    fn test_batch_is_priority_ordered_not_fifo() {
        let topo = topo_chain(&["A", "B"], ConnectionKind::Direct);
        let mut r = router(10);
        for p in [0.1, 0.7, 0.3, 0.9] {
            r.route_message(&topo, msg("A", "B", p, 2)).unwrap();
        }
        let first = r.process_queue(2);
        let priorities: Vec<f64> = first.iter().map(|m| m.priority).collect();
        assert_eq!(priorities, vec![0.9, 0.7]);
        assert_eq!(r.queue_len(), 2);
        let rest: Vec<f64> = r.process_queue(10).iter().map(|m| m.priority).collect();
        assert_eq!(rest, vec![0.3, 0.1]);
    }

    #[test]
    fn test_queue_bound_evicts_lowest() {
        let topo = topo_chain(&["A", "B"], ConnectionKind::Direct);
        let max = 5;
        let mut r = router(max);
        let mut ids = Vec::new();
        for i in 0..=max {
            let out = r
                .route_message(&topo, msg("A", "B", 0.1 + i as f64 * 0.1, 3))
                .unwrap();
            assert!(r.queue_len() <= max);
            ids.push(out);
        }
        assert_eq!(r.queue_len(), max);
        assert_eq!(
            ids[max].admission,
            Admission::QueuedAfterEviction { evicted_id: ids[0].message_id.clone() }
        );
        assert!(r.queued().all(|m| m.message_id != ids[0].message_id));
        assert_eq!(r.stats().evicted, 1);
    }

    #[test]
    fn test_lowest_newcomer_is_rejected() {
        let topo = topo_chain(&["A", "B"], ConnectionKind::Direct);
        let mut r = router(2);
        r.route_message(&topo, msg("A", "B", 0.5, 3)).unwrap();
        r.route_message(&topo, msg("A", "B", 0.6, 3)).unwrap();

        let out = r.route_message(&topo, msg("A", "B", 0.5, 3)).unwrap();
        assert_eq!(out.admission, Admission::Rejected);
        assert_eq!(r.queue_len(), 2);
        assert!(r.queued().all(|m| m.message_id != out.message_id));
        assert_eq!(r.stats().dropped_on_admission, 1);
    }

    #[test]
    fn test_route_is_not_idempotent() {
        let topo = topo_chain(&["A", "B"], ConnectionKind::Direct);
        let mut r = router(10);
        let m = msg("A", "B", 0.5, 3);
        r.route_message(&topo, m.clone()).unwrap();
        r.route_message(&topo, m).unwrap();
        assert_eq!(r.queue_len(), 2);

        let stats = r.stats();
        println!("✅ {}", stats);
        assert_eq!(stats.total_routed, 2);
        assert!((stats.avg_route_length - 1.0).abs() < 1e-9);
        assert!((stats.avg_priority - 0.5).abs() < 1e-9);
    }
}
