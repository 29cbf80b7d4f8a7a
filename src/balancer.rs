// =============================================================================
// FABRIC CORE — balancer.rs
// =============================================================================
//
// LoadBalancer — picks a node for a task and watches fleet load.
//
//   Filter     — Active/Idle, not excluded, all required capabilities,
//                load < 0.95
//   Strategy   — RoundRobin | LeastLoaded | CapabilityBased | Composite
//   Composite  — capability + affinity + kind bonus − load penalty
//   Rebalance  — advisory: overloaded (>0.8) → underloaded (<0.3) pairs with
//                a gap above 0.4, whatever the status; nothing is moved here
// =============================================================================

use crate::constants::*;
use crate::error::Result;
use crate::node::{ConnectionKind, Node, NodeKind};
use crate::topology::TopologyManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

// -----------------------------------------------------------------------------
// Strategy
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    LeastLoaded,
    CapabilityBased,
    /// affinity-aware scoring; the default
    Composite,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::RoundRobin      => "round_robin",
            Strategy::LeastLoaded     => "least_loaded",
            Strategy::CapabilityBased => "capability_based",
            Strategy::Composite       => "composite",
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Composite
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Ok(Strategy::RoundRobin),
            "least_loaded" | "leastloaded" => Ok(Strategy::LeastLoaded),
            "capability_based" | "capability" => Ok(Strategy::CapabilityBased),
            "composite" | "affinity" | "affinity_aware" => Ok(Strategy::Composite),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

// -----------------------------------------------------------------------------
// TaskKind — lookup tables for scoring
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Compute,
    Analysis,
    Storage,
    Routing,
    Federation,
    Coordination,
    Generic,
}

impl TaskKind {
    /// Lenient: anything unrecognised is `Generic`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compute" | "processing" => TaskKind::Compute,
            "analysis" | "analytics" => TaskKind::Analysis,
            "storage" | "persistence" => TaskKind::Storage,
            "routing" | "relay" => TaskKind::Routing,
            "federation" | "bridge" => TaskKind::Federation,
            "coordination" | "orchestration" => TaskKind::Coordination,
            _ => TaskKind::Generic,
        }
    }

    pub fn preferred_capabilities(&self) -> &'static [&'static str] {
        match self {
            TaskKind::Compute      => &["compute", "gpu", "parallel"],
            TaskKind::Analysis     => &["analysis", "ml", "pattern_recognition"],
            TaskKind::Storage      => &["storage", "persistence", "cache"],
            TaskKind::Routing      => &["routing", "relay", "low_latency"],
            TaskKind::Federation   => &["federation", "bridge", "protocol_translation"],
            TaskKind::Coordination => &["coordination", "scheduling", "consensus"],
            TaskKind::Generic      => &[],
        }
    }

    pub fn canonical_handler(&self) -> Option<NodeKind> {
        match self {
            TaskKind::Compute      => Some(NodeKind::Worker),
            TaskKind::Analysis     => Some(NodeKind::Analyzer),
            TaskKind::Storage      => Some(NodeKind::Storage),
            TaskKind::Routing      => Some(NodeKind::Relay),
            TaskKind::Federation   => Some(NodeKind::Gateway),
            TaskKind::Coordination => Some(NodeKind::Orchestrator),
            TaskKind::Generic      => None,
        }
    }

    /// Edge kind that earns the affinity bonus
    pub fn preferred_connection(&self) -> ConnectionKind {
        match self {
            TaskKind::Federation => ConnectionKind::Federated,
            TaskKind::Storage    => ConnectionKind::Cached,
            TaskKind::Routing    => ConnectionKind::Direct,
            TaskKind::Compute | TaskKind::Analysis | TaskKind::Coordination | TaskKind::Generic => {
                ConnectionKind::AffinityEntangled
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Records
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub at: DateTime<Utc>,
    pub load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedMigration {
    pub from_node: String,
    pub to_node: String,
    pub from_load: f64,
    pub to_load: f64,
    pub load_gap: f64,
    /// share of load that would even out the pair
    pub suggested_transfer: f64,
    pub created_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// LoadBalancer
// -----------------------------------------------------------------------------

pub struct LoadBalancer {
    strategy: Strategy,
    rr_counter: usize,
    history: HashMap<String, VecDeque<LoadSample>>,
    history_cap: usize,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy, history_cap: usize) -> Self {
        LoadBalancer {
            strategy,
            rr_counter: 0,
            history: HashMap::new(),
            history_cap: history_cap.max(1),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        if strategy != self.strategy {
            log::info!("⚖️ Balancer strategy {} → {}", self.strategy, strategy);
            self.strategy = strategy;
            self.rr_counter = 0;
        }
    }

    /// Picks a node for `task`, or None when no node passes the filter.
    pub fn select_node(
        &mut self,
        topology: &TopologyManager,
        task: TaskKind,
        required_capabilities: &[String],
        exclude: &HashSet<String>,
    ) -> Option<String> {
        let candidates: Vec<&Node> = topology
            .nodes()
            .filter(|n| n.status.is_available())
            .filter(|n| !exclude.contains(&n.node_id))
            .filter(|n| n.has_capabilities(required_capabilities))
            .filter(|n| n.current_load < SELECTION_LOAD_GATE)
            .collect();

        if candidates.is_empty() {
            log::debug!("⚖️ No candidate for {:?} (required {:?})", task, required_capabilities);
            return None;
        }

        let chosen = match self.strategy {
            Strategy::RoundRobin => {
                let pick = candidates[self.rr_counter % candidates.len()];
                self.rr_counter = self.rr_counter.wrapping_add(1);
                pick
            }
            Strategy::LeastLoaded => best_by(&candidates, |n| -n.current_load),
            Strategy::CapabilityBased => best_by(&candidates, |n| capability_score(n, task)),
            Strategy::Composite => {
                let mut best = candidates[0];
                let mut best_score = composite_score(topology, best, task);
                for &node in &candidates[1..] {
                    let score = composite_score(topology, node, task);
                    if score > best_score
                        || (score == best_score && node.current_load < best.current_load)
                    {
                        best = node;
                        best_score = score;
                    }
                }
                best
            }
        };

        log::debug!(
            "⚖️ [{}] selected for {:?} via {} (load {:.2})",
            chosen.node_id,
            task,
            self.strategy,
            chosen.current_load
        );
        Some(chosen.node_id.clone())
    }

    /// Records the sample and forwards the value to the topology.
    pub fn update_load(&mut self, topology: &mut TopologyManager, node_id: &str, load: f64) -> Result<()> {
        let load = load.clamp(0.0, 1.0);
        topology.set_load(node_id, load)?;

        let samples = self.history.entry(node_id.to_string()).or_default();
        samples.push_back(LoadSample { at: Utc::now(), load });
        while samples.len() > self.history_cap {
            samples.pop_front();
        }
        Ok(())
    }

    pub fn load_history(&self, node_id: &str) -> Vec<LoadSample> {
        self.history
            .get(node_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops history of a node that left the fleet.
    pub fn forget(&mut self, node_id: &str) {
        self.history.remove(node_id);
    }

    pub fn stats(&self, topology: &TopologyManager) -> BalancerStats {
        let loads: Vec<f64> = topology.nodes().map(|n| n.current_load).collect();
        let n = loads.len();
        if n == 0 {
            return BalancerStats { strategy: self.strategy, ..Default::default() };
        }

        let avg = loads.iter().sum::<f64>() / n as f64;
        let variance = loads.iter().map(|l| (l - avg).powi(2)).sum::<f64>() / n as f64;

        let mut per_kind: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for node in topology.nodes() {
            let entry = per_kind.entry(node.kind.name().to_string()).or_insert((0.0, 0));
            entry.0 += node.current_load;
            entry.1 += 1;
        }

        BalancerStats {
            strategy: self.strategy,
            node_count: n,
            avg_load: avg,
            max_load: loads.iter().cloned().fold(f64::MIN, f64::max),
            min_load: loads.iter().cloned().fold(f64::MAX, f64::min),
            stddev_load: variance.sqrt(),
            per_kind_avg_load: per_kind
                .into_iter()
                .map(|(kind, (sum, count))| (kind, sum / count as f64))
                .collect(),
            overloaded_count: loads.iter().filter(|&&l| l > OVERLOADED_THRESHOLD).count(),
            idle_count: loads.iter().filter(|&&l| l < IDLE_THRESHOLD).count(),
        }
    }

    /// Suggestions only; the caller decides whether to move work.
    pub fn rebalance(&self, topology: &TopologyManager) -> Vec<SuggestedMigration> {
        let overloaded: Vec<&Node> = topology
            .nodes()
            .filter(|n| n.current_load > OVERLOADED_THRESHOLD)
            .collect();
        let targets: Vec<&Node> = topology
            .nodes()
            .filter(|n| n.current_load < REBALANCE_TARGET_THRESHOLD)
            .collect();

        let now = Utc::now();
        let mut out = Vec::new();
        for from in &overloaded {
            for to in &targets {
                let gap = from.current_load - to.current_load;
                if gap > REBALANCE_MIN_GAP {
                    out.push(SuggestedMigration {
                        from_node: from.node_id.clone(),
                        to_node: to.node_id.clone(),
                        from_load: from.current_load,
                        to_load: to.current_load,
                        load_gap: gap,
                        suggested_transfer: gap / 2.0,
                        created_at: now,
                    });
                }
            }
        }
        out.sort_by(|a, b| {
            b.load_gap
                .total_cmp(&a.load_gap)
                .then_with(|| a.from_node.cmp(&b.from_node))
                .then_with(|| a.to_node.cmp(&b.to_node))
        });
        if !out.is_empty() {
            log::info!("⚖️ Rebalance: {} migration suggestions", out.len());
        }
        out
    }
}

/// First candidate with the highest score; later equal scores never win.
fn best_by<'a, F>(candidates: &[&'a Node], score: F) -> &'a Node
where
    F: Fn(&Node) -> f64,
{
    let mut best = candidates[0];
    let mut best_score = score(best);
    for &node in &candidates[1..] {
        let s = score(node);
        if s > best_score {
            best = node;
            best_score = s;
        }
    }
    best
}

fn preferred_matches(node: &Node, task: TaskKind) -> usize {
    task.preferred_capabilities()
        .iter()
        .filter(|c| node.capabilities.contains(**c))
        .count()
}

fn capability_score(node: &Node, task: TaskKind) -> f64 {
    preferred_matches(node, task) as f64 * (1.0 - node.current_load)
}

fn composite_score(topology: &TopologyManager, node: &Node, task: TaskKind) -> f64 {
    let preferred = task.preferred_capabilities();
    let capability = if preferred.is_empty() {
        0.0
    } else {
        preferred_matches(node, task) as f64 / preferred.len() as f64
    };

    let wanted = task.preferred_connection();
    let strength: f64 = node
        .connections
        .iter()
        .filter(|(_, kind)| **kind == wanted)
        .filter_map(|(peer, _)| topology.connection(&node.node_id, peer))
        .filter(|c| c.active)
        .map(|c| c.strength)
        .sum();
    let affinity = strength.min(AFFINITY_STRENGTH_CAP) * AFFINITY_BONUS_SCALE;

    let kind_bonus = if task.canonical_handler() == Some(node.kind) { KIND_BONUS } else { 0.0 };
    let load_penalty = node.current_load * LOAD_PENALTY_WEIGHT;

    capability + affinity + kind_bonus - load_penalty
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BalancerStats {
    pub strategy: Strategy,
    pub node_count: usize,
    pub avg_load: f64,
    pub max_load: f64,
    pub min_load: f64,
    pub stddev_load: f64,
    pub per_kind_avg_load: BTreeMap<String, f64>,
    pub overloaded_count: usize,
    pub idle_count: usize,
}

impl fmt::Display for BalancerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "balancer[{}]: nodes={} avg={:.2} min={:.2} max={:.2} σ={:.3} overloaded={} idle={}",
            self.strategy,
            self.node_count,
            self.avg_load,
            self.min_load,
            self.max_load,
            self.stddev_load,
            self.overloaded_count,
            self.idle_count,
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
