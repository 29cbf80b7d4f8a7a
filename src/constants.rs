//! Default limits and thresholds for the fabric.
//!
//! Every value here is the default of a `FabricConfig` field or a fixed
//! scoring weight used by the router and the balancer.

/// Fabric name shown by the node binary
pub const FABRIC_NAME: &str = "Fabric Core";

/// Fabric version
pub const VERSION: &str = "0.1.0-alpha";

// ═══════════════════════════════════════════════════════════════
// Topology
// ═══════════════════════════════════════════════════════════════

/// Maximum entries in a node's connection map
pub const MAX_CONNECTIONS_PER_NODE: usize = 10;

/// Hop limit for path search
pub const MAX_HOPS: usize = 5;

/// Default node capacity
pub const DEFAULT_MAX_CAPACITY: f64 = 1.0;

/// Heartbeat age after which a node is evicted
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 120;

// ═══════════════════════════════════════════════════════════════
// Router
// ═══════════════════════════════════════════════════════════════

pub const MAX_QUEUE_SIZE: usize = 1000;
pub const BATCH_SIZE: usize = 50;
pub const ROUTING_REFRESH_SECS: u64 = 60;

/// Messages above this priority take the 2-hop fast path
pub const FAST_PATH_PRIORITY: f64 = 0.8;

/// Intermediate nodes above this load trigger a route warning
pub const ROUTE_OVERLOAD_THRESHOLD: f64 = 0.8;

pub const DEFAULT_TTL: i32 = 10;

// ═══════════════════════════════════════════════════════════════
// Balancer
// ═══════════════════════════════════════════════════════════════

/// Nodes at or above this load are never selected
pub const SELECTION_LOAD_GATE: f64 = 0.95;

pub const LOAD_HISTORY_CAP: usize = 100;

pub const OVERLOADED_THRESHOLD: f64 = 0.8;
pub const IDLE_THRESHOLD: f64 = 0.2;

/// Rebalance pairs overloaded nodes with nodes below this load
pub const REBALANCE_TARGET_THRESHOLD: f64 = 0.3;

/// Minimum load gap for a migration suggestion
pub const REBALANCE_MIN_GAP: f64 = 0.4;

pub const AFFINITY_BONUS_SCALE: f64 = 0.2;
pub const AFFINITY_STRENGTH_CAP: f64 = 1.0;
pub const KIND_BONUS: f64 = 0.5;
pub const LOAD_PENALTY_WEIGHT: f64 = 0.5;

/// Load standard deviation the tick reports as imbalance
pub const IMBALANCE_STDDEV_THRESHOLD: f64 = 0.25;

// ═══════════════════════════════════════════════════════════════
// Scheduler / federation
// ═══════════════════════════════════════════════════════════════

pub const TICK_INTERVAL_SECS: u64 = 30;

/// Nodes a new federation gateway is attached to
pub const FEDERATION_ANCHOR_COUNT: usize = 3;

pub const GATEWAY_PREFIX: &str = "gw-";

/// Print the node banner
pub fn print_banner() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                    FABRIC CORE NODE                        ║");
    println!("║                                                            ║");
    println!("║  Topology • Routing • Load Balancing                       ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("  {} v{}", FABRIC_NAME, VERSION);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_ordered() {
        assert!(IDLE_THRESHOLD < REBALANCE_TARGET_THRESHOLD);
        assert!(REBALANCE_TARGET_THRESHOLD < OVERLOADED_THRESHOLD);
        assert!(OVERLOADED_THRESHOLD < SELECTION_LOAD_GATE);
        assert!(SELECTION_LOAD_GATE <= 1.0);
    }
}
