//! Operation surface of the fabric.
//!
//! Callers (HTTP services, federation gateways, orchestrators) speak to the
//! fabric through plain records: an `Operation` in, an `OperationResult` or a
//! `FabricError` code out. Serialization is theirs; these types only derive
//! serde so any format works.

use crate::balancer::{BalancerStats, LoadSample, Strategy, SuggestedMigration};
use crate::error::{FabricError, Result};
use crate::node::{ConnectionId, ConnectionKind, NodeKind, NodeStatus};
use crate::routing::{RouteOutcome, RouterStats};
use crate::topology::TopologyStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_strength() -> f64 {
    1.0
}

fn default_priority() -> f64 {
    0.5
}

fn default_ttl() -> i32 {
    crate::constants::DEFAULT_TTL
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AddNode {
        id: String,
        kind: NodeKind,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        location: String,
        #[serde(default)]
        parent: Option<String>,
    },
    RemoveNode {
        id: String,
    },
    UpdateStatus {
        id: String,
        status: NodeStatus,
        #[serde(default)]
        load: Option<f64>,
        #[serde(default)]
        metrics: Option<HashMap<String, f64>>,
    },
    UpdateLoad {
        id: String,
        load: f64,
    },
    CreateConnection {
        a: String,
        b: String,
        kind: ConnectionKind,
        #[serde(default = "default_strength")]
        strength: f64,
    },
    RouteMessage {
        source: String,
        target: String,
        #[serde(default)]
        kind: String,
        #[serde(default)]
        payload: Vec<u8>,
        #[serde(default = "default_priority")]
        priority: f64,
        #[serde(default = "default_ttl")]
        ttl: i32,
        #[serde(default)]
        message_id: Option<String>,
    },
    SelectNode {
        task_kind: String,
        #[serde(default)]
        required_capabilities: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
    SetParent {
        id: String,
        #[serde(default)]
        parent: Option<String>,
    },
    TouchConnection {
        a: String,
        b: String,
        #[serde(default)]
        strength: Option<f64>,
    },
    SetConnectionActive {
        a: String,
        b: String,
        active: bool,
    },
    SetStrategy {
        strategy: Strategy,
    },
    LoadHistory {
        id: String,
    },
    Rebalance,
    Status,
    Federate {
        external_system_id: String,
        endpoint: String,
        protocol: String,
    },
}

impl Operation {
    pub const NAMES: [&'static str; 15] = [
        "add_node",
        "remove_node",
        "update_status",
        "update_load",
        "create_connection",
        "route_message",
        "select_node",
        "set_parent",
        "touch_connection",
        "set_connection_active",
        "set_strategy",
        "load_history",
        "rebalance",
        "status",
        "federate",
    ];

    /// Builds an operation from its name and an argument bag.
    pub fn from_named(name: &str, args: serde_json::Value) -> Result<Operation> {
        if !Self::NAMES.contains(&name) {
            return Err(FabricError::UnknownOperation(name.to_string()));
        }
        let mut bag = match args {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(FabricError::InvalidArgument(format!(
                    "arguments of {} must be an object, got {}",
                    name, other
                )))
            }
        };
        bag.insert("op".to_string(), serde_json::Value::String(name.to_string()));
        serde_json::from_value(serde_json::Value::Object(bag))
            .map_err(|e| FabricError::InvalidArgument(format!("{}: {}", name, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationResult {
    Ok,
    Connection { connection_id: ConnectionId },
    Routed(RouteOutcome),
    Selected { node_id: Option<String> },
    Migrations { suggestions: Vec<SuggestedMigration> },
    History { samples: Vec<LoadSample> },
    Status(FabricStatus),
    Gateway { gateway_node_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricStatus {
    pub topology: TopologyStats,
    pub router: RouterStats,
    pub balancer: BalancerStats,
}

impl std::fmt::Display for FabricStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}\n{}", self.topology, self.router, self.balancer)
    }
}

/// Wire-neutral envelope: `{"ok": …}` or `{"error": {"code", "message"}}`.
pub fn respond(result: Result<OperationResult>) -> serde_json::Value {
    match result {
        Ok(value) => serde_json::json!({ "ok": value }),
        Err(e) => serde_json::json!({
            "error": { "code": e.code(), "message": e.to_string() }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_named_defaults() {
        let op = Operation::from_named(
            "route_message",
            json!({ "source": "a", "target": "b" }),
        )
        .unwrap();
        match op {
            Operation::RouteMessage { priority, ttl, kind, .. } => {
                assert_eq!(priority, 0.5);
                assert_eq!(ttl, crate::constants::DEFAULT_TTL);
                assert!(kind.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            Operation::from_named("status", serde_json::Value::Null).unwrap(),
            Operation::Status
        );
        assert_eq!(
            Operation::from_named("set_parent", json!({ "id": "c" })).unwrap(),
            Operation::SetParent { id: "c".into(), parent: None }
        );
    }

    #[test]
    fn test_from_named_errors() {
        assert_eq!(
            Operation::from_named("teleport", json!({})).unwrap_err().code(),
            "unknown_operation"
        );
        assert_eq!(
            Operation::from_named("add_node", json!({ "id": "x" })).unwrap_err().code(),
            "invalid_argument"
        );
        assert_eq!(
            Operation::from_named("remove_node", json!([1, 2])).unwrap_err().code(),
            "invalid_argument"
        );
    }

    #[test]
    fn test_respond_envelope() {
        let ok = respond(Ok(OperationResult::Selected { node_id: Some("n1".into()) }));
        assert_eq!(ok["ok"]["result"], "selected");
        assert_eq!(ok["ok"]["node_id"], "n1");

        let err = respond(Err(FabricError::NotFound("n9".into())));
        assert_eq!(err["error"]["code"], "not_found");
    }
}
