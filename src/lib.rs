//! Fabric Core — an in-process model of a node fleet.
//!
//! Tracks the graph of worker nodes and their connections, finds routes,
//! queues messages along them and picks which node should take a task.
//! No transport lives here; callers decide what to do with the answers.

pub mod api;
pub mod balancer;
pub mod config;
pub mod constants;
pub mod error;
pub mod fabric;
pub mod message;
pub mod node;
pub mod routing;
pub mod topology;

pub use api::{FabricStatus, Operation, OperationResult};
pub use balancer::{LoadBalancer, Strategy, SuggestedMigration, TaskKind};
pub use config::FabricConfig;
pub use error::{FabricError, Result};
pub use fabric::{Fabric, TickReport};
pub use message::{Message, MessageBuilder};
pub use node::{Connection, ConnectionId, ConnectionKind, Node, NodeKind, NodeStatus, NodeView};
pub use routing::{Admission, MessageRouter, RouteOutcome, RouterStats};
pub use topology::{NodeHandle, TopologyManager, TopologyStats};
