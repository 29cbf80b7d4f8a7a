//! Fabric error types

use thiserror::Error;

/// Structural errors returned synchronously by fabric operations.
///
/// Queue overflow and TTL expiry are not errors: they are counted by the
/// router and surfaced through `Admission` and `RouterStats`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FabricError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Connection limit reached on node {node_id} (max {limit})")]
    CapacityExceeded { node_id: String, limit: usize },

    #[error("No route from {from} to {to} within {max_hops} hops")]
    NoRouteFound {
        from: String,
        to: String,
        max_hops: usize,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Fabric is closed")]
    Closed,
}

impl FabricError {
    /// Stable error code for the dispatch surface
    pub fn code(&self) -> &'static str {
        match self {
            FabricError::NotFound(_) => "not_found",
            FabricError::AlreadyExists(_) => "already_exists",
            FabricError::CapacityExceeded { .. } => "capacity_exceeded",
            FabricError::NoRouteFound { .. } => "no_route",
            FabricError::InvalidArgument(_) => "invalid_argument",
            FabricError::UnknownOperation(_) => "unknown_operation",
            FabricError::Closed => "closed",
        }
    }
}

/// Result type for fabric operations
pub type Result<T> = std::result::Result<T, FabricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(FabricError::NotFound("x".into()).code(), "not_found");
        assert_eq!(FabricError::AlreadyExists("x".into()).code(), "already_exists");
        let err = FabricError::NoRouteFound {
            from: "a".into(),
            to: "b".into(),
            max_hops: 5,
        };
        assert_eq!(err.code(), "no_route");
        assert!(err.to_string().contains("a to b"));
    }
}
