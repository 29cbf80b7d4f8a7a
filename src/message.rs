use crate::constants::DEFAULT_TTL;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work travelling from `source_id` to `target_id`.
///
/// `route` is empty until the router stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: String,
    pub payload: Vec<u8>,
    pub priority: f64,
    pub ttl: i32,
    pub route: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn hops(&self) -> usize {
        self.route.len().saturating_sub(1)
    }
}

pub struct MessageBuilder {
    source_id: String,
    target_id: String,
    kind: String,
    payload: Vec<u8>,
    priority: f64,
    ttl: i32,
    message_id: Option<String>,
}

impl MessageBuilder {
    pub fn new(source_id: &str) -> Self {
        MessageBuilder {
            source_id: source_id.to_string(),
            target_id: String::new(),
            kind: "data".to_string(),
            payload: Vec::new(),
            priority: 0.5,
            ttl: DEFAULT_TTL,
            message_id: None,
        }
    }

    pub fn to(mut self, target_id: &str) -> Self {
        self.target_id = target_id.to_string();
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Clamped to [0, 1]
    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = if priority.is_nan() { 0.0 } else { priority.clamp(0.0, 1.0) };
        self
    }

    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Caller-chosen id; a random v4 uuid otherwise.
    pub fn id(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }

    pub fn build(self) -> Message {
        Message {
            message_id: self
                .message_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            source_id: self.source_id,
            target_id: self.target_id,
            kind: self.kind,
            payload: self.payload,
            priority: self.priority,
            ttl: self.ttl,
            route: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_and_clamp() {
        let msg = MessageBuilder::new("a").to("b").priority(3.0).build();
        assert_eq!(msg.priority, 1.0);
        assert_eq!(msg.ttl, DEFAULT_TTL);
        assert!(msg.route.is_empty());
        assert_eq!(msg.hops(), 0);

        let other = MessageBuilder::new("a").to("b").build();
        assert_ne!(msg.message_id, other.message_id);
    }
}
