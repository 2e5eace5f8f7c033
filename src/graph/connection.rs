//! Connection types for the graph.

use crate::core::error::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A port on a node: an output index on the producing side, an input
/// index on the consuming side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node_id: NodeId,
    pub port: usize,
}

impl Endpoint {
    pub fn new(node_id: NodeId, port: usize) -> Self {
        Self { node_id, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.port)
    }
}

/// An edge from a producer's output to a consumer's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Producer output.
    pub from: Endpoint,
    /// Consumer input.
    pub to: Endpoint,
}

impl Connection {
    pub fn new(from: Endpoint, to: Endpoint) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection() {
        let node1 = NodeId::new();
        let node2 = NodeId::new();

        let conn = Connection::new(Endpoint::new(node1, 0), Endpoint::new(node2, 1));

        assert_eq!(conn.from.node_id, node1);
        assert_eq!(conn.to.port, 1);
        assert_eq!(conn.to_string(), format!("{}:0 -> {}:1", node1, node2));
    }
}
