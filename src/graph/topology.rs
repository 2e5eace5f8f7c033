//! Topological analysis of pipeline graphs.
//!
//! Builds a petgraph view of the connections for:
//! - topological ordering (producers before consumers)
//! - cycle checks before a connection is made
//! - upstream and downstream closures

use crate::core::error::{GraphError, GraphResult, NodeId};
use crate::graph::connection::Connection;
use crate::graph::structure::PipelineGraph;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::HashMap;

/// Analyzer for graph topology.
pub struct TopologyAnalyzer {
    graph: DiGraph<NodeId, Connection>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl TopologyAnalyzer {
    /// Snapshot the topology of `pipeline`.
    pub fn new(pipeline: &PipelineGraph) -> Self {
        let mut graph = DiGraph::with_capacity(pipeline.node_count(), 0);
        let mut indices = HashMap::with_capacity(pipeline.node_count());
        for node_id in pipeline.node_ids() {
            indices.insert(node_id, graph.add_node(node_id));
        }
        for connection in pipeline.connections() {
            if let (Some(&from), Some(&to)) = (
                indices.get(&connection.from.node_id),
                indices.get(&connection.to.node_id),
            ) {
                graph.add_edge(from, to, connection);
            }
        }
        Self { graph, indices }
    }

    fn index(&self, node_id: NodeId) -> GraphResult<NodeIndex> {
        self.indices
            .get(&node_id)
            .copied()
            .ok_or(GraphError::NodeNotFound(node_id))
    }

    /// Nodes ordered so that every producer precedes its consumers.
    pub fn topological_sort(&self) -> GraphResult<Vec<NodeId>> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|index| self.graph[index]).collect())
            .map_err(|cycle| GraphError::CycleDetected {
                nodes: vec![self.graph[cycle.node_id()]],
            })
    }

    /// Whether adding an edge `from -> to` would close a cycle.
    pub fn would_create_cycle(&self, from: NodeId, to: NodeId) -> GraphResult<bool> {
        if from == to {
            return Ok(true);
        }
        let from = self.index(from)?;
        let to = self.index(to)?;
        Ok(has_path_connecting(&self.graph, to, from, None))
    }

    /// Every node `node_id` reads from, directly or transitively.
    pub fn upstream(&self, node_id: NodeId) -> GraphResult<Vec<NodeId>> {
        let start = self.index(node_id)?;
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut result = Vec::new();
        while let Some(index) = dfs.next(reversed) {
            if index != start {
                result.push(self.graph[index]);
            }
        }
        Ok(result)
    }

    /// Every node that reads from `node_id`, directly or transitively.
    pub fn downstream(&self, node_id: NodeId) -> GraphResult<Vec<NodeId>> {
        let start = self.index(node_id)?;
        let mut dfs = Dfs::new(&self.graph, start);
        let mut result = Vec::new();
        while let Some(index) = dfs.next(&self.graph) {
            if index != start {
                result.push(self.graph[index]);
            }
        }
        Ok(result)
    }

    /// Nodes without connected inputs.
    pub fn sources(&self) -> Vec<NodeId> {
        self.graph
            .externals(petgraph::Direction::Incoming)
            .map(|index| self.graph[index])
            .collect()
    }

    /// Nodes whose outputs nobody reads.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.graph
            .externals(petgraph::Direction::Outgoing)
            .map(|index| self.graph[index])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::builtin::{ConstantSource, ShiftScale};

    fn chain() -> (PipelineGraph, NodeId, NodeId, NodeId) {
        let mut graph = PipelineGraph::new();
        let a = graph.add_node(Box::new(ConstantSource::default()));
        let b = graph.add_node(Box::new(ShiftScale::<f32>::default()));
        let c = graph.add_node(Box::new(ShiftScale::<f32>::default()));
        graph.connect(a, 0, b, 0).unwrap();
        graph.connect(b, 0, c, 0).unwrap();
        (graph, a, b, c)
    }

    #[test]
    fn test_topological_sort() {
        let (graph, a, b, c) = chain();
        let order = TopologyAnalyzer::new(&graph).topological_sort().unwrap();
        let position = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(position(a) < position(b));
        assert!(position(b) < position(c));
    }

    #[test]
    fn test_would_create_cycle() {
        let (graph, a, b, c) = chain();
        let analyzer = TopologyAnalyzer::new(&graph);
        assert!(analyzer.would_create_cycle(c, a).unwrap());
        assert!(analyzer.would_create_cycle(b, b).unwrap());
        assert!(!analyzer.would_create_cycle(a, c).unwrap());
        assert!(analyzer.would_create_cycle(NodeId::new(), a).is_err());
    }

    #[test]
    fn test_upstream_downstream() {
        let (graph, a, b, c) = chain();
        let analyzer = TopologyAnalyzer::new(&graph);

        let downstream = analyzer.downstream(a).unwrap();
        assert_eq!(downstream.len(), 2);
        assert!(downstream.contains(&b));
        assert!(downstream.contains(&c));

        let upstream = analyzer.upstream(c).unwrap();
        assert_eq!(upstream.len(), 2);
        assert!(upstream.contains(&a));

        assert_eq!(analyzer.sources(), vec![a]);
        assert_eq!(analyzer.sinks(), vec![c]);
    }
}
