//! Graph structure and node management.
//!
//! The PipelineGraph owns every node in an arena keyed by [`NodeId`].
//! A node refers to its producers by id only, so ownership never forms a
//! cycle; connecting nodes into a cycle is rejected outright.

use crate::core::data::{DataObject, Decorated, Image};
use crate::core::error::{GraphError, GraphResult, NodeId, ThreadingError};
use crate::core::node::{Filter, NodeMetadata, NodeState};
use crate::core::region::ImageRegion;
use crate::core::timestamp::TimeStamp;
use crate::core::types::{Pixel, Value};
use crate::execution::progress::{AbortHandle, EventHub, Observer};
use crate::graph::connection::{Connection, Endpoint};
use crate::graph::topology::TopologyAnalyzer;
use crate::threading::driver::ParallelDriver;
use indexmap::IndexMap;
use log::debug;
use std::fmt;
use std::sync::Arc;

/// A filter instance in the graph together with its outputs and update
/// bookkeeping.
pub struct PipelineNode {
    pub(crate) id: NodeId,
    pub(crate) label: Option<String>,
    pub(crate) metadata: NodeMetadata,
    /// Checked out while the filter runs.
    pub(crate) filter: Option<Box<dyn Filter>>,
    /// Producer output feeding each input slot.
    pub(crate) inputs: Vec<Option<Endpoint>>,
    pub(crate) outputs: Vec<Box<dyn DataObject>>,
    /// Requested regions set explicitly per output.
    pub(crate) requested: Vec<Option<ImageRegion>>,
    pub(crate) state: NodeState,
    pub(crate) modified_time: TimeStamp,
    pub(crate) update_time: TimeStamp,
    pub(crate) information_time: TimeStamp,
    pub(crate) pipeline_time: u64,
    pub(crate) release_data: bool,
    pub(crate) threads: Option<usize>,
    pub(crate) generation_count: u64,
    pub(crate) abort: AbortHandle,
}

impl PipelineNode {
    fn new(filter: Box<dyn Filter>) -> Self {
        let metadata = filter.metadata();
        let outputs = (0..metadata.number_of_outputs())
            .map(|index| filter.make_output(index))
            .collect();
        let mut modified_time = TimeStamp::new();
        modified_time.modified();

        Self {
            id: NodeId::new(),
            label: None,
            inputs: vec![None; metadata.max_inputs],
            requested: vec![None; metadata.number_of_outputs()],
            metadata,
            filter: Some(filter),
            outputs,
            state: NodeState::Unmodified,
            modified_time,
            update_time: TimeStamp::new(),
            information_time: TimeStamp::new(),
            pipeline_time: 0,
            release_data: false,
            threads: None,
            generation_count: 0,
            abort: AbortHandle::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    /// Get the display name (label or filter name).
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.metadata.name.clone())
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Last time the node itself was modified.
    pub fn modified_time(&self) -> TimeStamp {
        self.modified_time
    }

    /// Last time the node's outputs were generated.
    pub fn update_time(&self) -> TimeStamp {
        self.update_time
    }

    /// Newest modification anywhere upstream, as of the last information
    /// pass.
    pub fn pipeline_time(&self) -> u64 {
        self.pipeline_time
    }

    pub fn release_data_flag(&self) -> bool {
        self.release_data
    }

    /// Thread count override, if any.
    pub fn number_of_threads(&self) -> Option<usize> {
        self.threads
    }

    /// Successful `generate_data` calls so far.
    pub fn generation_count(&self) -> u64 {
        self.generation_count
    }

    pub fn inputs(&self) -> &[Option<Endpoint>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Box<dyn DataObject>] {
        &self.outputs
    }

    /// Producers of the connected inputs, in slot order.
    pub(crate) fn producers(&self) -> Vec<Endpoint> {
        self.inputs.iter().flatten().copied().collect()
    }

    pub(crate) fn mark_modified(&mut self) {
        self.modified_time.modified();
        self.state = NodeState::Modified;
    }
}

impl fmt::Debug for PipelineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineNode")
            .field("id", &self.id)
            .field("tag", &self.metadata.tag)
            .field("label", &self.label)
            .field("state", &self.state)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("modified_time", &self.modified_time.get())
            .field("update_time", &self.update_time.get())
            .finish()
    }
}

/// The pipeline: nodes, their connections and the pieces shared by every
/// update (worker pool and event observers).
///
/// Uses IndexMap to maintain insertion order for consistent iteration.
pub struct PipelineGraph {
    pub(crate) nodes: IndexMap<NodeId, PipelineNode>,
    driver: Option<Arc<ParallelDriver>>,
    pub(crate) events: EventHub,
}

impl PipelineGraph {
    /// Create an empty graph running on the global driver.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            driver: None,
            events: EventHub::new(),
        }
    }

    /// Run filters on `driver` instead of the global one.
    pub fn with_driver(mut self, driver: Arc<ParallelDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// The driver filters split their work on.
    pub fn driver(&self) -> Result<Arc<ParallelDriver>, ThreadingError> {
        match &self.driver {
            Some(driver) => Ok(Arc::clone(driver)),
            None => ParallelDriver::global(),
        }
    }

    /// Register an observer for pipeline events.
    pub fn add_observer(&mut self, observer: Observer) {
        self.events.add(observer);
    }

    // ========================================================================
    // Node Management
    // ========================================================================

    /// Add a filter and return its node ID.
    pub fn add_node(&mut self, filter: Box<dyn Filter>) -> NodeId {
        let node = PipelineNode::new(filter);
        let id = node.id;
        debug!("Added node {} ({})", id, node.metadata.tag);
        self.nodes.insert(id, node);
        id
    }

    /// Add a filter with a lookup label.
    pub fn add_node_with_label(&mut self, filter: Box<dyn Filter>, label: impl Into<String>) -> NodeId {
        let id = self.add_node(filter);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.label = Some(label.into());
        }
        id
    }

    /// Remove a node nobody reads from.
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<Box<dyn Filter>> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        let has_consumers = self
            .nodes
            .values()
            .any(|node| node.inputs.iter().flatten().any(|e| e.node_id == id));
        if has_consumers {
            return Err(GraphError::NodeHasConsumers(id));
        }

        let node = self
            .nodes
            .shift_remove(&id)
            .ok_or(GraphError::NodeNotFound(id))?;
        node.filter.ok_or(GraphError::NodeNotFound(id))
    }

    /// Get a reference to a node.
    pub fn node(&self, id: NodeId) -> GraphResult<&PipelineNode> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut PipelineNode> {
        self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
    }

    /// Check if a node exists.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Get all node IDs.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// First node carrying `label`.
    pub fn find_by_label(&self, label: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| node.label.as_deref() == Some(label))
            .map(|node| node.id)
    }

    pub fn state(&self, id: NodeId) -> GraphResult<NodeState> {
        self.node(id).map(|node| node.state)
    }

    /// Number of times `id` has generated data.
    pub fn generation_count(&self, id: NodeId) -> GraphResult<u64> {
        self.node(id).map(|node| node.generation_count)
    }

    // ========================================================================
    // Connection Management
    // ========================================================================

    /// Feed output `from_port` of `from` into input `to_port` of `to`,
    /// replacing whatever was connected there.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: usize,
        to: NodeId,
        to_port: usize,
    ) -> GraphResult<Connection> {
        let outputs = self.node(from)?.outputs.len();
        if from_port >= outputs {
            return Err(GraphError::OutputOutOfRange {
                node_id: from,
                index: from_port,
                count: outputs,
            });
        }
        let inputs = self.node(to)?.inputs.len();
        if to_port >= inputs {
            return Err(GraphError::InputOutOfRange {
                node_id: to,
                index: to_port,
                count: inputs,
            });
        }

        if TopologyAnalyzer::new(self).would_create_cycle(from, to)? {
            return Err(GraphError::CycleDetected {
                nodes: vec![from, to],
            });
        }

        let connection = Connection::new(Endpoint::new(from, from_port), Endpoint::new(to, to_port));
        let node = self.node_mut(to)?;
        if node.inputs[to_port] != Some(connection.from) {
            node.inputs[to_port] = Some(connection.from);
            node.mark_modified();
        }
        debug!("Connected {}", connection);
        Ok(connection)
    }

    /// Disconnect input `port` of `node_id`, returning the removed
    /// connection.
    pub fn disconnect(&mut self, node_id: NodeId, port: usize) -> GraphResult<Option<Connection>> {
        let node = self.node_mut(node_id)?;
        let count = node.inputs.len();
        let slot = node.inputs.get_mut(port).ok_or(GraphError::InputOutOfRange {
            node_id,
            index: port,
            count,
        })?;

        let removed = slot.take();
        if removed.is_some() {
            node.mark_modified();
        }
        Ok(removed.map(|from| Connection::new(from, Endpoint::new(node_id, port))))
    }

    /// Every connection, grouped by consumer in node order.
    pub fn connections(&self) -> Vec<Connection> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.inputs.iter().enumerate().filter_map(move |(port, from)| {
                    from.map(|from| Connection::new(from, Endpoint::new(node.id, port)))
                })
            })
            .collect()
    }

    /// Get the number of connections.
    pub fn connection_count(&self) -> usize {
        self.nodes
            .values()
            .map(|node| node.inputs.iter().flatten().count())
            .sum()
    }

    // ========================================================================
    // Node settings
    // ========================================================================

    /// Assign a filter parameter. The node is marked modified only if the
    /// value changed.
    pub fn set_parameter(&mut self, id: NodeId, name: &str, value: impl Into<Value>) -> GraphResult<()> {
        let value = value.into();
        let node = self.node_mut(id)?;
        let filter = node.filter.as_mut().ok_or(GraphError::NodeNotFound(id))?;
        let changed = filter
            .set_parameter(name, &value)
            .map_err(|e| e.into_graph_error(id, name))?;
        if changed {
            debug!("Node {} parameter {} = {}", id, name, value);
            node.mark_modified();
        }
        Ok(())
    }

    /// Current value of a filter parameter.
    pub fn parameter(&self, id: NodeId, name: &str) -> GraphResult<Value> {
        let node = self.node(id)?;
        node.filter
            .as_ref()
            .and_then(|filter| filter.parameter(name))
            .ok_or_else(|| GraphError::UnknownParameter {
                node_id: id,
                name: name.to_string(),
            })
    }

    /// Mark a node modified so the next update recomputes it and everything
    /// downstream.
    pub fn mark_modified(&mut self, id: NodeId) -> GraphResult<()> {
        self.node_mut(id)?.mark_modified();
        Ok(())
    }

    /// Release this node's outputs once their consumers have run.
    pub fn set_release_data_flag(&mut self, id: NodeId, release: bool) -> GraphResult<()> {
        self.node_mut(id)?.release_data = release;
        Ok(())
    }

    /// Override the number of threads this node splits into.
    pub fn set_number_of_threads(&mut self, id: NodeId, threads: Option<usize>) -> GraphResult<()> {
        let node = self.node_mut(id)?;
        if node.threads != threads {
            node.threads = threads;
            node.mark_modified();
        }
        Ok(())
    }

    /// Ask `update` to produce only `region` of output `port`. `None`
    /// returns to the largest possible region.
    pub fn set_requested_region(
        &mut self,
        id: NodeId,
        port: usize,
        region: Option<ImageRegion>,
    ) -> GraphResult<()> {
        let node = self.node_mut(id)?;
        let count = node.outputs.len();
        let output = node.outputs.get(port).ok_or(GraphError::OutputOutOfRange {
            node_id: id,
            index: port,
            count,
        })?;

        if let (Some(region), Some(regions)) = (&region, output.regions()) {
            let dimension = regions.largest_possible.dimension();
            if !regions.largest_possible.is_unset() && region.dimension() != dimension {
                return Err(GraphError::RegionDimension {
                    node_id: id,
                    region: region.clone(),
                    dimension,
                });
            }
        }
        node.requested[port] = region;
        Ok(())
    }

    /// Flag asking `id`'s running computation to stop.
    pub fn abort_handle(&self, id: NodeId) -> GraphResult<AbortHandle> {
        self.node(id).map(|node| node.abort.clone())
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// Data object on output `port` of `id`.
    pub fn output(&self, id: NodeId, port: usize) -> GraphResult<&dyn DataObject> {
        let node = self.node(id)?;
        node.outputs
            .get(port)
            .map(|output| output.as_ref())
            .ok_or(GraphError::OutputOutOfRange {
                node_id: id,
                index: port,
                count: node.outputs.len(),
            })
    }

    /// Image on output `port` of `id`.
    pub fn output_image<P: Pixel>(&self, id: NodeId, port: usize) -> GraphResult<&Image<P>> {
        let output = self.output(id, port)?;
        output
            .as_any()
            .downcast_ref::<Image<P>>()
            .ok_or(GraphError::OutputTypeMismatch {
                node_id: id,
                index: port,
                expected: P::TYPE_NAME,
                got: output.type_name(),
            })
    }

    /// Value held by decorated output `port` of `id`, if generated.
    pub fn output_value<T>(&self, id: NodeId, port: usize) -> GraphResult<Option<&T>>
    where
        T: Send + Sync + fmt::Debug + 'static,
    {
        let output = self.output(id, port)?;
        output
            .as_any()
            .downcast_ref::<Decorated<T>>()
            .map(|decorated| decorated.get())
            .ok_or(GraphError::OutputTypeMismatch {
                node_id: id,
                index: port,
                expected: std::any::type_name::<T>(),
                got: output.type_name(),
            })
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("nodes", &self.nodes.values().collect::<Vec<_>>())
            .field("events", &self.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::builtin::{Add, ConstantSource, ShiftScale};

    fn source() -> Box<dyn Filter> {
        Box::new(ConstantSource::default())
    }

    fn shift() -> Box<dyn Filter> {
        Box::new(ShiftScale::<f32>::default())
    }

    #[test]
    fn test_add_remove_node() {
        let mut graph = PipelineGraph::new();

        let id = graph.add_node(source());
        assert_eq!(graph.node_count(), 1);
        assert!(graph.has_node(id));
        assert_eq!(graph.state(id).unwrap(), NodeState::Unmodified);

        graph.remove_node(id).unwrap();
        assert_eq!(graph.node_count(), 0);
        assert!(matches!(graph.remove_node(id), Err(GraphError::NodeNotFound(_))));
    }

    #[test]
    fn test_remove_node_with_consumers() {
        let mut graph = PipelineGraph::new();
        let a = graph.add_node(source());
        let b = graph.add_node(shift());
        graph.connect(a, 0, b, 0).unwrap();

        assert!(matches!(graph.remove_node(a), Err(GraphError::NodeHasConsumers(_))));
        graph.disconnect(b, 0).unwrap();
        assert!(graph.remove_node(a).is_ok());
    }

    #[test]
    fn test_connect_marks_consumer_modified() {
        let mut graph = PipelineGraph::new();
        let a = graph.add_node(source());
        let b = graph.add_node(shift());
        let before = graph.node(b).unwrap().modified_time();

        let connection = graph.connect(a, 0, b, 0).unwrap();
        assert_eq!(connection.from, Endpoint::new(a, 0));
        assert_eq!(graph.state(b).unwrap(), NodeState::Modified);
        assert!(graph.node(b).unwrap().modified_time().is_newer_than(&before));
        assert_eq!(graph.connections(), vec![connection]);

        let removed = graph.disconnect(b, 0).unwrap();
        assert_eq!(removed, Some(connection));
        assert_eq!(graph.connection_count(), 0);
        assert_eq!(graph.disconnect(b, 0).unwrap(), None);
    }

    #[test]
    fn test_connect_validates_ports() {
        let mut graph = PipelineGraph::new();
        let a = graph.add_node(source());
        let b = graph.add_node(Box::new(Add::<f32>::default()));

        assert!(matches!(
            graph.connect(a, 1, b, 0),
            Err(GraphError::OutputOutOfRange { index: 1, .. })
        ));
        assert!(matches!(
            graph.connect(a, 0, b, 2),
            Err(GraphError::InputOutOfRange { index: 2, count: 2, .. })
        ));
        graph.connect(a, 0, b, 0).unwrap();
        graph.connect(a, 0, b, 1).unwrap();
        assert_eq!(graph.connection_count(), 2);
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = PipelineGraph::new();

        let node1 = graph.add_node(shift());
        let node2 = graph.add_node(shift());
        let node3 = graph.add_node(shift());

        graph.connect(node1, 0, node2, 0).unwrap();
        graph.connect(node2, 0, node3, 0).unwrap();

        let result = graph.connect(node3, 0, node1, 0);
        assert!(matches!(result, Err(GraphError::CycleDetected { .. })));
        assert!(matches!(
            graph.connect(node1, 0, node1, 0),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_set_parameter_only_marks_changes() {
        let mut graph = PipelineGraph::new();
        let id = graph.add_node(shift());
        let created = graph.node(id).unwrap().modified_time();

        graph.set_parameter(id, "scale", 1.0).unwrap();
        assert_eq!(graph.node(id).unwrap().modified_time(), created);

        graph.set_parameter(id, "scale", 2.0).unwrap();
        assert!(graph.node(id).unwrap().modified_time().is_newer_than(&created));
        assert_eq!(graph.parameter(id, "scale").unwrap(), Value::Float(2.0));

        assert!(matches!(
            graph.set_parameter(id, "nope", 1.0),
            Err(GraphError::UnknownParameter { .. })
        ));
        assert!(matches!(
            graph.set_parameter(id, "scale", true),
            Err(GraphError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_find_by_label() {
        let mut graph = PipelineGraph::new();
        let id = graph.add_node_with_label(source(), "input");
        assert_eq!(graph.find_by_label("input"), Some(id));
        assert_eq!(graph.find_by_label("output"), None);
        assert_eq!(graph.node(id).unwrap().display_name(), "input");
    }

    #[test]
    fn test_output_access() {
        let mut graph = PipelineGraph::new();
        let id = graph.add_node(source());
        assert!(graph.output_image::<f32>(id, 0).is_ok());
        assert!(matches!(
            graph.output_image::<u8>(id, 0),
            Err(GraphError::OutputTypeMismatch { .. })
        ));
        assert!(matches!(
            graph.output(id, 4),
            Err(GraphError::OutputOutOfRange { index: 4, .. })
        ));
    }

    #[test]
    fn test_set_requested_region_checks_port() {
        let mut graph = PipelineGraph::new();
        let id = graph.add_node(source());
        assert!(graph
            .set_requested_region(id, 0, Some(ImageRegion::from_size(vec![2, 2])))
            .is_ok());
        assert!(graph.set_requested_region(id, 1, None).is_err());
    }
}
