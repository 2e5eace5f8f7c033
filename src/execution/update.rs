//! The demand-driven update protocol.
//!
//! `update(node)` runs three passes over the node and everything upstream
//! of it:
//!
//! 1. **Information**: inputs first, each node derives its pipeline time
//!    and, when that moved, its outputs' largest possible regions.
//! 2. **Requested regions**: from the node towards the sources, each filter
//!    turns what is asked of its outputs into what it needs from its inputs.
//! 3. **Data**: inputs first again, every stale node allocates its outputs
//!    and generates them. A node that is current is skipped together with
//!    everything upstream of it.

use crate::core::context::{GenerateContext, Inputs};
use crate::core::data::DataObject;
use crate::core::error::{
    ComputationError, GraphError, GraphResult, NodeId, PipelineError, PipelineResult,
};
use crate::core::node::{Filter, InputRegionRequest, NodeState};
use crate::execution::progress::{PipelineEvent, ProgressReporter};
use crate::graph::connection::Endpoint;
use crate::graph::structure::PipelineGraph;
use crate::graph::topology::TopologyAnalyzer;
use log::{debug, info, trace, warn};
use std::collections::{HashMap, HashSet};

/// Graph-level operations of the update protocol.
pub trait Updatable {
    /// Bring `node`'s outputs up to date for their requested regions.
    fn update(&mut self, node: NodeId) -> PipelineResult<()>;

    /// Like [`update`](Self::update), ignoring explicit requested regions.
    fn update_largest_possible_region(&mut self, node: NodeId) -> PipelineResult<()>;

    /// Mark `node` modified.
    fn modified(&mut self, node: NodeId) -> GraphResult<()>;

    /// Return nodes stuck executing after a failure to `Modified`.
    fn reset_pipeline(&mut self, node: NodeId) -> GraphResult<usize>;
}

/// Bookkeeping for one `update` call.
#[derive(Debug, Default)]
struct UpdatePass {
    /// Nodes on the current recursion stack.
    active: HashSet<NodeId>,
    /// Pipeline times already resolved in this pass.
    pipeline_times: HashMap<NodeId, u64>,
    /// Producer outputs that already received a request in this pass.
    requested: HashSet<Endpoint>,
}

impl UpdatePass {
    fn enter(&mut self, node_id: NodeId) -> PipelineResult<()> {
        if !self.active.insert(node_id) {
            return Err(PipelineError::ReentrantUpdate(node_id));
        }
        Ok(())
    }

    fn leave(&mut self, node_id: NodeId) {
        self.active.remove(&node_id);
    }
}

impl PipelineGraph {
    /// Bring `node_id`'s outputs up to date for their requested regions.
    pub fn update(&mut self, node_id: NodeId) -> PipelineResult<()> {
        self.run_update(node_id, false)
    }

    /// Bring `node_id`'s outputs up to date over their largest possible
    /// regions, ignoring explicit requests.
    pub fn update_largest_possible_region(&mut self, node_id: NodeId) -> PipelineResult<()> {
        self.run_update(node_id, true)
    }

    /// Return `node_id` and every node upstream of it that is still marked
    /// executing to `Modified`, and lower their abort flags.
    ///
    /// Returns how many nodes were reset.
    pub fn reset_pipeline(&mut self, node_id: NodeId) -> GraphResult<usize> {
        let mut nodes = TopologyAnalyzer::new(self).upstream(node_id)?;
        nodes.push(node_id);

        let mut reset = 0;
        for id in nodes {
            let node = self.node_mut(id)?;
            node.abort.reset();
            if node.state == NodeState::Executing {
                node.state = NodeState::Modified;
                reset += 1;
            }
        }
        if reset > 0 {
            info!("Reset {} node(s) upstream of {}", reset, node_id);
        }
        Ok(reset)
    }

    fn run_update(&mut self, node_id: NodeId, largest: bool) -> PipelineResult<()> {
        debug!("Updating node {}", node_id);
        let mut pass = UpdatePass::default();

        self.update_output_information(node_id, &mut pass)?;

        let node = self.node_mut(node_id)?;
        for (output, explicit) in node.outputs.iter_mut().zip(&node.requested) {
            match explicit {
                Some(region) if !largest => {
                    if let Some(regions) = output.regions_mut() {
                        regions.requested = region.clone();
                    }
                }
                _ => output.set_requested_region_to_largest_possible_region(),
            }
        }
        let has_outputs = !node.outputs.is_empty();

        if has_outputs {
            self.propagate_requested_region(node_id, 0, &mut pass)?;
        }
        self.update_output_data(node_id, &mut pass)
    }

    // ========================================================================
    // Information pass
    // ========================================================================

    /// Resolve `node_id`'s pipeline time, regenerating its output
    /// information when anything upstream moved past the last pass.
    fn update_output_information(&mut self, node_id: NodeId, pass: &mut UpdatePass) -> PipelineResult<u64> {
        if let Some(&time) = pass.pipeline_times.get(&node_id) {
            return Ok(time);
        }
        pass.enter(node_id)?;

        let node = self.node(node_id)?;
        let mut pipeline_time = node.modified_time.get();
        for producer in node.producers() {
            let upstream = self.update_output_information(producer.node_id, pass)?;
            let data_time = self
                .node(producer.node_id)?
                .outputs
                .get(producer.port)
                .map(|output| output.timestamp().get())
                .unwrap_or(0);
            pipeline_time = pipeline_time.max(upstream).max(data_time);
        }

        let node = self.node_mut(node_id)?;
        node.pipeline_time = pipeline_time;
        let information_time = node.information_time.get();
        if information_time == 0 || pipeline_time > information_time {
            trace!("Generating output information for {}", node_id);
            let (mut filter, mut outputs) = self.checkout(node_id)?;
            let result = filter.generate_output_information(&self.input_data(node_id), &mut outputs);
            self.checkin(node_id, filter, outputs);
            result.map_err(|source| PipelineError::Computation { node_id, source })?;
            self.node_mut(node_id)?.information_time.modified();
        }

        pass.pipeline_times.insert(node_id, pipeline_time);
        pass.leave(node_id);
        Ok(pipeline_time)
    }

    // ========================================================================
    // Requested region pass
    // ========================================================================

    /// Negotiate requested regions from output `port` of `node_id` up to the
    /// sources.
    fn propagate_requested_region(
        &mut self,
        node_id: NodeId,
        port: usize,
        pass: &mut UpdatePass,
    ) -> PipelineResult<()> {
        pass.enter(node_id)?;

        let node = self.node_mut(node_id)?;
        let filter = node.filter.as_deref().ok_or(GraphError::NodeNotFound(node_id))?;
        filter.enlarge_output_requested_region(port, &mut node.outputs);
        filter.generate_output_requested_region(port, &mut node.outputs);

        for (output, data) in node.outputs.iter().enumerate() {
            if !data.verify_requested_region() {
                let regions = data.regions().cloned().unwrap_or_default();
                return Err(PipelineError::InvalidRequestedRegion {
                    node_id,
                    output,
                    requested: regions.requested,
                    largest: regions.largest_possible,
                });
            }
        }

        let endpoints = node.inputs.clone();
        let mut requests: Vec<Option<InputRegionRequest>> = endpoints
            .iter()
            .map(|slot| {
                let endpoint = (*slot)?;
                let regions = self.nodes.get(&endpoint.node_id)?.outputs.get(endpoint.port)?.regions()?;
                Some(InputRegionRequest {
                    largest_possible: regions.largest_possible.clone(),
                    requested: regions.requested.clone(),
                })
            })
            .collect();

        let node = self.node(node_id)?;
        let filter = node.filter.as_deref().ok_or(GraphError::NodeNotFound(node_id))?;
        filter.generate_input_requested_region(&node.outputs, &mut requests);

        let mut producers = Vec::new();
        for (slot, request) in endpoints.into_iter().zip(requests) {
            let (Some(endpoint), Some(request)) = (slot, request) else {
                continue;
            };
            let first_request = pass.requested.insert(endpoint);
            let output = self
                .node_mut(endpoint.node_id)?
                .outputs
                .get_mut(endpoint.port)
                .and_then(|output| output.regions_mut());
            if let Some(regions) = output {
                // Two consumers of one output share a buffer covering both.
                regions.requested = if first_request {
                    request.requested
                } else {
                    regions.requested.bounding_union(&request.requested)
                };
            }
            if !producers.contains(&endpoint) {
                producers.push(endpoint);
            }
        }

        for producer in producers {
            self.propagate_requested_region(producer.node_id, producer.port, pass)?;
        }

        pass.leave(node_id);
        Ok(())
    }

    // ========================================================================
    // Data pass
    // ========================================================================

    /// Whether `node_id`'s outputs must be regenerated.
    fn is_stale(&self, node_id: NodeId) -> GraphResult<bool> {
        let node = self.node(node_id)?;
        Ok(node.state != NodeState::UpToDate
            || node.pipeline_time > node.update_time.get()
            || node.outputs.iter().any(|output| {
                output.is_released() || output.requested_region_is_outside_of_buffered_region()
            }))
    }

    fn update_output_data(&mut self, node_id: NodeId, pass: &mut UpdatePass) -> PipelineResult<()> {
        pass.enter(node_id)?;
        if !self.is_stale(node_id)? {
            trace!("Node {} is up to date", node_id);
            pass.leave(node_id);
            return Ok(());
        }

        let producers = self.node(node_id)?.producers();
        let mut visited = HashSet::new();
        for producer in &producers {
            if visited.insert(producer.node_id) {
                self.update_output_data(producer.node_id, pass)?;
            }
        }

        let node = self.node(node_id)?;
        let required = node.metadata.required_inputs;
        let connected = node.inputs.iter().take(required).flatten().count();
        if connected < required {
            return Err(PipelineError::MissingRequiredInputs {
                node_id,
                required,
                connected,
            });
        }

        self.verify_inputs(node_id)?;

        let driver = self.driver().map_err(|e| PipelineError::Computation {
            node_id,
            source: ComputationError::Threading(e),
        })?;
        let events = self.events.clone();

        let node = self.node_mut(node_id)?;
        node.abort.reset();
        node.state = NodeState::Executing;
        for output in node.outputs.iter_mut() {
            output
                .allocate()
                .map_err(|source| PipelineError::Computation { node_id, source })?;
        }
        let threads = driver.threads_for(node.threads);
        let abort = node.abort.clone();

        let (mut filter, mut outputs) = self.checkout(node_id)?;
        debug!("Generating data for {} on {} thread(s)", node_id, threads);
        events.emit(&PipelineEvent::Start { node_id });
        let result = {
            let progress = ProgressReporter::new(node_id, events.clone(), abort.clone());
            let mut ctx = GenerateContext::new(
                node_id,
                self.input_data(node_id),
                &mut outputs,
                &driver,
                threads,
                progress,
            );
            filter.generate_data(&mut ctx)
        };
        self.checkin(node_id, filter, outputs);

        let node = self.node_mut(node_id)?;
        match result {
            Ok(()) => {
                for output in node.outputs.iter_mut() {
                    output.state_mut().mark_generated();
                }
                node.update_time.modified();
                node.state = NodeState::UpToDate;
                node.generation_count += 1;
                events.emit(&PipelineEvent::End { node_id });
                self.release_inputs(&producers);
                pass.leave(node_id);
                Ok(())
            }
            Err(source) => {
                for output in node.outputs.iter_mut() {
                    output.release_data();
                }
                if abort.is_aborted() {
                    warn!("Node {} aborted", node_id);
                    events.emit(&PipelineEvent::Abort { node_id });
                } else {
                    warn!("Node {} failed: {}", node_id, source);
                    events.emit(&PipelineEvent::Error {
                        node_id,
                        message: source.to_string(),
                    });
                }
                Err(PipelineError::Computation { node_id, source })
            }
        }
    }

    /// Release producer outputs whose node asked for it, now that their
    /// consumer has run.
    /// Run the filter's input checks; nothing about the node changes when
    /// they fail.
    fn verify_inputs(&self, node_id: NodeId) -> PipelineResult<()> {
        let filter = self
            .node(node_id)?
            .filter
            .as_ref()
            .ok_or(PipelineError::ReentrantUpdate(node_id))?;
        let inputs = self.input_data(node_id);
        let verified = filter
            .verify_preconditions(&inputs)
            .and_then(|()| filter.verify_input_information(&inputs));
        if let Err(source) = verified {
            warn!("Node {} rejected its inputs: {}", node_id, source);
            self.events.emit(&PipelineEvent::Error {
                node_id,
                message: source.to_string(),
            });
            return Err(PipelineError::Computation { node_id, source });
        }
        Ok(())
    }

    fn release_inputs(&mut self, producers: &[Endpoint]) {
        for endpoint in producers {
            if let Some(producer) = self.nodes.get_mut(&endpoint.node_id) {
                if producer.release_data {
                    if let Some(output) = producer.outputs.get_mut(endpoint.port) {
                        trace!("Releasing {}", endpoint);
                        output.release_data();
                    }
                }
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Take the filter and outputs out of a node so that it can run while
    /// the rest of the graph is borrowed.
    fn checkout(&mut self, node_id: NodeId) -> PipelineResult<(Box<dyn Filter>, Vec<Box<dyn DataObject>>)> {
        let node = self.node_mut(node_id)?;
        let filter = node.filter.take().ok_or(PipelineError::ReentrantUpdate(node_id))?;
        Ok((filter, std::mem::take(&mut node.outputs)))
    }

    fn checkin(&mut self, node_id: NodeId, filter: Box<dyn Filter>, outputs: Vec<Box<dyn DataObject>>) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.filter = Some(filter);
            node.outputs = outputs;
        }
    }

    /// Producer outputs feeding `node_id`, one slot per input.
    fn input_data(&self, node_id: NodeId) -> Inputs<'_> {
        let slots = self
            .nodes
            .get(&node_id)
            .map(|node| {
                node.inputs
                    .iter()
                    .map(|slot| {
                        let endpoint = (*slot)?;
                        self.nodes
                            .get(&endpoint.node_id)?
                            .outputs
                            .get(endpoint.port)
                            .map(|output| output.as_ref())
                    })
                    .collect()
            })
            .unwrap_or_default();
        Inputs::new(slots)
    }
}

impl Updatable for PipelineGraph {
    fn update(&mut self, node: NodeId) -> PipelineResult<()> {
        PipelineGraph::update(self, node)
    }

    fn update_largest_possible_region(&mut self, node: NodeId) -> PipelineResult<()> {
        PipelineGraph::update_largest_possible_region(self, node)
    }

    fn modified(&mut self, node: NodeId) -> GraphResult<()> {
        self.mark_modified(node)
    }

    fn reset_pipeline(&mut self, node: NodeId) -> GraphResult<usize> {
        PipelineGraph::reset_pipeline(self, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ThreadingConfig;
    use crate::core::data::Image;
    use crate::core::error::ComputationResult;
    use crate::core::node::{NodeMetadata, RegionEnlargeable};
    use crate::core::region::ImageRegion;
    use crate::core::types::Value;
    use crate::execution::progress::channel_observer;
    use crate::filters::builtin::{Add, BoxMean, ConstantSource, ShiftScale};
    use crate::threading::driver::ParallelDriver;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn graph() -> PipelineGraph {
        let driver = ParallelDriver::new(ThreadingConfig::new().with_max_threads(8).with_default_threads(3)).unwrap();
        PipelineGraph::new().with_driver(Arc::new(driver))
    }

    fn source(graph: &mut PipelineGraph, size: Vec<u64>, value: f64) -> NodeId {
        let id = graph.add_node(Box::new(ConstantSource::default()));
        graph.set_parameter(id, "size", size).unwrap();
        graph.set_parameter(id, "value", value).unwrap();
        id
    }

    fn shift(graph: &mut PipelineGraph, input: NodeId, shift: f64) -> NodeId {
        let id = graph.add_node(Box::new(ShiftScale::<f32>::default()));
        graph.set_parameter(id, "shift", shift).unwrap();
        graph.connect(input, 0, id, 0).unwrap();
        id
    }

    /// Copies its input, failing while `fail` is raised.
    struct Flaky {
        fail: Arc<AtomicBool>,
    }

    impl RegionEnlargeable for Flaky {}

    impl Filter for Flaky {
        fn metadata(&self) -> NodeMetadata {
            NodeMetadata::builder("flaky", "Flaky").input().output("output").build()
        }

        fn make_output(&self, _index: usize) -> Box<dyn DataObject> {
            Box::new(Image::<f32>::unset())
        }

        fn generate_data(&mut self, ctx: &mut GenerateContext<'_>) -> ComputationResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ComputationError::failed("flaky failure"));
            }
            let input = ctx.input_image::<f32>(0)?;
            let output = ctx.output_image_mut::<f32>(0)?;
            let region = output.buffered_region().clone();
            for index in region.indices() {
                let value = input.get(&index).unwrap_or_default();
                output.set(&index, value);
            }
            Ok(())
        }
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut graph = graph();
        let a = source(&mut graph, vec![8, 6], 2.0);
        let b = shift(&mut graph, a, 1.0);

        graph.update(b).unwrap();
        assert_eq!(graph.generation_count(b).unwrap(), 1);
        assert_eq!(graph.state(b).unwrap(), NodeState::UpToDate);
        assert!(graph.output_image::<f32>(b, 0).unwrap().pixels().iter().all(|&p| p == 3.0));

        graph.update(b).unwrap();
        assert_eq!(graph.generation_count(a).unwrap(), 1);
        assert_eq!(graph.generation_count(b).unwrap(), 1);
    }

    #[test]
    fn test_modification_recomputes_downstream_only() {
        let mut graph = graph();
        let a = source(&mut graph, vec![4, 4], 1.0);
        let b = shift(&mut graph, a, 1.0);
        let c = shift(&mut graph, a, 2.0);
        graph.update(b).unwrap();
        graph.update(c).unwrap();

        graph.set_parameter(b, "shift", 5.0).unwrap();
        graph.update(b).unwrap();
        graph.update(c).unwrap();
        assert_eq!(graph.generation_count(a).unwrap(), 1);
        assert_eq!(graph.generation_count(b).unwrap(), 2);
        assert_eq!(graph.generation_count(c).unwrap(), 1);
        assert_eq!(graph.output_image::<f32>(b, 0).unwrap().get(&[0, 0]), Some(6.0));

        graph.set_parameter(a, "value", 0.0).unwrap();
        graph.update(c).unwrap();
        assert_eq!(graph.generation_count(a).unwrap(), 2);
        assert_eq!(graph.generation_count(c).unwrap(), 2);
        assert_eq!(graph.generation_count(b).unwrap(), 2);
        assert_eq!(graph.output_image::<f32>(c, 0).unwrap().get(&[3, 3]), Some(2.0));
    }

    #[test]
    fn test_change_reaches_join_two_hops_downstream() {
        let mut graph = graph();
        let a = source(&mut graph, vec![4, 4], 1.0);
        let b = shift(&mut graph, a, 1.0);
        let c = shift(&mut graph, b, 1.0);
        let sibling = shift(&mut graph, a, 10.0);
        let d = graph.add_node(Box::new(Add::<f32>::default()));
        graph.connect(c, 0, d, 0).unwrap();
        graph.connect(sibling, 0, d, 1).unwrap();
        graph.update(d).unwrap();
        assert_eq!(graph.output_image::<f32>(d, 0).unwrap().get(&[0, 0]), Some(14.0));

        graph.set_parameter(b, "shift", 5.0).unwrap();
        graph.update(d).unwrap();
        let counts: Vec<u64> = [a, b, c, sibling, d]
            .iter()
            .map(|&id| graph.generation_count(id).unwrap())
            .collect();
        assert_eq!(counts, vec![1, 2, 2, 1, 2]);
        assert_eq!(graph.output_image::<f32>(d, 0).unwrap().get(&[3, 3]), Some(18.0));

        graph.update(d).unwrap();
        assert_eq!(graph.generation_count(d).unwrap(), 2);
    }

    #[test]
    fn test_failure_leaves_node_executing_until_retry() {
        let mut graph = graph();
        let fail = Arc::new(AtomicBool::new(true));
        let a = source(&mut graph, vec![3, 3], 4.0);
        let b = graph.add_node(Box::new(Flaky { fail: Arc::clone(&fail) }));
        graph.connect(a, 0, b, 0).unwrap();

        let err = graph.update(b).unwrap_err();
        assert!(matches!(err, PipelineError::Computation { node_id, .. } if node_id == b));
        assert_eq!(graph.state(b).unwrap(), NodeState::Executing);
        assert_eq!(graph.state(a).unwrap(), NodeState::UpToDate);
        assert!(graph.output(b, 0).unwrap().is_released());

        fail.store(false, Ordering::SeqCst);
        graph.update(b).unwrap();
        assert_eq!(graph.state(b).unwrap(), NodeState::UpToDate);
        assert_eq!(graph.generation_count(a).unwrap(), 1);
        assert_eq!(graph.output_image::<f32>(b, 0).unwrap().get(&[2, 2]), Some(4.0));
    }

    #[test]
    fn test_reset_pipeline() {
        let mut graph = graph();
        let fail = Arc::new(AtomicBool::new(true));
        let a = source(&mut graph, vec![2], 1.0);
        let b = graph.add_node(Box::new(Flaky { fail }));
        graph.connect(a, 0, b, 0).unwrap();
        assert!(graph.update(b).is_err());

        assert_eq!(Updatable::reset_pipeline(&mut graph, b).unwrap(), 1);
        assert_eq!(graph.state(b).unwrap(), NodeState::Modified);
        assert_eq!(graph.reset_pipeline(b).unwrap(), 0);
    }

    #[test]
    fn test_missing_required_input_keeps_buffers() {
        let mut graph = graph();
        let a = source(&mut graph, vec![4], 1.0);
        let sum = graph.add_node(Box::new(Add::<f32>::default()));
        graph.connect(a, 0, sum, 0).unwrap();

        let err = graph.update(sum).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingRequiredInputs { required: 2, connected: 1, .. }
        ));
        assert_ne!(graph.state(sum).unwrap(), NodeState::Executing);

        graph.connect(a, 0, sum, 1).unwrap();
        graph.update(sum).unwrap();
        assert_eq!(graph.output_image::<f32>(sum, 0).unwrap().pixels(), &[2.0; 4]);
    }

    #[test]
    fn test_explicit_requested_region() {
        let mut graph = graph();
        let a = source(&mut graph, vec![10, 10], 1.0);
        let b = shift(&mut graph, a, 0.0);
        let region = ImageRegion::new(vec![2, 3], vec![4, 2]);
        graph.set_requested_region(b, 0, Some(region.clone())).unwrap();

        graph.update(b).unwrap();
        let output = graph.output_image::<f32>(b, 0).unwrap();
        assert_eq!(output.buffered_region(), &region);
        assert_eq!(output.pixels().len(), 8);
        assert_eq!(output.largest_possible_region(), &ImageRegion::from_size(vec![10, 10]));

        graph.update_largest_possible_region(b).unwrap();
        let output = graph.output_image::<f32>(b, 0).unwrap();
        assert_eq!(output.pixels().len(), 100);
        assert_eq!(graph.generation_count(b).unwrap(), 2);
    }

    #[test]
    fn test_invalid_requested_region() {
        let mut graph = graph();
        let a = source(&mut graph, vec![4, 4], 1.0);
        graph
            .set_requested_region(a, 0, Some(ImageRegion::new(vec![2, 2], vec![4, 4])))
            .unwrap();

        let err = graph.update(a).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequestedRegion { output: 0, .. }));
        assert_eq!(graph.generation_count(a).unwrap(), 0);
    }

    #[test]
    fn test_neighborhood_filter_pads_input_request() {
        let mut graph = graph();
        let a = source(&mut graph, vec![10, 10], 1.0);
        let mean = graph.add_node(Box::new(BoxMean::<f32>::default()));
        graph.set_parameter(mean, "radius", vec![2u64]).unwrap();
        graph.connect(a, 0, mean, 0).unwrap();
        graph
            .set_requested_region(mean, 0, Some(ImageRegion::new(vec![0, 4], vec![10, 2])))
            .unwrap();

        graph.update(mean).unwrap();
        let input = graph.output_image::<f32>(a, 0).unwrap();
        assert_eq!(input.buffered_region(), &ImageRegion::new(vec![0, 2], vec![10, 6]));
        let output = graph.output_image::<f32>(mean, 0).unwrap();
        assert!(output.pixels().iter().all(|&p| (p - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_release_data_flag() {
        let mut graph = graph();
        let a = source(&mut graph, vec![4, 4], 1.0);
        let b = shift(&mut graph, a, 1.0);
        graph.set_release_data_flag(a, true).unwrap();

        graph.update(b).unwrap();
        assert!(graph.output(a, 0).unwrap().is_released());

        // The consumer is current, so the released producer stays released.
        graph.update(b).unwrap();
        assert_eq!(graph.generation_count(a).unwrap(), 1);

        let c = shift(&mut graph, a, 2.0);
        graph.update(c).unwrap();
        assert_eq!(graph.generation_count(a).unwrap(), 2);
        assert_eq!(graph.output_image::<f32>(c, 0).unwrap().get(&[1, 1]), Some(3.0));
    }

    #[test]
    fn test_events_and_abort() {
        let mut graph = graph();
        let a = source(&mut graph, vec![64, 64], 1.0);
        let b = shift(&mut graph, a, 1.0);
        let (observer, receiver) = channel_observer();
        graph.add_observer(observer);

        let handle = graph.abort_handle(b).unwrap();
        graph.add_observer(Arc::new(move |event: &PipelineEvent| {
            if *event == (PipelineEvent::Start { node_id: b }) {
                handle.abort();
            }
        }));

        let err = graph.update(b).unwrap_err();
        assert!(matches!(err, PipelineError::Computation { node_id, .. } if node_id == b));
        let events: Vec<PipelineEvent> = receiver.try_iter().collect();
        assert!(events.contains(&PipelineEvent::End { node_id: a }));
        assert!(events.contains(&PipelineEvent::Abort { node_id: b }));
        assert!(!events.contains(&PipelineEvent::End { node_id: b }));
    }

    #[test]
    fn test_parameter_roundtrip_through_graph() {
        let mut graph = graph();
        let a = source(&mut graph, vec![2, 2], 3.0);
        assert_eq!(graph.parameter(a, "value").unwrap(), Value::Float(3.0));
        assert_eq!(graph.parameter(a, "size").unwrap(), Value::Size(vec![2, 2]));
    }
}
