//! # Strata - Demand-driven Image Pipelines
//!
//! Strata is the core of a demand-driven, multithreaded image pipeline.
//! Filters are connected into a graph; asking a node for its output pulls
//! exactly the work needed through the graph and splits each filter's work
//! across a pool of threads.
//!
//! ## Features
//!
//! - **Demand-driven updates**: only stale nodes recompute, and only the
//!   regions their consumers asked for
//! - **Domain partitioning**: index ranges, container ranges, cursor ranges
//!   and image regions split evenly across threads
//! - **Fork/join driver**: per-thread failures collected and reported after
//!   every worker finished
//! - **Synchronization primitives**: mutex, condition variable, named
//!   counting semaphores and lazily created singletons
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata::prelude::*;
//!
//! let registry = FilterRegistry::with_builtins();
//! let mut graph = PipelineGraph::new();
//!
//! let source = graph.add_node(registry.create("gradient_source").unwrap());
//! graph.set_parameter(source, "size", vec![256u64, 256]).unwrap();
//!
//! let mean = graph.add_node(registry.create("box_mean").unwrap());
//! graph.set_parameter(mean, "radius", vec![2u64]).unwrap();
//! graph.connect(source, 0, mean, 0).unwrap();
//!
//! graph.update(mean).unwrap();
//! let image = graph.output_image::<f32>(mean, 0).unwrap();
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: timestamps, regions, data objects, filter traits, sync
//!   primitives, configuration and errors
//! - [`threading`]: domains, partitioners and the parallel driver
//! - [`graph`]: pipeline structure and topology analysis
//! - [`execution`]: the update protocol, events and progress
//! - [`filters`]: filter registry and built-in filters

#![warn(clippy::all)]

pub mod core;
pub mod execution;
pub mod filters;
pub mod graph;
pub mod threading;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use strata::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::data::{DataObject, Decorated, Image, RegionSet};
    pub use crate::core::region::ImageRegion;
    pub use crate::core::timestamp::{GlobalTimestamp, TimeStamp};
    pub use crate::core::types::{Pixel, Value};

    // Node traits and types
    pub use crate::core::context::{GenerateContext, Inputs};
    pub use crate::core::node::{
        Category, Filter, InputRegionRequest, NodeMetadata, NodeState, ParameterDefinition,
        RegionEnlargeable, ThreadedComputable,
    };

    // Configuration and shared state
    pub use crate::core::config::{GlobalThreadSettings, ThreadingConfig};
    pub use crate::core::random::RandomVariateGenerator;
    pub use crate::core::sync::{ConditionVariable, MutexLock, Semaphore, SingletonCell};

    // Errors
    pub use crate::core::error::{
        ComputationError, ConfigError, DomainError, GraphError, NodeId, ParameterError,
        PipelineError, ResourceError, StrataError, ThreadingError,
    };

    // Threading
    pub use crate::threading::domain::{
        Domain, IndexRange, IndexedContainerDomain, IteratorRange, SliceCursor,
    };
    pub use crate::threading::driver::{DomainThreader, ParallelDriver, RegionChunk, RunSummary, WorkItem};
    pub use crate::threading::partitioner::{
        DomainPartitioner, IndexRangePartitioner, IndexedContainerPartitioner,
        IteratorRangePartitioner, Partition, RegionPartitioner,
    };

    // Graph
    pub use crate::graph::connection::{Connection, Endpoint};
    pub use crate::graph::structure::{PipelineGraph, PipelineNode};
    pub use crate::graph::topology::TopologyAnalyzer;

    // Execution
    pub use crate::execution::progress::{
        channel_observer, AbortHandle, Observer, PipelineEvent, ProgressReporter,
    };
    pub use crate::execution::update::Updatable;

    // Filters
    pub use crate::filters::registry::{FilterFactory, FilterRegistry, RegistryEntry};
    pub use crate::filters::builtin::{
        Add, AdditiveGaussianNoise, BoxMean, ConstantSource, GradientSource, ImageStatistics,
        ShiftScale, Statistics,
    };
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
