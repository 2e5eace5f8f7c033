//! Core types and traits for the Strata pipeline.
//!
//! This module contains the foundations the pipeline is built on:
//! - Global modification timestamps
//! - Image regions and the data objects flowing between nodes
//! - Filter traits, node metadata and the per-call generate context
//! - Synchronization primitives and lazily created singletons
//! - Threading configuration and the random variate generator
//! - Error types

pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod node;
pub mod random;
pub mod region;
pub mod sync;
pub mod timestamp;
pub mod types;

// Re-export commonly used types
pub use config::{GlobalThreadSettings, ThreadingConfig};
pub use context::{GenerateContext, Inputs};
pub use data::{DataObject, Decorated, Image, RegionSet};
pub use error::{
    ComputationError, ConfigError, DomainError, GraphError, NodeId, PipelineError, ResourceError,
    StrataError, ThreadingError,
};
pub use node::{Category, Filter, NodeMetadata, NodeState, RegionEnlargeable, ThreadedComputable};
pub use region::ImageRegion;
pub use timestamp::{GlobalTimestamp, TimeStamp};
pub use types::{Pixel, Value};
