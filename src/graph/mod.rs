//! Graph module for managing pipelines.
//!
//! A pipeline is a directed acyclic graph (DAG) where nodes own a filter and
//! its outputs, and edges feed a producer's output into a consumer's input.

pub mod connection;
pub mod structure;
pub mod topology;

// Re-export commonly used types
pub use connection::{Connection, Endpoint};
pub use structure::{PipelineGraph, PipelineNode};
pub use topology::TopologyAnalyzer;
