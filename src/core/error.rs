//! Error types for Strata.
//!
//! Uses thiserror for structured errors with context. Each concern owns one
//! enum and [`StrataError`] folds them together:
//! - domain partitioning contract violations ([`DomainError`])
//! - filter computation failures ([`ComputationError`])
//! - synchronization resources ([`ResourceError`])
//! - worker dispatch ([`ThreadingError`])
//! - the update protocol ([`PipelineError`]) and graph edits ([`GraphError`])

use crate::core::region::ImageRegion;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a node in the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a node ID from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Top-level error type for Strata.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Computation error: {0}")]
    Computation(#[from] ComputationError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Threading error: {0}")]
    Threading(#[from] ThreadingError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Partitioning contract violations.
///
/// These are programming errors on the caller's side and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid domain: cannot split {count} element(s) across {requested} thread(s)")]
    InvalidDomain { count: u64, requested: usize },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Range [{begin}, {end}] lies outside a container of {len} element(s)")]
    RangeOutOfBounds { begin: i64, end: i64, len: usize },

    #[error("Domain {domain} holds more elements than a u64 can count")]
    CountOverflow { domain: String },
}

/// Failures raised by a node's computation.
#[derive(Error, Debug)]
pub enum ComputationError {
    #[error("{0}")]
    Failed(String),

    #[error("Input {index} is not connected")]
    MissingInput { index: usize },

    #[error("Output {index} does not exist")]
    MissingOutput { index: usize },

    #[error("Data object on port {index} is a {got}, expected {expected}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Region mismatch: {left} vs {right}")]
    RegionMismatch { left: ImageRegion, right: ImageRegion },

    #[error("Computation aborted")]
    Aborted,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Threading(#[from] ThreadingError),
}

impl ComputationError {
    /// Shorthand for a free-form failure.
    pub fn failed(message: impl Into<String>) -> Self {
        ComputationError::Failed(message.into())
    }
}

/// Synchronization resource failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Semaphore has not been initialized")]
    NotInitialized,

    #[error("Semaphore '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("Semaphore '{name}' not found")]
    NotFound { name: String },

    #[error("Semaphore '{name}' has been removed")]
    Removed { name: String },

    #[error("Semaphore '{name}' count overflow")]
    Overflow { name: String },

    #[error("Semaphore '{name}': {operation} failed: {message}")]
    System {
        name: String,
        operation: &'static str,
        message: String,
    },
}

/// Failures while dispatching work to the worker pool.
#[derive(Error, Debug)]
pub enum ThreadingError {
    #[error("Worker {thread_id} failed: {source}")]
    Worker {
        thread_id: usize,
        #[source]
        source: Box<ComputationError>,
    },

    #[error("Worker {thread_id} panicked: {message}")]
    WorkerPanicked { thread_id: usize, message: String },

    #[error("Buffer holds {got} element(s) but the region covers {expected}")]
    BufferMismatch { expected: u64, got: usize },

    #[error("Failed to build worker pool: {0}")]
    PoolBuild(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ThreadingError {
    /// The worker that failed, when the failure came from a worker.
    pub fn thread_id(&self) -> Option<usize> {
        match self {
            ThreadingError::Worker { thread_id, .. }
            | ThreadingError::WorkerPanicked { thread_id, .. } => Some(*thread_id),
            _ => None,
        }
    }
}

/// Errors from the demand-driven update protocol.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Node {node_id} failed: {source}")]
    Computation {
        node_id: NodeId,
        #[source]
        source: ComputationError,
    },

    #[error("Node {node_id} requires {required} input(s) but only {connected} are connected")]
    MissingRequiredInputs {
        node_id: NodeId,
        required: usize,
        connected: usize,
    },

    #[error("Requested region {requested} of node {node_id} output {output} lies outside {largest}")]
    InvalidRequestedRegion {
        node_id: NodeId,
        output: usize,
        requested: ImageRegion,
        largest: ImageRegion,
    },

    #[error("Node {0} is already being updated")]
    ReentrantUpdate(NodeId),
}

impl PipelineError {
    /// Get the node ID that caused this error, if applicable.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            PipelineError::Computation { node_id, .. }
            | PipelineError::MissingRequiredInputs { node_id, .. }
            | PipelineError::InvalidRequestedRegion { node_id, .. }
            | PipelineError::ReentrantUpdate(node_id) => Some(*node_id),
            PipelineError::Graph(error) => error.node_id(),
        }
    }
}

/// Errors related to graph structure and edits.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Node {node_id} has no input {index} (it accepts {count})")]
    InputOutOfRange {
        node_id: NodeId,
        index: usize,
        count: usize,
    },

    #[error("Node {node_id} has no output {index} (it produces {count})")]
    OutputOutOfRange {
        node_id: NodeId,
        index: usize,
        count: usize,
    },

    #[error("Cycle detected in graph involving nodes: {nodes:?}")]
    CycleDetected { nodes: Vec<NodeId> },

    #[error("Cannot remove node {0}: other nodes consume its outputs")]
    NodeHasConsumers(NodeId),

    #[error("Node {node_id} has no parameter '{name}'")]
    UnknownParameter { node_id: NodeId, name: String },

    #[error("Invalid value for parameter '{name}' on node {node_id}: {reason}")]
    InvalidParameter {
        node_id: NodeId,
        name: String,
        reason: String,
    },

    #[error("Output {index} of node {node_id} is a {got}, expected {expected}")]
    OutputTypeMismatch {
        node_id: NodeId,
        index: usize,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Region {region} does not match the {dimension}-D output of node {node_id}")]
    RegionDimension {
        node_id: NodeId,
        region: ImageRegion,
        dimension: usize,
    },
}

impl GraphError {
    /// Get the node ID that caused this error, if applicable.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            GraphError::NodeNotFound(node_id)
            | GraphError::NodeHasConsumers(node_id)
            | GraphError::InputOutOfRange { node_id, .. }
            | GraphError::OutputOutOfRange { node_id, .. }
            | GraphError::UnknownParameter { node_id, .. }
            | GraphError::InvalidParameter { node_id, .. }
            | GraphError::OutputTypeMismatch { node_id, .. }
            | GraphError::RegionDimension { node_id, .. } => Some(*node_id),
            GraphError::CycleDetected { nodes } => nodes.first().copied(),
        }
    }
}

/// Raised by a filter that rejects a parameter assignment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("unknown parameter '{0}'")]
    Unknown(String),

    #[error("{reason}")]
    Invalid { reason: String },
}

impl ParameterError {
    /// Shorthand for an invalid-value rejection.
    pub fn invalid(reason: impl Into<String>) -> Self {
        ParameterError::Invalid {
            reason: reason.into(),
        }
    }

    /// Attach the node and parameter name.
    pub fn into_graph_error(self, node_id: NodeId, name: &str) -> GraphError {
        match self {
            ParameterError::Unknown(name) => GraphError::UnknownParameter { node_id, name },
            ParameterError::Invalid { reason } => GraphError::InvalidParameter {
                node_id,
                name: name.to_string(),
                reason,
            },
        }
    }
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable {var}={value:?} is not a thread count")]
    Environment { var: String, value: String },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type alias for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

/// Result type alias for partitioning.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type alias for filter computations.
pub type ComputationResult<T> = Result<T, ComputationError>;

/// Result type alias for graph edits.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for the update protocol.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        let id = NodeId::new();
        let display = format!("{}", id);
        assert_eq!(display.len(), 8);
    }

    #[test]
    fn test_threading_error_thread_id() {
        let error = ThreadingError::Worker {
            thread_id: 3,
            source: Box::new(ComputationError::Aborted),
        };
        assert_eq!(error.thread_id(), Some(3));
        assert!(error.to_string().contains("Worker 3"));

        let error = ThreadingError::PoolBuild("no threads".to_string());
        assert_eq!(error.thread_id(), None);
    }

    #[test]
    fn test_parameter_error_conversion() {
        let node_id = NodeId::new();
        let error = ParameterError::invalid("must be positive").into_graph_error(node_id, "radius");
        assert!(matches!(error, GraphError::InvalidParameter { ref name, .. } if name == "radius"));
        assert_eq!(error.node_id(), Some(node_id));
    }

    #[test]
    fn test_pipeline_error_node_id() {
        let node_id = NodeId::new();
        let error = PipelineError::Computation {
            node_id,
            source: ComputationError::failed("boom"),
        };
        assert_eq!(error.node_id(), Some(node_id));
        assert!(error.to_string().contains("boom"));
    }
}
