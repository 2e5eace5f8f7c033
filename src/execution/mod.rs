//! Pipeline execution.
//!
//! This module drives the demand-driven update of a pipeline and reports on
//! it while it runs.

pub mod progress;
pub mod update;

pub use progress::{channel_observer, AbortHandle, EventHub, Observer, PipelineEvent, ProgressReporter};
pub use update::Updatable;
